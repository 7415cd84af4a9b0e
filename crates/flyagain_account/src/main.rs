//! AccountService - token-gated character creation and selection.
//! Primes the per-character cache for the world handoff.

mod handlers;

use std::sync::Arc;

use tracing::{error, info};

use flyagain_common::gateway;
use flyagain_common::{Config, ConnectionLimiter, DataClient, SharedStore, TokenService};

use handlers::AccountService;

const EXIT_STARTUP_FAILURE: i32 = 1;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(EXIT_STARTUP_FAILURE);
        }
    };

    let store = match SharedStore::connect(&config.shared_store.url).await {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "shared store unreachable at boot");
            std::process::exit(EXIT_STARTUP_FAILURE);
        }
    };

    let data = match DataClient::connect(
        &config.services.data_host,
        config.services.data_port,
        config.database.pool_size as usize,
    )
    .await
    {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!(error = %e, "DataService unreachable at boot");
            std::process::exit(EXIT_STARTUP_FAILURE);
        }
    };

    let service = Arc::new(AccountService {
        data,
        store,
        tokens: TokenService::new(&config.auth.token_secret, config.auth.token_ttl_secs),
        world_host: config.services.world_host.clone(),
        world_tcp_port: config.services.world_tcp_port,
        world_udp_port: config.services.world_udp_port,
    });

    let limiter = ConnectionLimiter::new(
        config.network.max_connections,
        config.network.max_connections_per_ip,
    );

    let listen_addr = format!("0.0.0.0:{}", config.services.account_port);
    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %listen_addr, error = %e, "failed to bind");
            std::process::exit(EXIT_STARTUP_FAILURE);
        }
    };
    info!(addr = %listen_addr, "AccountService listening");

    tokio::select! {
        result = gateway::run_gateway(listener, limiter, service) => {
            if let Err(e) = result {
                error!(error = %e, "accept loop terminated");
                std::process::exit(EXIT_STARTUP_FAILURE);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }
}
