//! DataService - sole authority over the relational store.
//!
//! Exposes the account, character, inventory and static-data operations
//! over the frame-based RPC transport, and runs the periodic shared-store
//! to database write-back.

mod migrations;
mod repo;
mod server;
mod writeback;

use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use tracing::{error, info};

use flyagain_common::{Config, SharedStore};

const EXIT_STARTUP_FAILURE: i32 = 1;
const EXIT_MIGRATION_FAILURE: i32 = 2;

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

    let pool = match connect_database(&config).await {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "relational store unreachable at boot");
            std::process::exit(EXIT_STARTUP_FAILURE);
        }
    };

    if let Err(e) = migrations::run(&pool).await {
        error!(error = %e, "schema migration failed");
        std::process::exit(EXIT_MIGRATION_FAILURE);
    }

    let store = match SharedStore::connect(&config.shared_store.url).await {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "shared store unreachable at boot");
            std::process::exit(EXIT_STARTUP_FAILURE);
        }
    };

    let listen_addr = format!("0.0.0.0:{}", config.services.data_port);
    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %listen_addr, error = %e, "failed to bind RPC port");
            std::process::exit(EXIT_STARTUP_FAILURE);
        }
    };
    info!(addr = %listen_addr, "DataService listening");

    let flush_interval = Duration::from_secs(config.world.writeback_interval_secs);
    tokio::spawn(writeback::run_scheduler(
        store,
        pool.clone(),
        flush_interval,
    ));

    tokio::select! {
        result = server::serve(listener, pool) => {
            if let Err(e) = result {
                error!(error = %e, "RPC server terminated");
                std::process::exit(EXIT_STARTUP_FAILURE);
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }
}

async fn connect_database(config: &Config) -> anyhow::Result<PgPool> {
    let options = PgConnectOptions::from_str(&config.database.url)?
        .username(&config.database.user)
        .password(&config.database.password);

    let pool = PgPoolOptions::new()
        .max_connections(config.database.pool_size)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await?;
    Ok(pool)
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).expect("signal handler installation");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}
