//! WorldService - real-time gameplay: tick loop, zones, channels, spatial
//! interest management, monster AI, combat, and session persistence.

mod ai;
mod broadcast;
mod combat;
mod connection;
mod entity;
mod grid;
mod movement;
mod net;
mod persistence;
mod queue;
mod tick;
mod zone;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use tracing::{error, info, warn};

use flyagain_common::{Config, ConnectionLimiter, DataApi, DataClient, SharedStore, TokenService};

use entity::EntityManager;
use net::tcp::WorldNet;
use net::udp::UdpSessionTable;
use persistence::IoSink;
use queue::{InputQueue, DEFAULT_QUEUE_CAPACITY};
use tick::{GameData, Simulation};
use zone::ZoneManager;

const EXIT_STARTUP_FAILURE: i32 = 1;
/// Shutdown flush budget; entities not saved in time survive at their
/// last shared-store snapshot.
const SHUTDOWN_FLUSH_BUDGET: Duration = Duration::from_secs(30);

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

    let data: Arc<dyn DataApi> = match DataClient::connect(
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

    // Static world content, fetched once.
    let (monsters, spawns, skills, loot) = match tokio::try_join!(
        data.get_all_monsters(),
        data.get_all_spawns(),
        data.get_all_skills(),
        data.get_all_loot_tables(),
    ) {
        Ok(defs) => defs,
        Err(e) => {
            error!(error = %e, "failed to load game data");
            std::process::exit(EXIT_STARTUP_FAILURE);
        }
    };
    info!(
        monsters = monsters.len(),
        spawns = spawns.len(),
        skills = skills.len(),
        "game data loaded"
    );

    let entities = Arc::new(EntityManager::new());
    let zones = ZoneManager::new(config.world.channel_capacity, &monsters, &spawns, &entities);
    let queue = Arc::new(InputQueue::new(DEFAULT_QUEUE_CAPACITY));
    let udp_sessions = Arc::new(UdpSessionTable::new());

    let (io, io_rx) = IoSink::new();
    tokio::spawn(persistence::run_io_worker(
        io_rx,
        store.clone(),
        Arc::clone(&data),
        Arc::clone(&queue),
    ));

    let tcp_addr = format!("0.0.0.0:{}", config.services.world_tcp_port);
    let tcp_listener = match tokio::net::TcpListener::bind(&tcp_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %tcp_addr, error = %e, "failed to bind TCP port");
            std::process::exit(EXIT_STARTUP_FAILURE);
        }
    };
    let udp_addr = format!("0.0.0.0:{}", config.services.world_udp_port);
    let udp_socket = match tokio::net::UdpSocket::bind(&udp_addr).await {
        Ok(socket) => socket,
        Err(e) => {
            error!(addr = %udp_addr, error = %e, "failed to bind UDP port");
            std::process::exit(EXIT_STARTUP_FAILURE);
        }
    };
    info!(tcp = %tcp_addr, udp = %udp_addr, "WorldService listening");

    // The tick thread: plain loop, never suspends, owns all world state.
    let simulation = Simulation::new(
        zones,
        Arc::clone(&entities),
        GameData::from_defs(skills, loot),
        io,
        rand::rngs::OsRng.next_u64(),
    );
    let shutdown = Arc::new(AtomicBool::new(false));
    let tick_thread = {
        let queue = Arc::clone(&queue);
        let shutdown = Arc::clone(&shutdown);
        let tick_ms = config.tick_interval_ms();
        std::thread::Builder::new()
            .name("world-tick".to_string())
            .spawn(move || tick::run_loop(simulation, queue, shutdown, tick_ms))
            .expect("tick thread spawn")
    };

    let limiter = ConnectionLimiter::new(
        config.network.max_connections,
        config.network.max_connections_per_ip,
    );
    let world_net = Arc::new(WorldNet::new(
        TokenService::new(&config.auth.token_secret, config.auth.token_ttl_secs),
        store.clone(),
        Arc::clone(&entities),
        Arc::clone(&queue),
        Arc::clone(&udp_sessions),
    ));

    let tcp_task = tokio::spawn(net::tcp::run_tcp(tcp_listener, limiter, world_net));
    let udp_task = tokio::spawn(net::udp::run_udp(
        udp_socket,
        udp_sessions,
        store.clone(),
        Arc::clone(&queue),
    ));

    shutdown_signal().await;
    info!("shutdown signal received, stopping accept loops");
    tcp_task.abort();
    udp_task.abort();

    // Let the tick loop finish its current tick, then flush everyone.
    shutdown.store(true, Ordering::SeqCst);
    let snapshots = tokio::task::spawn_blocking(move || {
        tick_thread.join().unwrap_or_else(|_| {
            error!("tick thread panicked, in-memory state is lost");
            Vec::new()
        })
    })
    .await
    .unwrap_or_default();

    info!(players = snapshots.len(), "flushing final player state");
    let flush = async {
        for record in snapshots {
            let character_id = record.id;
            if let Err(e) = data.character_save(record).await {
                warn!(character_id, error = %e, "final save failed, last snapshot stands");
            }
        }
    };
    if tokio::time::timeout(SHUTDOWN_FLUSH_BUDGET, flush).await.is_err() {
        warn!("shutdown flush budget exceeded, remaining state stands at its last snapshot");
    }

    info!("WorldService stopped");
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).expect("signal handler installation");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}
