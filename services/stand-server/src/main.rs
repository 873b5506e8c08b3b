// stand-server: binary entry point.

use stand_server::session::SessionContext;
use stand_server::{Dispatcher, EventBus, Registry, ServerClock, Tunables};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "stand-server starting");

    let config = match stand_server::load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };
    info!(
        redis = %format!("{}:{}", config.redis.ip, config.redis.port),
        "config loaded"
    );

    let tunables = Arc::new(Tunables::default());
    let bus = EventBus::new();
    let registry = Registry::new();
    let clock = ServerClock::start();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = match stand_server::acceptor::bind(&tunables.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %tunables.bind_addr, error = %e, "could not bind device listener");
            std::process::exit(1);
        }
    };

    let ctx = SessionContext {
        registry: registry.clone(),
        bus: bus.clone(),
        clock,
        tunables: tunables.clone(),
    };

    let (discovery_tx, discovery_rx) = mpsc::channel(4);
    let _dispatcher = Dispatcher::new(registry.clone(), discovery_tx, tunables.ack_timeout);

    let acceptor = tokio::spawn(stand_server::acceptor::run(
        listener,
        ctx,
        shutdown_rx.clone(),
    ));
    let discovery = tokio::spawn(stand_server::discovery::run(
        discovery_rx,
        tunables.discovery_interval,
        shutdown_rx.clone(),
    ));

    // The REST/CLI adapters own `_dispatcher` in a full deployment; the core
    // runs until interrupted.
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => error!(error = %e, "could not listen for ctrl-c"),
    }
    shutdown_tx.send_replace(true);

    let _ = acceptor.await;
    let _ = discovery.await;
    info!("stand-server stopped");
}
