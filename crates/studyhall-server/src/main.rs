//! Studyhall server binary — the main entry point for the ephemeral
//! study-room platform.
//!
//! Loads configuration, wires the database pool and migrations, seeds the
//! fixed room roster, starts the idle-principal eviction background task,
//! and serves the HTTP + WebSocket surface with graceful shutdown on
//! SIGTERM/SIGINT.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use studyhall_abuse::{ConnectionGovernor, RateLimitEngine};
use studyhall_realtime::EventBus;
use studyhall_server::{app, background, config, net, AppState};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = config::load_config(Some("config.toml"))
        .expect("failed to load configuration — the server cannot start without valid config");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let pool = studyhall_db::create_pool(
        &config.database.path,
        config.database.pool_max_size,
        config.database.busy_timeout_ms,
    )
    .expect("failed to create database pool — check database.path in config");

    {
        let conn = pool
            .get()
            .expect("failed to get database connection for migrations");
        let applied = studyhall_db::run_migrations(&conn).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }

        let seeded = studyhall_rooms::ensure_rooms(&conn, config.rooms.count, config.rooms.capacity)
            .expect("failed to seed the fixed room roster");
        if seeded > 0 {
            tracing::info!(count = seeded, "seeded fixed room roster");
        }
    }

    let hmac_key = Arc::new(net::load_hmac_key(config.identity.hmac_key.as_deref()));
    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    let state = AppState {
        pool: pool.clone(),
        hmac_key,
        rate_limiter: Arc::new(RateLimitEngine::new()),
        governor: Arc::new(ConnectionGovernor::with_max_missed_pings(
            config.rooms.system_capacity,
            config.server.ping_max_missed,
        )),
        bus: Arc::new(EventBus::new()),
        chat_history_limit: config.chat.history_limit,
        trust_forwarded_for: config.identity.trust_forwarded_for,
        ping_interval: Duration::from_secs(config.server.ping_interval_secs),
        shutdown_tx: shutdown_tx.clone(),
    };

    tokio::spawn(background::start_idle_eviction_task(
        pool,
        Duration::from_secs(config.server.idle_timeout_secs.max(0) as u64),
    ));

    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting studyhall server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address — is another process using this port?");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown_tx))
    .await
    .expect("server error");

    tracing::info!("studyhall server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal, then fires `shutdown_tx`
/// so every bound gateway connection emits `error {SERVER_SHUTDOWN}` and
/// force-removes its own membership before axum stops waiting on in-flight
/// connection futures.
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }

    let _ = shutdown_tx.send(());
}
