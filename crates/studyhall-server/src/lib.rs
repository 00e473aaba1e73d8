//! Studyhall server library: HTTP Surface and Session Gateway wiring.
//!
//! Ties together the lower Studyhall crates — identity, rooms, chat, abuse
//! control, and the event bus — behind a single shared [`AppState`] and an
//! axum [`Router`].

pub mod api;
pub mod background;
pub mod config;
pub mod error;
pub mod gateway;
pub mod net;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use serde_json::{json, Value};
use studyhall_abuse::{ConnectionGovernor, RateLimitEngine};
use studyhall_db::DbPool;
use studyhall_realtime::EventBus;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across every request handler and gateway
/// connection.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Keyed HMAC used to hash client addresses into principal identities.
    pub hmac_key: Arc<Vec<u8>>,
    /// Rate Limit Engine, shared process-wide.
    pub rate_limiter: Arc<RateLimitEngine>,
    /// Connection Governor, shared process-wide.
    pub governor: Arc<ConnectionGovernor>,
    /// Event Bus, shared process-wide.
    pub bus: Arc<EventBus>,
    /// Default number of chat records a `chat-history` replay carries.
    pub chat_history_limit: u32,
    /// Whether to trust `X-Forwarded-For` over the direct peer address.
    pub trust_forwarded_for: bool,
    /// Interval between health pings sent to each open gateway connection.
    pub ping_interval: Duration,
    /// Fired once, server-wide, when graceful shutdown begins. Every bound
    /// gateway connection subscribes and reacts by emitting `error
    /// {SERVER_SHUTDOWN}` and tearing its membership down.
    pub shutdown_tx: broadcast::Sender<()>,
}

/// Maximum request body size (64 KiB). Studyhall's bodies are small JSON
/// payloads; this only guards against an oversized or malformed request.
const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all HTTP and WebSocket routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/rooms", get(api::list_rooms_handler))
        .route("/users", post(api::create_user_handler))
        .route("/rooms/{id}/join", post(api::join_room_handler))
        .route("/rooms/{id}/leave", post(api::leave_room_handler))
        .route("/room/{id}", get(gateway::ws_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
