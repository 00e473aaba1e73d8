//! Shared test harness: spins up a real Studyhall server on an in-memory,
//! shared-cache SQLite database and returns its bound address.
//!
//! The `file:memdb{uuid}?mode=memory&cache=shared` URI is the only way a
//! `spawn_blocking`-pooled connection and the test's own assertion
//! connection can see the same in-memory database.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use studyhall_abuse::{ConnectionGovernor, RateLimitEngine};
use studyhall_db::DbPool;
use studyhall_realtime::EventBus;
use studyhall_server::{app, AppState};
use tokio::net::TcpListener;

pub const ROOM_CAPACITY: i64 = 2;
pub const ROOM_COUNT: u32 = 3;

/// Test-only system capacity and ping interval, overridable per test via
/// [`spawn_test_server_with`].
pub struct TestServerConfig {
    pub system_capacity: usize,
    pub ping_interval: Duration,
    pub chat_history_limit: u32,
    pub max_missed_pings: u32,
}

impl Default for TestServerConfig {
    fn default() -> Self {
        Self {
            system_capacity: 100,
            ping_interval: Duration::from_secs(300),
            chat_history_limit: 50,
            max_missed_pings: 3,
        }
    }
}

pub async fn spawn_test_server() -> (SocketAddr, DbPool) {
    spawn_test_server_with(TestServerConfig::default()).await
}

pub async fn spawn_test_server_with(cfg: TestServerConfig) -> (SocketAddr, DbPool) {
    let db_name = format!(
        "file:memdb{}?mode=memory&cache=shared",
        uuid::Uuid::new_v4().simple()
    );
    let pool = studyhall_db::create_pool(&db_name, 8, 5_000).expect("failed to create pool");

    {
        let conn = pool.get().unwrap();
        studyhall_db::run_migrations(&conn).unwrap();
        studyhall_rooms::ensure_rooms(&conn, ROOM_COUNT, ROOM_CAPACITY).unwrap();
    }

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let state = AppState {
        pool: pool.clone(),
        hmac_key: Arc::new(vec![0u8; 32]),
        rate_limiter: Arc::new(RateLimitEngine::new()),
        governor: Arc::new(ConnectionGovernor::with_max_missed_pings(
            cfg.system_capacity,
            cfg.max_missed_pings,
        )),
        bus: Arc::new(EventBus::new()),
        chat_history_limit: cfg.chat_history_limit,
        trust_forwarded_for: false,
        ping_interval: cfg.ping_interval,
        shutdown_tx,
    };

    let router = app(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (addr, pool)
}

/// Creates an anonymous user via `POST /users` and returns its `user_id`.
pub async fn create_user(client: &reqwest::Client, addr: SocketAddr, display_name: &str) -> i64 {
    let resp = create_user_response(client, addr, display_name).await;
    assert_eq!(resp.status(), 201, "create_user did not return 201");
    let body: serde_json::Value = resp.json().await.unwrap();
    body["user_id"].as_i64().expect("missing user_id")
}

/// Like [`create_user`] but hands back the raw response, for tests that need
/// to inspect the sanitized `display_name` or a non-200 status.
pub async fn create_user_response(
    client: &reqwest::Client,
    addr: SocketAddr,
    display_name: &str,
) -> reqwest::Response {
    client
        .post(format!("http://{addr}/users"))
        .json(&serde_json::json!({ "display_name": display_name }))
        .send()
        .await
        .expect("POST /users failed")
}

/// `POST /rooms/{room_id}/join`, returning the raw response so callers can
/// assert on success or on a particular 409 variant.
pub async fn join_room(
    client: &reqwest::Client,
    addr: SocketAddr,
    room_id: i64,
    user_id: i64,
) -> reqwest::Response {
    client
        .post(format!("http://{addr}/rooms/{room_id}/join"))
        .json(&serde_json::json!({ "user_id": user_id }))
        .send()
        .await
        .expect("POST join failed")
}
