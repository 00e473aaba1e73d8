//! Background maintenance tasks run alongside the HTTP/WebSocket server.
//!
//! The idle-eviction sweep disables outright when the threshold is zero,
//! otherwise loops forever, sleeping for a fraction of the threshold
//! between sweeps.

use std::time::Duration;

use studyhall_db::DbPool;
use tokio::time::sleep;

/// Runs forever, periodically evicting principals idle longer than
/// `idle_timeout` that hold no current room membership.
///
/// The sweep interval is half the idle timeout, clamped to `[1s, 60s]`, so a
/// short configured timeout is swept eagerly without spinning a tight loop.
pub async fn start_idle_eviction_task(pool: DbPool, idle_timeout: Duration) {
    if idle_timeout.is_zero() {
        tracing::warn!("idle principal eviction disabled (server.idle_timeout_secs=0)");
        return;
    }

    let interval = (idle_timeout / 2).clamp(Duration::from_secs(1), Duration::from_secs(60));
    tracing::info!(
        idle_timeout_secs = idle_timeout.as_secs(),
        interval_secs = interval.as_secs(),
        "starting idle principal eviction task"
    );

    loop {
        sleep(interval).await;

        let pool = pool.clone();
        let idle_secs = idle_timeout.as_secs() as i64;
        let result = tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| e.to_string())?;
            studyhall_identity::evict_idle(&conn, idle_secs).map_err(|e| e.to_string())
        })
        .await;

        match result {
            Ok(Ok(count)) if count > 0 => tracing::info!(count, "evicted idle principals"),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "failed to evict idle principals"),
            Err(e) => tracing::error!(error = %e, "idle eviction task panicked"),
        }
    }
}
