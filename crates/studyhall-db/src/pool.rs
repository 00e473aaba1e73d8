//! Connection pool creation and configuration.

use std::sync::atomic::{AtomicU64, Ordering};

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use thiserror::Error;

static MEMORY_DB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A type alias for the SQLite connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Errors that can occur when creating the database pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Failed to build the connection pool.
    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[from] r2d2::Error),
}

/// Creates a new SQLite connection pool with WAL mode and foreign keys enabled.
///
/// # Arguments
///
/// * `db_path` - Path to the SQLite database file. Use `:memory:` for an
///   in-memory database (useful for testing).
/// * `max_size` - Maximum number of pooled connections.
/// * `busy_timeout_ms` - How long a connection waits on `SQLITE_BUSY` before
///   giving up.
///
/// # Errors
///
/// Returns `PoolError::PoolInit` if the connection pool cannot be created.
pub fn create_pool(db_path: &str, max_size: u32, busy_timeout_ms: u64) -> Result<DbPool, PoolError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX
        | OpenFlags::SQLITE_OPEN_URI;

    // A bare ":memory:" gives every pooled connection its own private
    // database, so a second checked-out connection would never see what the
    // first one wrote. Rewrite it to a uniquely named, shared-cache URI so
    // every connection drawn from this pool sees the same in-memory
    // database, while distinct calls to `create_pool(":memory:", ...)` (as
    // happen across independently run tests) don't collide with each other.
    let db_path = if db_path == ":memory:" {
        let id = MEMORY_DB_COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("file:studyhall-in-memory-{id}?mode=memory&cache=shared")
    } else {
        db_path.to_string()
    };

    let manager = SqliteConnectionManager::file(&db_path)
        .with_flags(flags)
        .with_init(move |conn| {
            conn.execute_batch(&format!(
                "PRAGMA journal_mode = WAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = {busy_timeout_ms};"
            ))
        });

    let pool = Pool::builder().max_size(max_size).build(manager)?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_in_memory_pool() {
        let pool = create_pool(":memory:", 8, 5000).expect("pool creation should succeed");
        let conn = pool.get().expect("should get a connection");

        let mode: String = conn
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .expect("should query journal_mode");
        // In-memory databases may report "memory" instead of "wal"
        assert!(
            mode == "wal" || mode == "memory",
            "unexpected journal_mode: {mode}"
        );

        let fk: i32 = conn
            .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
            .expect("should query foreign_keys");
        assert_eq!(fk, 1, "foreign keys should be enabled");
    }
}
