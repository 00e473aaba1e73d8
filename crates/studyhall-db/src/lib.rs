//! Database layer for the Studyhall platform.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! and embedded SQL migrations. Every table backing a Studyhall entity is
//! created through a versioned migration managed by this crate.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: a single-process store is sufficient for one
//!   room server; WAL mode allows concurrent readers alongside the single
//!   writer each join/leave transaction needs.
//! - **`r2d2` connection pool**: bounded connection reuse without manual
//!   lifetime management, shared by every blocking-task handler.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!` so migrations ship with the code that depends on them
//!   and cannot drift out of sync with it.

mod migrations;
mod pool;

pub use migrations::run_migrations;
pub use pool::{create_pool, DbPool, PoolError};
