//! Abuse control: the Rate Limit Engine and the Connection Governor.
//!
//! Both are in-memory, process-local, and shared behind a single handle per
//! server instance — neither persists to the database, keeping hot-path
//! abuse-control state out of SQLite entirely.

mod connections;
mod error;
mod rate_limit;

pub use connections::{AdmissionOutcome, ConnectionGovernor, ConnectionId};
pub use error::ConnectionError;
pub use rate_limit::{CheckResult, RateLimitEngine};
