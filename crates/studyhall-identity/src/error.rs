//! Errors surfaced by the identity plane.

use thiserror::Error;

/// Errors that can occur while validating input or operating the identity store.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Display name was empty (after trimming) or exceeded 50 code points.
    #[error("invalid display name")]
    InvalidDisplayName,

    /// Message content was empty (after trimming) or exceeded 1000 code points.
    #[error("invalid message")]
    InvalidMessage,

    /// Input matched a recognized SQL-injection probe and was rejected outright
    /// rather than sanitized.
    #[error("malicious input rejected")]
    MaliciousInput,

    /// Underlying database operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}
