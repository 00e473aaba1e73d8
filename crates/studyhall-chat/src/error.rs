//! Errors surfaced by the Message Journal.

use thiserror::Error;

/// Errors that can occur while appending to or reading a room's chat log.
#[derive(Debug, Error)]
pub enum ChatError {
    /// No room exists with the given id.
    #[error("room not found")]
    RoomNotFound,

    /// Underlying database operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}
