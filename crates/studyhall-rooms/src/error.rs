//! Errors surfaced by the Room Registry.

use thiserror::Error;

/// Errors that can occur during room join/leave transactions.
#[derive(Debug, Error)]
pub enum RoomError {
    /// No room exists with the given id.
    #[error("room not found")]
    NotFound,

    /// The room is at capacity.
    #[error("room is full")]
    RoomFull,

    /// The principal already holds a membership (in this room or another).
    #[error("principal already in a room")]
    AlreadyInRoom,

    /// The room is locked and not accepting new joins.
    #[error("room is locked")]
    RoomLocked,

    /// Leave/force_remove addressed a principal with no membership row.
    #[error("principal is not a member of this room")]
    NotAMember,

    /// An invariant the schema is supposed to guarantee was violated —
    /// occupancy would have gone negative, or a unique-constraint race
    /// slipped past the transaction's own checks. Indicates programmer
    /// error upstream; never silently coerced into a success result.
    #[error("room registry integrity fault: {0}")]
    Integrity(String),

    /// Underlying database operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}
