//! Errors surfaced by the Connection Governor.

use std::time::Duration;
use thiserror::Error;

/// Errors a handshake attempt or an established connection can run into.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionError {
    /// The principal already holds the maximum of 2 open connections.
    #[error("too many connections")]
    TooManyConnections,

    /// The principal closed 3+ connections within the last 10 seconds and
    /// must wait out an exponential backoff before reconnecting.
    #[error("reconnection throttled, retry after {0:?}")]
    ReconnectionThrottled(Duration),

    /// Three consecutive pings went unanswered.
    #[error("connection timed out")]
    ConnectionTimeout,
}
