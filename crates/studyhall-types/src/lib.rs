//! Shared types and constants for the Studyhall platform.
//!
//! This crate provides the cross-cutting type definitions used across all
//! Studyhall crates: the canonical error-code vocabulary shared by the HTTP
//! and WebSocket surfaces, and the rate-limited action enum the abuse
//! control layer keys its counters on.
//!
//! No crate in the workspace depends on anything *except* `studyhall-types`
//! for cross-cutting type definitions. This keeps the dependency graph
//! acyclic and prevents higher crates from reaching back into lower ones.

use serde::{Deserialize, Serialize};

/// The canonical set of error codes surfaced to clients, over both HTTP and
/// the WebSocket protocol.
///
/// Serializes to the exact `SCREAMING_SNAKE_CASE` strings the wire protocol
/// names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidDisplayName,
    InvalidMessage,
    MaliciousInput,
    RateLimitExceeded,
    JoinLimitExceeded,
    ChatRateLimitExceeded,
    RoomNotFound,
    RoomFull,
    AlreadyInRoom,
    RoomLocked,
    TooManyConnections,
    ReconnectionThrottled,
    ConnectionTimeout,
    SystemAtCapacity,
    SlowConsumer,
    Internal,
}

impl ErrorCode {
    /// Returns the wire string for this error code (e.g. `"ROOM_FULL"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidDisplayName => "INVALID_DISPLAY_NAME",
            Self::InvalidMessage => "INVALID_MESSAGE",
            Self::MaliciousInput => "MALICIOUS_INPUT",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::JoinLimitExceeded => "JOIN_LIMIT_EXCEEDED",
            Self::ChatRateLimitExceeded => "CHAT_RATE_LIMIT_EXCEEDED",
            Self::RoomNotFound => "ROOM_NOT_FOUND",
            Self::RoomFull => "ROOM_FULL",
            Self::AlreadyInRoom => "ALREADY_IN_ROOM",
            Self::RoomLocked => "ROOM_LOCKED",
            Self::TooManyConnections => "TOO_MANY_CONNECTIONS",
            Self::ReconnectionThrottled => "RECONNECTION_THROTTLED",
            Self::ConnectionTimeout => "CONNECTION_TIMEOUT",
            Self::SystemAtCapacity => "SYSTEM_AT_CAPACITY",
            Self::SlowConsumer => "SLOW_CONSUMER",
            Self::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rate-limited action, keyed independently by the Rate Limit Engine.
///
/// Each variant has its own (limit, window, block-on-exceed) policy — see
/// `studyhall_abuse::rate_limit::policy_for`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Any HTTP request to the surface (coarse-grained per-principal/IP cap).
    Api,
    /// `POST /users`.
    IdentityCreate,
    /// `POST /rooms/{id}/join`.
    JoinAttempt,
    /// `send-message` over the session gateway.
    ChatSend,
}

impl Action {
    /// The wire string used in `rate-limit-exceeded` frames.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::IdentityCreate => "identity_create",
            Self::JoinAttempt => "join_attempt",
            Self::ChatSend => "chat_send",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
