//! Error response shaping for the HTTP surface and the session gateway.
//!
//! Every error surfaced to a client carries one of the canonical
//! `studyhall_types::ErrorCode` values; this module is the single place that
//! maps a code to an HTTP status and to the headers the HTTP API requires.

use std::time::Duration;

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use studyhall_types::ErrorCode;

/// An error ready to be rendered as an HTTP response body.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        tracing::error!(error = %err, "internal error");
        Self::new(ErrorCode::Internal, "internal error")
    }
}

pub fn status_for_code(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::InvalidDisplayName | ErrorCode::InvalidMessage | ErrorCode::MaliciousInput => {
            StatusCode::BAD_REQUEST
        }
        ErrorCode::RoomNotFound => StatusCode::NOT_FOUND,
        ErrorCode::RoomFull | ErrorCode::AlreadyInRoom | ErrorCode::RoomLocked => {
            StatusCode::CONFLICT
        }
        ErrorCode::SystemAtCapacity => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::RateLimitExceeded
        | ErrorCode::JoinLimitExceeded
        | ErrorCode::ChatRateLimitExceeded
        | ErrorCode::TooManyConnections
        | ErrorCode::ReconnectionThrottled => StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::ConnectionTimeout | ErrorCode::SlowConsumer | ErrorCode::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for_code(self.code);
        let mut body = json!({
            "error": {
                "code": self.code.as_str(),
                "message": self.message,
            }
        });
        if let Some(retry_after) = self.retry_after {
            body["error"]["retry_after"] = json!(retry_after.as_secs());
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(retry_after) = self.retry_after {
            if let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}

/// Attaches `X-RateLimit-*` headers, required on every HTTP response.
pub fn insert_rate_limit_headers(
    headers: &mut HeaderMap,
    limit: u32,
    remaining: u32,
    reset_after: Duration,
) {
    if let Ok(v) = HeaderValue::from_str(&limit.to_string()) {
        headers.insert("X-RateLimit-Limit", v);
    }
    if let Ok(v) = HeaderValue::from_str(&remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", v);
    }
    if let Ok(v) = HeaderValue::from_str(&reset_after.as_secs().to_string()) {
        headers.insert("X-RateLimit-Reset", v);
    }
}

pub fn room_error_to_api(e: studyhall_rooms::RoomError) -> ApiError {
    use studyhall_rooms::RoomError;
    match e {
        RoomError::NotFound => ApiError::new(ErrorCode::RoomNotFound, "room not found"),
        RoomError::RoomFull => ApiError::new(ErrorCode::RoomFull, "room is full"),
        RoomError::AlreadyInRoom => ApiError::new(ErrorCode::AlreadyInRoom, "already in a room"),
        RoomError::RoomLocked => ApiError::new(ErrorCode::RoomLocked, "room is locked"),
        RoomError::NotAMember => ApiError::new(ErrorCode::RoomNotFound, "not a member of this room"),
        RoomError::Integrity(ref msg) => ApiError::internal(msg),
        RoomError::Database(ref err) => ApiError::internal(err),
    }
}

pub fn identity_error_to_api(e: studyhall_identity::IdentityError) -> ApiError {
    use studyhall_identity::IdentityError;
    match e {
        IdentityError::InvalidDisplayName => {
            ApiError::new(ErrorCode::InvalidDisplayName, "invalid display name")
        }
        IdentityError::InvalidMessage => ApiError::new(ErrorCode::InvalidMessage, "invalid message"),
        IdentityError::MaliciousInput => {
            ApiError::new(ErrorCode::MaliciousInput, "malicious input rejected")
        }
        IdentityError::Database(ref err) => ApiError::internal(err),
    }
}

pub fn chat_error_to_api(e: studyhall_chat::ChatError) -> ApiError {
    use studyhall_chat::ChatError;
    match e {
        ChatError::RoomNotFound => ApiError::new(ErrorCode::RoomNotFound, "room not found"),
        ChatError::Database(ref err) => ApiError::internal(err),
    }
}
