//! HTTP Surface: room listing, identity creation, and room join/leave.
//!
//! Every handler follows the same shape: extract `Extension<Arc<AppState>>`,
//! validate/rate-limit inline, run the domain call inside `spawn_blocking`
//! against a pooled connection, and map the domain error to an
//! [`crate::error::ApiError`]. No handler here talks to the Event Bus —
//! that is the session gateway's job exclusively; the HTTP surface only
//! ever calls through to the Room Registry directly.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use studyhall_types::{Action, ErrorCode};

use crate::error::{identity_error_to_api, insert_rate_limit_headers, room_error_to_api, ApiError};
use crate::net::client_address;
use crate::AppState;

fn rate_limit_key_for_address(state: &AppState, headers: &HeaderMap, peer: SocketAddr) -> i64 {
    let address = client_address(headers, peer, state.trust_forwarded_for);
    let hashed = studyhall_identity::hash_address(&address, &state.hmac_key);
    studyhall_identity::fold_to_i64(&hashed)
}

/// Runs the coarse-grained `api` rate-limit check, attaching its headers to
/// `headers` regardless of outcome.
fn check_api_rate_limit(
    state: &AppState,
    key: i64,
    headers: &mut HeaderMap,
) -> Result<(), ApiError> {
    let result = state.rate_limiter.check(key, Action::Api);
    insert_rate_limit_headers(headers, 100, result.remaining, result.reset_after);
    if !result.allowed {
        return Err(
            ApiError::new(ErrorCode::RateLimitExceeded, "too many requests")
                .with_retry_after(result.retry_after),
        );
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct RoomSummaryResponse {
    id: i64,
    name: String,
    capacity: i64,
    occupancy: i64,
    is_full: bool,
}

#[derive(Debug, Serialize)]
struct RoomsResponse {
    rooms: Vec<RoomSummaryResponse>,
}

/// `GET /rooms`
pub async fn list_rooms_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let mut response_headers = HeaderMap::new();
    let rate_key = rate_limit_key_for_address(&state, &headers, peer);
    if let Err(err) = check_api_rate_limit(&state, rate_key, &mut response_headers) {
        let mut response = err.into_response();
        response.headers_mut().extend(response_headers);
        return response;
    }

    let pool = state.pool.clone();
    let rooms = match tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(ApiError::internal)?;
        studyhall_rooms::list(&conn).map_err(room_error_to_api)
    })
    .await
    {
        Ok(Ok(rooms)) => rooms,
        Ok(Err(err)) => {
            let mut response = err.into_response();
            response.headers_mut().extend(response_headers);
            return response;
        }
        Err(e) => {
            let mut response = ApiError::internal(e).into_response();
            response.headers_mut().extend(response_headers);
            return response;
        }
    };

    let rooms: Vec<RoomSummaryResponse> = rooms
        .into_iter()
        .map(|r| RoomSummaryResponse {
            id: r.id,
            name: r.name,
            capacity: r.capacity,
            occupancy: r.occupancy,
            is_full: r.is_full,
        })
        .collect();

    let mut response = Json(RoomsResponse { rooms }).into_response();
    response.headers_mut().extend(response_headers);
    response
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    display_name: String,
}

#[derive(Debug, Serialize)]
struct CreateUserResponse {
    user_id: i64,
    display_name: String,
}

/// `POST /users`
pub async fn create_user_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<CreateUserRequest>,
) -> Response {
    let mut response_headers = HeaderMap::new();
    let rate_key = rate_limit_key_for_address(&state, &headers, peer);
    if let Err(err) = check_api_rate_limit(&state, rate_key, &mut response_headers) {
        let mut response = err.into_response();
        response.headers_mut().extend(response_headers);
        return response;
    }

    let identity_result = state.rate_limiter.check(rate_key, Action::IdentityCreate);
    insert_rate_limit_headers(
        &mut response_headers,
        5,
        identity_result.remaining,
        identity_result.reset_after,
    );
    if !identity_result.allowed {
        let err = ApiError::new(ErrorCode::RateLimitExceeded, "too many identity creations")
            .with_retry_after(identity_result.retry_after);
        let mut response = err.into_response();
        response.headers_mut().extend(response_headers);
        return response;
    }

    if let Err(err) = studyhall_identity::validate_display_name(&req.display_name) {
        let mut response = identity_error_to_api(err).into_response();
        response.headers_mut().extend(response_headers);
        return response;
    }

    let address = client_address(&headers, peer, state.trust_forwarded_for);
    let hashed_address = studyhall_identity::hash_address(&address, &state.hmac_key);

    let pool = state.pool.clone();
    let display_name = req.display_name.clone();
    let principal = match tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(ApiError::internal)?;
        studyhall_identity::upsert(&conn, &hashed_address, &display_name)
            .map_err(identity_error_to_api)
    })
    .await
    {
        Ok(Ok(principal)) => principal,
        Ok(Err(err)) => {
            let mut response = err.into_response();
            response.headers_mut().extend(response_headers);
            return response;
        }
        Err(e) => {
            let mut response = ApiError::internal(e).into_response();
            response.headers_mut().extend(response_headers);
            return response;
        }
    };

    let body = CreateUserResponse {
        user_id: principal.id,
        display_name: principal.display_name,
    };
    let mut response = (StatusCode::CREATED, Json(body)).into_response();
    response.headers_mut().extend(response_headers);
    response
}

#[derive(Debug, Deserialize)]
pub struct JoinRoomRequest {
    user_id: i64,
}

#[derive(Debug, Serialize)]
struct JoinRoomResponse {
    room: RoomSummaryResponse,
    participants: Vec<ParticipantResponse>,
}

#[derive(Debug, Serialize)]
struct ParticipantResponse {
    id: i64,
    display_name: String,
    video_on: bool,
    audio_on: bool,
    joined_at: String,
}

/// `POST /rooms/{id}/join`
pub async fn join_room_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(room_id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<JoinRoomRequest>,
) -> Response {
    let mut response_headers = HeaderMap::new();
    let address_key = rate_limit_key_for_address(&state, &headers, peer);
    if let Err(err) = check_api_rate_limit(&state, address_key, &mut response_headers) {
        let mut response = err.into_response();
        response.headers_mut().extend(response_headers);
        return response;
    }

    let join_result = state.rate_limiter.check(req.user_id, Action::JoinAttempt);
    insert_rate_limit_headers(
        &mut response_headers,
        5,
        join_result.remaining,
        join_result.reset_after,
    );
    if !join_result.allowed {
        let err = ApiError::new(ErrorCode::JoinLimitExceeded, "too many join attempts")
            .with_retry_after(join_result.retry_after);
        let mut response = err.into_response();
        response.headers_mut().extend(response_headers);
        return response;
    }

    match state.governor.admit_or_queue(req.user_id) {
        studyhall_abuse::AdmissionOutcome::Admitted => {}
        studyhall_abuse::AdmissionOutcome::Queued(_) => {
            let err = ApiError::new(ErrorCode::SystemAtCapacity, "system is at capacity");
            let mut response = err.into_response();
            response.headers_mut().extend(response_headers);
            return response;
        }
    }

    let pool = state.pool.clone();
    let principal_id = req.user_id;
    let join_outcome = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().map_err(ApiError::internal)?;
        studyhall_rooms::join(&mut conn, principal_id, room_id).map_err(room_error_to_api)
    })
    .await;

    let outcome = match join_outcome {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(err)) => {
            state.governor.on_departure(principal_id);
            let mut response = err.into_response();
            response.headers_mut().extend(response_headers);
            return response;
        }
        Err(e) => {
            state.governor.on_departure(principal_id);
            let mut response = ApiError::internal(e).into_response();
            response.headers_mut().extend(response_headers);
            return response;
        }
    };

    state.bus.publish_lobby(studyhall_realtime::LobbyEvent::OccupancyUpdate {
        room_id,
        occupancy: outcome.occupancy,
    });

    let body = JoinRoomResponse {
        room: RoomSummaryResponse {
            id: outcome.room_id,
            name: outcome.room_name,
            capacity: outcome.capacity,
            occupancy: outcome.occupancy,
            is_full: outcome.is_full,
        },
        participants: outcome
            .participants
            .into_iter()
            .map(|p| ParticipantResponse {
                id: p.principal_id,
                display_name: p.display_name,
                video_on: p.video_on,
                audio_on: p.audio_on,
                joined_at: p.joined_at,
            })
            .collect(),
    };
    let mut response = Json(body).into_response();
    response.headers_mut().extend(response_headers);
    response
}

#[derive(Debug, Deserialize)]
pub struct LeaveRoomRequest {
    user_id: i64,
}

#[derive(Debug, Serialize)]
struct LeaveRoomResponse {
    ok: bool,
}

/// `POST /rooms/{id}/leave`
pub async fn leave_room_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(room_id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<LeaveRoomRequest>,
) -> Response {
    let mut response_headers = HeaderMap::new();
    let address_key = rate_limit_key_for_address(&state, &headers, peer);
    if let Err(err) = check_api_rate_limit(&state, address_key, &mut response_headers) {
        let mut response = err.into_response();
        response.headers_mut().extend(response_headers);
        return response;
    }

    let pool = state.pool.clone();
    let principal_id = req.user_id;
    let leave_outcome = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().map_err(ApiError::internal)?;
        studyhall_rooms::leave(&mut conn, principal_id, room_id).map_err(room_error_to_api)
    })
    .await;

    let outcome = match leave_outcome {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(err)) => {
            let mut response = err.into_response();
            response.headers_mut().extend(response_headers);
            return response;
        }
        Err(e) => {
            let mut response = ApiError::internal(e).into_response();
            response.headers_mut().extend(response_headers);
            return response;
        }
    };

    state.governor.on_departure(principal_id);
    state.bus.publish_lobby(studyhall_realtime::LobbyEvent::OccupancyUpdate {
        room_id,
        occupancy: outcome.occupancy,
    });
    let slow_consumers = state.bus.publish_room(
        room_id,
        studyhall_realtime::RoomEvent::UserLeft {
            principal_id,
            occupancy: outcome.occupancy,
        },
    );
    for subscriber_id in slow_consumers {
        tracing::warn!(room_id, subscriber_id, "slow consumer dropped during HTTP leave fan-out");
    }

    let mut response = Json(LeaveRoomResponse { ok: true }).into_response();
    response.headers_mut().extend(response_headers);
    response
}
