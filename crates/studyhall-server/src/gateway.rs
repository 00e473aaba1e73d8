//! Session Gateway — the WebSocket endpoint at `/room/{id}` binding one
//! live connection to a (principal, room) pair for the lifetime of the
//! socket.
//!
//! An axum `WebSocketUpgrade` hands off to a `socket.split()` into
//! independent halves, a single outbound `mpsc` channel drained by one task
//! that owns the sink, and a receive loop matching on a tagged JSON enum.
//! On top of that sits the connection lifecycle: handshake against the
//! Connection Governor and Room Registry, admission queueing, ping/pong
//! health, and ordered teardown.
//!
//! Every inbound frame after the handshake runs through the Rate Limit
//! Engine when the protocol defines an action for it (`send-message` is the
//! only one; `leave`/`toggle-*`/`pong` are not rate-limited, matching the
//! four-action [`Action`] enum). Every authored action touches the
//! Identity Store's `last_active_at` so a principal mid-conversation is
//! never evicted as idle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        ConnectInfo, Path, WebSocketUpgrade,
    },
    response::IntoResponse,
    Extension,
};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, timeout, MissedTickBehavior};

use studyhall_abuse::{AdmissionOutcome, ConnectionError};
use studyhall_chat::ChatRecord;
use studyhall_identity::IdentityError;
use studyhall_realtime::{LobbyEvent, RoomEvent, QUEUE_CAPACITY};
use studyhall_rooms::{MediaKind, Participant};
use studyhall_types::{Action, ErrorCode};

use crate::error::{chat_error_to_api, room_error_to_api, ApiError};
use crate::AppState;

/// How long the gateway waits for the handshake's `join` frame before
/// giving up on a connection that never introduces itself.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Cadence at which a queued connection is re-polled for admission and
/// sent a fresh `queue-position` frame. The protocol leaves this
/// implementation-defined.
const QUEUE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Frames a connected client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClientFrame {
    #[serde(rename = "join")]
    Join { user_id: i64, display_name: String },
    #[serde(rename = "leave")]
    Leave { user_id: i64 },
    #[serde(rename = "send-message")]
    SendMessage { user_id: i64, content: String },
    #[serde(rename = "toggle-video")]
    ToggleVideo { user_id: i64, enabled: bool },
    #[serde(rename = "toggle-audio")]
    ToggleAudio { user_id: i64, enabled: bool },
    #[serde(rename = "pong")]
    Pong,
}

/// Frames the server pushes to a connected client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum ServerFrame {
    #[serde(rename = "user-joined")]
    UserJoined {
        principal_id: i64,
        display_name: String,
        joined_at: String,
        occupancy: i64,
    },
    #[serde(rename = "user-left")]
    UserLeft { principal_id: i64, occupancy: i64 },
    #[serde(rename = "new-message")]
    NewMessage {
        chat_record_id: i64,
        principal_id: i64,
        display_name: String,
        content: String,
        created_at: String,
    },
    #[serde(rename = "chat-history")]
    ChatHistory { records: Vec<ChatHistoryRecord> },
    #[serde(rename = "participant-video-toggle")]
    ParticipantVideoToggle { principal_id: i64, enabled: bool },
    #[serde(rename = "participant-audio-toggle")]
    ParticipantAudioToggle { principal_id: i64, enabled: bool },
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "error")]
    Error {
        code: &'static str,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after: Option<u64>,
    },
    #[serde(rename = "rate-limit-exceeded")]
    RateLimitExceeded { action: &'static str, reset_at: u64 },
    #[serde(rename = "queue-position")]
    QueuePosition { position: usize },
}

#[derive(Debug, Clone, Serialize)]
struct ChatHistoryRecord {
    id: i64,
    principal_id: i64,
    content: String,
    created_at: String,
}

impl From<ChatRecord> for ChatHistoryRecord {
    fn from(r: ChatRecord) -> Self {
        Self {
            id: r.id,
            principal_id: r.principal_id,
            content: r.content,
            created_at: r.created_at,
        }
    }
}

fn room_event_to_frame(event: RoomEvent) -> ServerFrame {
    match event {
        RoomEvent::UserJoined { principal_id, display_name, joined_at, occupancy } => {
            ServerFrame::UserJoined { principal_id, display_name, joined_at, occupancy }
        }
        RoomEvent::UserLeft { principal_id, occupancy } => {
            ServerFrame::UserLeft { principal_id, occupancy }
        }
        RoomEvent::NewMessage { chat_record_id, principal_id, display_name, content, created_at } => {
            ServerFrame::NewMessage { chat_record_id, principal_id, display_name, content, created_at }
        }
        RoomEvent::VideoToggle { principal_id, enabled } => {
            ServerFrame::ParticipantVideoToggle { principal_id, enabled }
        }
        RoomEvent::AudioToggle { principal_id, enabled } => {
            ServerFrame::ParticipantAudioToggle { principal_id, enabled }
        }
        RoomEvent::ChatHistory(records) => ServerFrame::ChatHistory {
            records: records.into_iter().map(Into::into).collect(),
        },
    }
}

fn connection_error_frame(err: ConnectionError) -> ServerFrame {
    match err {
        ConnectionError::TooManyConnections => ServerFrame::Error {
            code: ErrorCode::TooManyConnections.as_str(),
            message: "too many open connections for this user".to_string(),
            retry_after: None,
        },
        ConnectionError::ReconnectionThrottled(d) => ServerFrame::Error {
            code: ErrorCode::ReconnectionThrottled.as_str(),
            message: "reconnecting too quickly, back off before retrying".to_string(),
            retry_after: Some(d.as_secs()),
        },
        ConnectionError::ConnectionTimeout => ServerFrame::Error {
            code: ErrorCode::ConnectionTimeout.as_str(),
            message: "connection timed out".to_string(),
            retry_after: None,
        },
    }
}

fn api_error_frame(e: ApiError) -> ServerFrame {
    ServerFrame::Error {
        code: e.code.as_str(),
        message: e.message,
        retry_after: e.retry_after.map(|d| d.as_secs()),
    }
}

fn reset_at_epoch_secs(retry_after: Duration) -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        .saturating_add(retry_after.as_secs())
}

async fn send_frame<S>(sink: &mut S, frame: &ServerFrame) -> bool
where
    S: Sink<WsMessage> + Unpin,
{
    let text = serde_json::to_string(frame).unwrap_or_else(|_| "{}".to_string());
    sink.send(WsMessage::Text(text.into())).await.is_ok()
}

pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(_peer): ConnectInfo<SocketAddr>,
    Path(room_id): Path<i64>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, room_id))
}

/// Outcome of binding a connection to a room: either a fresh [`studyhall_rooms::join`]
/// or a reconnect onto a membership the principal already held.
struct BoundRoom {
    joined_at: String,
    existing_participants: Vec<Participant>,
    fresh_join: bool,
}

async fn bind_room(
    state: &Arc<AppState>,
    principal_id: i64,
    room_id: i64,
) -> Result<BoundRoom, ApiError> {
    let pool = state.pool.clone();
    tokio::task::spawn_blocking(move || -> Result<BoundRoom, ApiError> {
        let mut conn = pool.get().map_err(ApiError::internal)?;
        match studyhall_rooms::current_membership_room(&conn, principal_id)
            .map_err(room_error_to_api)?
        {
            Some(existing_room_id) if existing_room_id == room_id => {
                let (_occupancy, participants) =
                    studyhall_rooms::snapshot(&conn, room_id).map_err(room_error_to_api)?;
                let joined_at = participants
                    .iter()
                    .find(|p| p.principal_id == principal_id)
                    .map(|p| p.joined_at.clone())
                    .unwrap_or_default();
                Ok(BoundRoom { joined_at, existing_participants: participants, fresh_join: false })
            }
            Some(_other_room) => {
                Err(ApiError::new(ErrorCode::AlreadyInRoom, "already in a room"))
            }
            None => {
                let outcome =
                    studyhall_rooms::join(&mut conn, principal_id, room_id).map_err(room_error_to_api)?;
                Ok(BoundRoom {
                    joined_at: outcome.joined_at,
                    existing_participants: outcome.participants,
                    fresh_join: true,
                })
            }
        }
    })
    .await
    .unwrap_or_else(|e| Err(ApiError::internal(e)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, room_id: i64) {
    let (mut sender, mut receiver) = socket.split();

    // --- Handshake: the first frame must be `join`. ---
    let first_text = match timeout(HANDSHAKE_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(WsMessage::Text(text)))) => text,
        _ => {
            send_frame(
                &mut sender,
                &ServerFrame::Error {
                    code: ErrorCode::Internal.as_str(),
                    message: "expected a join frame".to_string(),
                    retry_after: None,
                },
            )
            .await;
            return;
        }
    };

    let principal_id = match serde_json::from_str::<ClientFrame>(&first_text) {
        Ok(ClientFrame::Join { user_id, .. }) => user_id,
        _ => {
            send_frame(
                &mut sender,
                &ServerFrame::Error {
                    code: ErrorCode::Internal.as_str(),
                    message: "expected a join frame".to_string(),
                    retry_after: None,
                },
            )
            .await;
            return;
        }
    };

    let pool = state.pool.clone();
    let principal = match tokio::task::spawn_blocking(move || {
        let conn = pool.get().ok()?;
        studyhall_identity::get_by_id(&conn, principal_id).ok().flatten()
    })
    .await
    {
        Ok(Some(p)) => p,
        _ => {
            send_frame(
                &mut sender,
                &ServerFrame::Error {
                    code: ErrorCode::Internal.as_str(),
                    message: "unknown user_id".to_string(),
                    retry_after: None,
                },
            )
            .await;
            return;
        }
    };

    let join_check = state.rate_limiter.check(principal_id, Action::JoinAttempt);
    if !join_check.allowed {
        send_frame(
            &mut sender,
            &ServerFrame::RateLimitExceeded {
                action: Action::JoinAttempt.as_str(),
                reset_at: reset_at_epoch_secs(join_check.reset_after),
            },
        )
        .await;
        return;
    }

    let conn_id = match state.governor.open_connection(principal_id) {
        Ok(id) => id,
        Err(err) => {
            send_frame(&mut sender, &connection_error_frame(err)).await;
            return;
        }
    };

    // --- System-wide admission queue. ---
    loop {
        match state.governor.admit_or_queue(principal_id) {
            AdmissionOutcome::Admitted => break,
            AdmissionOutcome::Queued(position) => {
                send_frame(
                    &mut sender,
                    &ServerFrame::Error {
                        code: ErrorCode::SystemAtCapacity.as_str(),
                        message: "system is at capacity".to_string(),
                        retry_after: None,
                    },
                )
                .await;
                send_frame(&mut sender, &ServerFrame::QueuePosition { position }).await;

                tokio::select! {
                    _ = tokio::time::sleep(QUEUE_POLL_INTERVAL) => continue,
                    msg = receiver.next() => match msg {
                        Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => {
                            state.governor.close_connection(principal_id, conn_id);
                            return;
                        }
                        _ => continue,
                    }
                }
            }
        }
    }

    // --- Bind to the room: fresh join, or reconnect onto an existing membership. ---
    let bound = match bind_room(&state, principal_id, room_id).await {
        Ok(bound) => bound,
        Err(err) => {
            send_frame(&mut sender, &api_error_frame(err)).await;
            state.governor.on_departure(principal_id);
            state.governor.close_connection(principal_id, conn_id);
            return;
        }
    };

    let (sub_id, mut room_rx) = state.bus.subscribe_room(room_id);

    let history_pool = state.pool.clone();
    let history_limit = state.chat_history_limit;
    let history = tokio::task::spawn_blocking(move || {
        let conn = history_pool.get().map_err(ApiError::internal)?;
        studyhall_chat::history(&conn, room_id, Some(history_limit)).map_err(chat_error_to_api)
    })
    .await
    .unwrap_or_else(|e| Err(ApiError::internal(e)));

    match history {
        Ok(records) => {
            send_frame(
                &mut sender,
                &ServerFrame::ChatHistory { records: records.into_iter().map(Into::into).collect() },
            )
            .await;
        }
        Err(err) => {
            tracing::warn!(room_id, principal_id, error = ?err, "failed to load chat history");
        }
    }

    for participant in bound.existing_participants.iter().filter(|p| p.principal_id != principal_id) {
        send_frame(
            &mut sender,
            &ServerFrame::UserJoined {
                principal_id: participant.principal_id,
                display_name: participant.display_name.clone(),
                joined_at: participant.joined_at.clone(),
                occupancy: bound.existing_participants.len() as i64,
            },
        )
        .await;
    }

    // --- Single outbound channel: every task that wants to speak to this
    // client sends a `ServerFrame` here; one task owns the socket sink. ---
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerFrame>(QUEUE_CAPACITY);

    if bound.fresh_join {
        let occupancy = bound.existing_participants.len() as i64;
        state.bus.publish_lobby(LobbyEvent::OccupancyUpdate { room_id, occupancy });
        let slow = state.bus.publish_room(
            room_id,
            RoomEvent::UserJoined {
                principal_id,
                display_name: principal.display_name.clone(),
                joined_at: bound.joined_at.clone(),
                occupancy,
            },
        );
        for s in slow {
            tracing::warn!(room_id, subscriber_id = s, "slow consumer dropped during join fan-out");
        }
    }

    let send_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if !send_frame(&mut sender, &frame).await {
                break;
            }
        }
    });

    let room_forward_task = tokio::spawn({
        let outbound_tx = outbound_tx.clone();
        async move {
            while let Some(event) = room_rx.recv().await {
                if outbound_tx.send(room_event_to_frame(event)).await.is_err() {
                    break;
                }
            }
        }
    });

    let (timeout_tx, mut timeout_rx) = oneshot::channel::<()>();
    let ping_task = tokio::spawn({
        let outbound_tx = outbound_tx.clone();
        let governor = Arc::clone(&state.governor);
        let ping_interval = state.ping_interval;
        async move {
            let mut ticker = interval(ping_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // the first tick fires immediately; skip it
            let mut timeout_tx = Some(timeout_tx);
            loop {
                ticker.tick().await;
                if outbound_tx.send(ServerFrame::Ping).await.is_err() {
                    break;
                }
                if governor.record_missed_ping(conn_id).is_err() {
                    let _ = outbound_tx
                        .send(ServerFrame::Error {
                            code: ErrorCode::ConnectionTimeout.as_str(),
                            message: "ping timeout".to_string(),
                            retry_after: None,
                        })
                        .await;
                    if let Some(tx) = timeout_tx.take() {
                        let _ = tx.send(());
                    }
                    break;
                }
            }
        }
    });

    // --- Receive loop: handle inbound frames until disconnect, leave, timeout,
    // or server shutdown. ---
    let mut shutdown_rx = state.shutdown_tx.subscribe();
    let mut left_cleanly = false;
    loop {
        tokio::select! {
            _ = &mut timeout_rx => {
                break;
            }
            _ = shutdown_rx.recv() => {
                let _ = outbound_tx.send(ServerFrame::Error {
                    code: "SERVER_SHUTDOWN",
                    message: "server is shutting down".to_string(),
                    retry_after: None,
                }).await;
                break;
            }
            msg = receiver.next() => {
                let text = match msg {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                };

                let frame = match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(f) => f,
                    Err(_) => {
                        tracing::warn!(room_id, principal_id, "ignoring malformed gateway frame");
                        continue;
                    }
                };

                match frame {
                    ClientFrame::Join { .. } => {
                        tracing::warn!(room_id, principal_id, "ignoring duplicate join on a bound connection");
                    }
                    ClientFrame::Pong => {
                        state.governor.record_pong(conn_id);
                    }
                    ClientFrame::Leave { .. } => {
                        let pool = state.pool.clone();
                        let result = tokio::task::spawn_blocking(move || {
                            let mut conn = pool.get().map_err(ApiError::internal)?;
                            studyhall_rooms::leave(&mut conn, principal_id, room_id).map_err(room_error_to_api)
                        })
                        .await
                        .unwrap_or_else(|e| Err(ApiError::internal(e)));

                        if let Ok(outcome) = result {
                            left_cleanly = true;
                            state.bus.unsubscribe_room(room_id, sub_id);
                            state.governor.on_departure(principal_id);
                            state.bus.publish_lobby(LobbyEvent::OccupancyUpdate {
                                room_id,
                                occupancy: outcome.occupancy,
                            });
                            let slow = state.bus.publish_room(
                                room_id,
                                RoomEvent::UserLeft { principal_id, occupancy: outcome.occupancy },
                            );
                            for s in slow {
                                tracing::warn!(room_id, subscriber_id = s, "slow consumer dropped during leave fan-out");
                            }
                            break;
                        }
                    }
                    ClientFrame::SendMessage { content, .. } => {
                        let check = state.rate_limiter.check(principal_id, Action::ChatSend);
                        if !check.allowed {
                            let _ = outbound_tx.send(ServerFrame::RateLimitExceeded {
                                action: Action::ChatSend.as_str(),
                                reset_at: reset_at_epoch_secs(check.reset_after),
                            }).await;
                            continue;
                        }

                        let sanitized = studyhall_identity::validate_message(&content)
                            .and_then(|_| studyhall_identity::sanitize_message(&content));
                        let sanitized = match sanitized {
                            Ok(s) => s,
                            Err(err) => {
                                if matches!(err, IdentityError::MaliciousInput) {
                                    state.rate_limiter.record_violation(principal_id, Action::ChatSend);
                                }
                                let code = match err {
                                    IdentityError::InvalidMessage => ErrorCode::InvalidMessage,
                                    IdentityError::MaliciousInput => ErrorCode::MaliciousInput,
                                    _ => ErrorCode::Internal,
                                };
                                let _ = outbound_tx.send(ServerFrame::Error {
                                    code: code.as_str(),
                                    message: err.to_string(),
                                    retry_after: None,
                                }).await;
                                continue;
                            }
                        };

                        let pool = state.pool.clone();
                        let display_name = principal.display_name.clone();
                        let append_result = tokio::task::spawn_blocking(move || {
                            let conn = pool.get().map_err(ApiError::internal)?;
                            studyhall_chat::append(&conn, room_id, principal_id, &sanitized).map_err(chat_error_to_api)
                        })
                        .await
                        .unwrap_or_else(|e| Err(ApiError::internal(e)));

                        match append_result {
                            Ok(record) => {
                                let touch_pool = state.pool.clone();
                                let _ = tokio::task::spawn_blocking(move || {
                                    if let Ok(conn) = touch_pool.get() {
                                        let _ = studyhall_identity::touch(&conn, principal_id);
                                    }
                                })
                                .await;
                                let slow = state.bus.publish_room(room_id, RoomEvent::NewMessage {
                                    chat_record_id: record.id,
                                    principal_id,
                                    display_name,
                                    content: record.content,
                                    created_at: record.created_at,
                                });
                                for s in slow {
                                    tracing::warn!(room_id, subscriber_id = s, "slow consumer dropped during chat fan-out");
                                }
                            }
                            Err(err) => {
                                let _ = outbound_tx.send(api_error_frame(err)).await;
                            }
                        }
                    }
                    ClientFrame::ToggleVideo { enabled, .. } => {
                        toggle_media(&state, &outbound_tx, principal_id, room_id, MediaKind::Video, enabled).await;
                    }
                    ClientFrame::ToggleAudio { enabled, .. } => {
                        toggle_media(&state, &outbound_tx, principal_id, room_id, MediaKind::Audio, enabled).await;
                    }
                }
            }
        }
    }

    // --- Teardown. ---
    room_forward_task.abort();
    ping_task.abort();
    drop(outbound_tx);
    let _ = send_task.await;

    if !left_cleanly {
        state.bus.unsubscribe_room(room_id, sub_id);
        let pool = state.pool.clone();
        let forced = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().ok()?;
            studyhall_rooms::force_remove(&mut conn, principal_id, room_id).ok().flatten()
        })
        .await
        .ok()
        .flatten();

        state.governor.on_departure(principal_id);
        if let Some(outcome) = forced {
            state.bus.publish_lobby(LobbyEvent::OccupancyUpdate {
                room_id,
                occupancy: outcome.occupancy,
            });
            let slow = state.bus.publish_room(
                room_id,
                RoomEvent::UserLeft { principal_id, occupancy: outcome.occupancy },
            );
            for s in slow {
                tracing::warn!(room_id, subscriber_id = s, "slow consumer dropped during disconnect fan-out");
            }
        }
    }

    state.governor.close_connection(principal_id, conn_id);
}

async fn toggle_media(
    state: &Arc<AppState>,
    outbound_tx: &mpsc::Sender<ServerFrame>,
    principal_id: i64,
    room_id: i64,
    kind: MediaKind,
    enabled: bool,
) {
    let pool = state.pool.clone();
    let result = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(ApiError::internal)?;
        studyhall_rooms::set_media_state(&conn, principal_id, room_id, kind, enabled)
            .map_err(room_error_to_api)
    })
    .await
    .unwrap_or_else(|e| Err(ApiError::internal(e)));

    match result {
        Ok(()) => {
            let event = match kind {
                MediaKind::Video => RoomEvent::VideoToggle { principal_id, enabled },
                MediaKind::Audio => RoomEvent::AudioToggle { principal_id, enabled },
            };
            let slow = state.bus.publish_room(room_id, event);
            for s in slow {
                tracing::warn!(room_id, subscriber_id = s, "slow consumer dropped during toggle fan-out");
            }
        }
        Err(err) => {
            let _ = outbound_tx.send(api_error_frame(err)).await;
        }
    }
}
