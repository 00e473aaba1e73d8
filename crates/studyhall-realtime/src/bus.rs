//! Event Bus — per-room and lobby-wide typed fan-out with bounded
//! per-subscriber queues.
//!
//! Every room subscriber gets a bounded `mpsc` queue capped at 256 so one
//! slow reader can't grow memory without limit. A queue that fills is the
//! `SLOW_CONSUMER` condition — `publish_room` drops that subscriber's
//! sender and reports its id back to the caller, which is expected to close
//! the underlying connection. The single global lobby topic uses
//! `tokio::sync::broadcast` for server-wide fan-out instead, since a
//! dropped lobby update is tolerable where a dropped chat message is not.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::{broadcast, mpsc};

use crate::events::{LobbyEvent, RoomEvent};

/// Opaque handle identifying one subscriber within a room's subscriber map.
pub type SubscriberId = u64;

/// Queue depth at which a subscriber is considered a slow consumer and
/// disconnected rather than allowed to keep buffering.
pub const QUEUE_CAPACITY: usize = 256;

struct Inner {
    next_subscriber_id: SubscriberId,
    room_subscribers: HashMap<i64, HashMap<SubscriberId, mpsc::Sender<RoomEvent>>>,
}

/// The process-wide fan-out hub. One instance is shared across the server.
pub struct EventBus {
    inner: Mutex<Inner>,
    lobby_tx: broadcast::Sender<LobbyEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (lobby_tx, _) = broadcast::channel(QUEUE_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                next_subscriber_id: 1,
                room_subscribers: HashMap::new(),
            }),
            lobby_tx,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Subscribes to `room:{room_id}`, returning the new subscriber's id and
    /// its receiving end. Use [`EventBus::send_direct`] immediately after to
    /// deliver the subscriber's `chat-history` replay.
    pub fn subscribe_room(&self, room_id: i64) -> (SubscriberId, mpsc::Receiver<RoomEvent>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let mut inner = self.lock();
        let id = inner.next_subscriber_id;
        inner.next_subscriber_id += 1;
        inner
            .room_subscribers
            .entry(room_id)
            .or_default()
            .insert(id, tx);
        (id, rx)
    }

    /// Removes a subscriber from a room's topic. Safe to call more than
    /// once or on an id the bus has already dropped for backpressure.
    pub fn unsubscribe_room(&self, room_id: i64, subscriber_id: SubscriberId) {
        let mut inner = self.lock();
        if let Some(subs) = inner.room_subscribers.get_mut(&room_id) {
            subs.remove(&subscriber_id);
            if subs.is_empty() {
                inner.room_subscribers.remove(&room_id);
            }
        }
    }

    /// Publishes `event` to every current subscriber of `room:{room_id}`.
    ///
    /// Returns the ids of subscribers whose queue was full (`SLOW_CONSUMER`)
    /// — their sender is dropped here, so the caller only needs to close
    /// the corresponding connection.
    pub fn publish_room(&self, room_id: i64, event: RoomEvent) -> Vec<SubscriberId> {
        let mut inner = self.lock();
        let Some(subs) = inner.room_subscribers.get_mut(&room_id) else {
            return Vec::new();
        };

        let mut slow = Vec::new();
        subs.retain(|&id, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(room_id, subscriber_id = id, "slow consumer, disconnecting");
                slow.push(id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        slow
    }

    /// Sends `event` to exactly one subscriber, bypassing the rest of the
    /// room. Used for the `chat-history` replay sent on subscribe.
    pub fn send_direct(&self, room_id: i64, subscriber_id: SubscriberId, event: RoomEvent) {
        let inner = self.lock();
        if let Some(tx) = inner
            .room_subscribers
            .get(&room_id)
            .and_then(|subs| subs.get(&subscriber_id))
        {
            let _ = tx.try_send(event);
        }
    }

    /// Subscribes to the single global `lobby` topic.
    pub fn subscribe_lobby(&self) -> broadcast::Receiver<LobbyEvent> {
        self.lobby_tx.subscribe()
    }

    /// Publishes `event` to every current lobby subscriber. No-op if there
    /// are none.
    pub fn publish_lobby(&self, event: LobbyEvent) {
        let _ = self.lobby_tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
