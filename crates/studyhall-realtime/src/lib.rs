//! Event Bus — typed, topic-isolated, ordered fan-out of room and lobby
//! events to WebSocket subscribers.
//!
//! Events are not persisted: a subscriber only sees events published after
//! it subscribes, with the single exception of `chat-history`, which the
//! Session Gateway replays directly via [`EventBus::send_direct`] right
//! after a room subscription is established.

mod bus;
mod events;

pub use bus::{EventBus, SubscriberId, QUEUE_CAPACITY};
pub use events::{LobbyEvent, RoomEvent};
