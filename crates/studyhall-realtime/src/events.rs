//! Typed event payloads carried on the Event Bus's topics.

use studyhall_chat::ChatRecord;

/// Events published on a `room:{id}` topic, fanned out to every subscriber
/// currently in that room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    UserJoined {
        principal_id: i64,
        display_name: String,
        joined_at: String,
        occupancy: i64,
    },
    UserLeft {
        principal_id: i64,
        occupancy: i64,
    },
    NewMessage {
        chat_record_id: i64,
        principal_id: i64,
        display_name: String,
        content: String,
        created_at: String,
    },
    VideoToggle {
        principal_id: i64,
        enabled: bool,
    },
    AudioToggle {
        principal_id: i64,
        enabled: bool,
    },
    /// Sent directly to a single newly-subscribed receiver, never fanned
    /// out to the rest of the room.
    ChatHistory(Vec<ChatRecord>),
}

/// Events published on the single global `lobby` topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyEvent {
    OccupancyUpdate { room_id: i64, occupancy: i64 },
}
