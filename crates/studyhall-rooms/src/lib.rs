//! Room Registry — the membership state machine at the core of Studyhall.
//!
//! A room has a fixed capacity and a current occupancy; a principal holds
//! at most one membership across every room in the system. Every mutation
//! (`join`, `leave`, `force_remove`, `set_media_state`) runs under an
//! `IMMEDIATE` transaction so that concurrent callers racing for the same
//! seat or the same membership row serialize against each other rather
//! than each observing a stale read.

mod error;
mod registry;

pub use error::RoomError;
pub use registry::{
    current_membership_room, ensure_rooms, force_remove, join, leave, list, set_media_state,
    snapshot, JoinOutcome, LeaveOutcome, MediaKind, Participant, RoomSummary,
};
