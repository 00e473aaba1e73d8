//! Anonymous identity lifecycle for the Studyhall platform.
//!
//! Covers Hash & Sanitize (pure address hashing and input sanitization) and
//! the Identity Store (create-or-touch-or-evict for the anonymous
//! `Principal` rows backing every display in the system). No credential,
//! session token, or raw network address is ever persisted — only the
//! hashed address and a sanitized display name.

mod error;
mod hash;
mod sanitize;
mod store;

pub use error::IdentityError;
pub use hash::{fold_to_i64, hash_address};
pub use sanitize::{
    sanitize_display_name, sanitize_message, validate_display_name, validate_message,
};
pub use store::{evict_idle, get_by_hashed_address, get_by_id, touch, upsert, Principal};
