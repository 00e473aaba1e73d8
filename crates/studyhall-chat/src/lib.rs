//! Message Journal — append-only, ordered chat history per room.
//!
//! No edits, no deletes except through room lifecycle (out of scope here).
//! Callers are responsible for sanitizing content before calling [`append`].

mod error;
mod journal;

pub use error::ChatError;
pub use journal::{append, history, ChatRecord};
