//! Message Journal — append-only chat history per room.
//!
//! There is no retention policy to resolve and no reply-to column, so
//! appending a message is a single insert statement rather than a
//! resolve-then-insert pair.

use crate::error::ChatError;
use rusqlite::{params, Connection};

/// One chat message as stored and replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRecord {
    pub id: i64,
    pub room_id: i64,
    pub principal_id: i64,
    pub content: String,
    pub created_at: String,
}

fn map_row(row: &rusqlite::Row) -> rusqlite::Result<ChatRecord> {
    Ok(ChatRecord {
        id: row.get(0)?,
        room_id: row.get(1)?,
        principal_id: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Appends a message to `room_id`'s journal.
///
/// `content` must already be sanitized by the caller; this function does
/// not re-validate or re-escape it. Returns the assigned id and timestamp.
pub fn append(
    conn: &Connection,
    room_id: i64,
    principal_id: i64,
    content: &str,
) -> Result<ChatRecord, ChatError> {
    conn.query_row(
        "INSERT INTO chat_records (room_id, principal_id, content)
         VALUES (?1, ?2, ?3)
         RETURNING id, room_id, principal_id, content, created_at",
        params![room_id, principal_id, content],
        map_row,
    )
    .map_err(map_insert_error)
}

fn map_insert_error(e: rusqlite::Error) -> ChatError {
    if let rusqlite::Error::SqliteFailure(ref code, _) = e {
        if code.code == rusqlite::ffi::ErrorCode::ConstraintViolation {
            return ChatError::RoomNotFound;
        }
    }
    ChatError::Database(e)
}

/// Returns the most recent `limit` records for `room_id` (default 50) in
/// chronological order (oldest first), matching the order a newly
/// subscribed client should replay them in.
pub fn history(
    conn: &Connection,
    room_id: i64,
    limit: Option<u32>,
) -> Result<Vec<ChatRecord>, ChatError> {
    let limit = limit.unwrap_or(50).min(200);

    let mut stmt = conn.prepare(
        "SELECT id, room_id, principal_id, content, created_at
         FROM chat_records
         WHERE room_id = ?1
         ORDER BY created_at DESC, id DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![room_id, limit], map_row)?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    records.reverse();
    Ok(records)
}
