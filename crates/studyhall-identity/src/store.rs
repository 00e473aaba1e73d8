//! Identity Store — anonymous principal lifecycle.
//!
//! A single atomic SQL statement does the create-or-touch instead of a
//! read-then-write round trip, which is what keeps two concurrent requests
//! from the same hashed address from racing each other into two rows.

use crate::error::IdentityError;
use crate::sanitize::sanitize_display_name;
use rusqlite::{params, Connection, OptionalExtension};

/// An anonymous, ephemeral user identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: i64,
    pub hashed_address: String,
    pub display_name: String,
    pub created_at: String,
    pub last_active_at: String,
}

fn map_row(row: &rusqlite::Row) -> rusqlite::Result<Principal> {
    Ok(Principal {
        id: row.get(0)?,
        hashed_address: row.get(1)?,
        display_name: row.get(2)?,
        created_at: row.get(3)?,
        last_active_at: row.get(4)?,
    })
}

/// Creates a principal for `hashed_address` if none exists, sanitizing
/// `display_name` before storing it; otherwise touches `last_active_at` on
/// the existing row and leaves its stored display name untouched.
///
/// The insert-or-touch is one `INSERT ... ON CONFLICT` statement so that two
/// concurrent requests carrying the same hashed address cannot both observe
/// "absent" and race each other into duplicate rows.
pub fn upsert(
    conn: &Connection,
    hashed_address: &str,
    display_name: &str,
) -> Result<Principal, IdentityError> {
    let sanitized_name = sanitize_display_name(display_name)?;

    conn.query_row(
        "INSERT INTO principals (hashed_address, display_name)
         VALUES (?1, ?2)
         ON CONFLICT(hashed_address) DO UPDATE SET
            last_active_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
         RETURNING id, hashed_address, display_name, created_at, last_active_at",
        params![hashed_address, sanitized_name],
        map_row,
    )
    .map_err(IdentityError::Database)
}

/// Updates `last_active_at` for the given principal to now.
pub fn touch(conn: &Connection, principal_id: i64) -> Result<(), IdentityError> {
    conn.execute(
        "UPDATE principals SET last_active_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
         WHERE id = ?1",
        params![principal_id],
    )?;
    Ok(())
}

/// Looks up a principal by its hashed address.
pub fn get_by_hashed_address(
    conn: &Connection,
    hashed_address: &str,
) -> Result<Option<Principal>, IdentityError> {
    conn.query_row(
        "SELECT id, hashed_address, display_name, created_at, last_active_at
         FROM principals WHERE hashed_address = ?1",
        params![hashed_address],
        map_row,
    )
    .optional()
    .map_err(IdentityError::Database)
}

/// Looks up a principal by its database id, as carried in the `user_id`
/// field clients present at the session gateway and the HTTP join/leave
/// endpoints after `POST /users` has handed it to them.
pub fn get_by_id(conn: &Connection, principal_id: i64) -> Result<Option<Principal>, IdentityError> {
    conn.query_row(
        "SELECT id, hashed_address, display_name, created_at, last_active_at
         FROM principals WHERE id = ?1",
        params![principal_id],
        map_row,
    )
    .optional()
    .map_err(IdentityError::Database)
}

/// Deletes principals idle for more than `idle_timeout_secs` seconds that
/// hold no current membership, returning the number of rows removed.
///
/// A principal currently seated in a room is never evicted even if its
/// `last_active_at` has gone stale — the room's occupancy still needs the
/// row via the `memberships.principal_id` foreign key.
pub fn evict_idle(conn: &Connection, idle_timeout_secs: i64) -> Result<usize, IdentityError> {
    let count = conn.execute(
        "DELETE FROM principals
         WHERE last_active_at < strftime('%Y-%m-%dT%H:%M:%fZ', 'now', ?1 || ' seconds')
           AND id NOT IN (SELECT principal_id FROM memberships)",
        params![format!("-{idle_timeout_secs}")],
    )?;
    Ok(count)
}
