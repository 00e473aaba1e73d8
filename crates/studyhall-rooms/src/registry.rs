//! Room Registry — membership state machine with strict capacity
//! enforcement under concurrent joins.
//!
//! A principal may belong to at most one room at a time, with capacity
//! enforced on every join. Every mutating operation runs inside an
//! `IMMEDIATE` SQLite transaction: SQLite has no per-row lock, so acquiring
//! the write lock up front rather than on first write is the closest
//! equivalent to an exclusive row lock, and it serializes concurrent
//! joins/leaves against each other for the lifetime of the transaction. The
//! `memberships.principal_id UNIQUE` constraint from the schema is a second,
//! independent line of defense against the same race.

use crate::error::RoomError;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

/// A snapshot of one room's public state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSummary {
    pub id: i64,
    pub name: String,
    pub capacity: i64,
    pub occupancy: i64,
    pub is_full: bool,
}

/// A single participant as seen by room-join response payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub principal_id: i64,
    pub display_name: String,
    pub video_on: bool,
    pub audio_on: bool,
    pub joined_at: String,
}

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub room_id: i64,
    pub room_name: String,
    pub capacity: i64,
    pub occupancy: i64,
    pub is_full: bool,
    pub joined_at: String,
    pub participants: Vec<Participant>,
}

/// Result of a successful leave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub occupancy: i64,
    /// Session duration in whole seconds (now − joined_at).
    pub session_seconds: i64,
}

/// Attempts to join `principal_id` into `room_id`.
///
/// Runs as a single `IMMEDIATE` transaction: looks up the room (locked or
/// missing short-circuit first), rejects a principal that already holds any
/// membership, checks capacity, then inserts the membership and increments
/// occupancy before committing. Exactly one of `N` concurrent callers racing
/// for the last seat observes success; the rest observe `RoomFull` because
/// the transaction serializes them.
pub fn join(conn: &mut Connection, principal_id: i64, room_id: i64) -> Result<JoinOutcome, RoomError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let room: Option<(String, i64, i64, bool)> = tx
        .query_row(
            "SELECT name, capacity, occupancy, locked FROM rooms WHERE id = ?1",
            params![room_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;

    let (room_name, capacity, occupancy, locked) = room.ok_or(RoomError::NotFound)?;
    if locked {
        return Err(RoomError::RoomLocked);
    }

    let already_member: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM memberships WHERE principal_id = ?1)",
        params![principal_id],
        |row| row.get(0),
    )?;
    if already_member {
        return Err(RoomError::AlreadyInRoom);
    }

    if occupancy >= capacity {
        return Err(RoomError::RoomFull);
    }

    let joined_at: String = tx
        .query_row(
            "INSERT INTO memberships (room_id, principal_id) VALUES (?1, ?2)
             RETURNING joined_at",
            params![room_id, principal_id],
            |row| row.get(0),
        )
        .map_err(map_membership_insert_error)?;

    let new_occupancy: i64 = tx.query_row(
        "UPDATE rooms SET occupancy = occupancy + 1 WHERE id = ?1 RETURNING occupancy",
        params![room_id],
        |row| row.get(0),
    )?;

    let participants = fetch_participants(&tx, room_id)?;

    tx.commit()?;

    Ok(JoinOutcome {
        room_id,
        room_name,
        capacity,
        occupancy: new_occupancy,
        is_full: new_occupancy >= capacity,
        joined_at,
        participants,
    })
}

/// A unique-constraint violation on `memberships.principal_id` at insert
/// time means the "already a member" check above raced and lost — map it to
/// the same `AlreadyInRoom` the pre-check would have returned, not to a raw
/// database error.
fn map_membership_insert_error(e: rusqlite::Error) -> RoomError {
    if let rusqlite::Error::SqliteFailure(ref code, _) = e {
        if code.code == rusqlite::ffi::ErrorCode::ConstraintViolation {
            return RoomError::AlreadyInRoom;
        }
    }
    RoomError::Database(e)
}

fn fetch_participants(conn: &Connection, room_id: i64) -> Result<Vec<Participant>, RoomError> {
    let mut stmt = conn.prepare(
        "SELECT m.principal_id, p.display_name, m.video_on, m.audio_on, m.joined_at
         FROM memberships m
         JOIN principals p ON p.id = m.principal_id
         WHERE m.room_id = ?1
         ORDER BY m.joined_at ASC",
    )?;
    let rows = stmt.query_map(params![room_id], |row| {
        Ok(Participant {
            principal_id: row.get(0)?,
            display_name: row.get(1)?,
            video_on: row.get(2)?,
            audio_on: row.get(3)?,
            joined_at: row.get(4)?,
        })
    })?;

    let mut participants = Vec::new();
    for row in rows {
        participants.push(row?);
    }
    Ok(participants)
}

/// Removes `principal_id`'s membership in `room_id`, decrementing occupancy.
///
/// Returns `NotAMember` if no membership row existed. An occupancy that
/// would go negative is an integrity fault: the transaction aborts and
/// `RoomError::Integrity` is returned rather than silently clamping to zero.
pub fn leave(conn: &mut Connection, principal_id: i64, room_id: i64) -> Result<LeaveOutcome, RoomError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let outcome = leave_in_tx(&tx, principal_id, room_id)?.ok_or(RoomError::NotAMember)?;
    tx.commit()?;
    Ok(outcome)
}

/// Same as [`leave`] but idempotent: a missing membership is not an error,
/// it simply returns `None`. Used by the Connection Governor on disconnect,
/// idle eviction, and kick, where the membership may already be gone.
pub fn force_remove(
    conn: &mut Connection,
    principal_id: i64,
    room_id: i64,
) -> Result<Option<LeaveOutcome>, RoomError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let outcome = leave_in_tx(&tx, principal_id, room_id)?;
    tx.commit()?;
    Ok(outcome)
}

fn leave_in_tx(
    tx: &rusqlite::Transaction<'_>,
    principal_id: i64,
    room_id: i64,
) -> Result<Option<LeaveOutcome>, RoomError> {
    let joined_at: Option<String> = tx
        .query_row(
            "DELETE FROM memberships WHERE room_id = ?1 AND principal_id = ?2
             RETURNING joined_at",
            params![room_id, principal_id],
            |row| row.get(0),
        )
        .optional()?;

    let Some(joined_at) = joined_at else {
        return Ok(None);
    };

    let new_occupancy: Option<i64> = tx
        .query_row(
            "UPDATE rooms SET occupancy = occupancy - 1
             WHERE id = ?1 AND occupancy > 0
             RETURNING occupancy",
            params![room_id],
            |row| row.get(0),
        )
        .optional()?;

    let new_occupancy = new_occupancy.ok_or_else(|| {
        RoomError::Integrity(format!(
            "occupancy underflow leaving room {room_id} for principal {principal_id}"
        ))
    })?;

    let session_seconds: i64 = tx.query_row(
        "SELECT CAST(
            (julianday(strftime('%Y-%m-%dT%H:%M:%fZ', 'now')) - julianday(?1)) * 86400.0
            AS INTEGER)",
        params![joined_at],
        |row| row.get(0),
    )?;

    Ok(Some(LeaveOutcome {
        occupancy: new_occupancy,
        session_seconds,
    }))
}

/// Which media flag a `toggle-video`/`toggle-audio` frame addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

/// Sets a participant's `video_on`/`audio_on` flag, returning `NotAMember`
/// if the principal holds no membership in `room_id`. No transaction is
/// needed: this is a single-row update with no capacity invariant to
/// protect, unlike join/leave.
pub fn set_media_state(
    conn: &Connection,
    principal_id: i64,
    room_id: i64,
    kind: MediaKind,
    enabled: bool,
) -> Result<(), RoomError> {
    let sql = match kind {
        MediaKind::Video => {
            "UPDATE memberships SET video_on = ?1 WHERE room_id = ?2 AND principal_id = ?3"
        }
        MediaKind::Audio => {
            "UPDATE memberships SET audio_on = ?1 WHERE room_id = ?2 AND principal_id = ?3"
        }
    };
    let changed = conn.execute(sql, params![enabled, room_id, principal_id])?;
    if changed == 0 {
        return Err(RoomError::NotAMember);
    }
    Ok(())
}

/// Seeds the fixed room roster at bootstrap: `"Room 1"` through `"Room
/// {count}"`, each with `capacity`. The room set is fixed for the lifetime
/// of the server (spec: rooms are never created or destroyed at runtime),
/// so this only needs to run once, idempotently, on startup — `INSERT OR
/// IGNORE` keyed on the unique `name` column means re-running it against an
/// already-seeded database is a no-op. Returns the number of rooms actually
/// inserted.
pub fn ensure_rooms(conn: &Connection, count: u32, capacity: i64) -> Result<usize, RoomError> {
    let mut inserted = 0;
    for i in 1..=count {
        inserted += conn.execute(
            "INSERT OR IGNORE INTO rooms (name, capacity) VALUES (?1, ?2)",
            params![format!("Room {i}"), capacity],
        )?;
    }
    Ok(inserted)
}

/// Returns the room a principal currently holds a membership in, if any.
///
/// A principal holds at most one membership across the whole system, so
/// this is a point lookup rather than a list — used by the session gateway
/// to tell apart a genuine `AlreadyInRoom` conflict (a membership in some
/// *other* room) from a reconnect into a room already joined over HTTP.
pub fn current_membership_room(conn: &Connection, principal_id: i64) -> Result<Option<i64>, RoomError> {
    conn.query_row(
        "SELECT room_id FROM memberships WHERE principal_id = ?1",
        params![principal_id],
        |row| row.get(0),
    )
    .optional()
    .map_err(RoomError::Database)
}

/// Reads a room's current occupancy and participant list without mutating
/// anything. Used alongside [`current_membership_room`] to hand the session
/// gateway the same `(occupancy, participants)` shape [`join`] returns, for
/// a connection binding to a membership it didn't just create.
pub fn snapshot(conn: &Connection, room_id: i64) -> Result<(i64, Vec<Participant>), RoomError> {
    let occupancy: i64 = conn
        .query_row(
            "SELECT occupancy FROM rooms WHERE id = ?1",
            params![room_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(RoomError::NotFound)?;
    let participants = fetch_participants(conn, room_id)?;
    Ok((occupancy, participants))
}

/// Lists every room with its current capacity and occupancy.
///
/// Safe to call outside a transaction: SQLite's WAL snapshot read means any
/// occupancy lag observed here is at most one commit old.
pub fn list(conn: &Connection) -> Result<Vec<RoomSummary>, RoomError> {
    let mut stmt =
        conn.prepare("SELECT id, name, capacity, occupancy FROM rooms ORDER BY name ASC")?;
    let rows = stmt.query_map([], |row| {
        let capacity: i64 = row.get(2)?;
        let occupancy: i64 = row.get(3)?;
        Ok(RoomSummary {
            id: row.get(0)?,
            name: row.get(1)?,
            capacity,
            occupancy,
            is_full: occupancy >= capacity,
        })
    })?;

    let mut rooms = Vec::new();
    for row in rows {
        rooms.push(row?);
    }
    Ok(rooms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use studyhall_db::run_migrations;

    fn setup(capacity: i64) -> Connection {
        let mut conn = Connection::open_in_memory().expect("open in-memory db");
        run_migrations(&conn).expect("run migrations");
        conn.execute(
            "INSERT INTO rooms (name, capacity) VALUES ('room-a', ?1)",
            params![capacity],
        )
        .unwrap();
        let mut insert_principal = |hash: &str| {
            conn.execute(
                "INSERT INTO principals (hashed_address, display_name) VALUES (?1, ?1)",
                params![hash],
            )
            .unwrap();
        };
        for i in 0..20 {
            insert_principal(&format!("p{i}"));
        }
        conn
    }

    #[test]
    fn join_succeeds_and_increments_occupancy() {
        let mut conn = setup(10);
        let outcome = join(&mut conn, 1, 1).expect("join should succeed");
        assert_eq!(outcome.occupancy, 1);
        assert_eq!(outcome.participants.len(), 1);
    }

    #[test]
    fn join_rejects_unknown_room() {
        let mut conn = setup(10);
        let err = join(&mut conn, 1, 999).unwrap_err();
        assert!(matches!(err, RoomError::NotFound));
    }

    #[test]
    fn join_rejects_second_room_for_same_principal() {
        let mut conn = setup(10);
        conn.execute("INSERT INTO rooms (name, capacity) VALUES ('room-b', 10)", [])
            .unwrap();
        join(&mut conn, 1, 1).unwrap();
        let err = join(&mut conn, 1, 2).unwrap_err();
        assert!(matches!(err, RoomError::AlreadyInRoom));
    }

    #[test]
    fn join_rejects_when_full() {
        let mut conn = setup(1);
        join(&mut conn, 1, 1).unwrap();
        let err = join(&mut conn, 2, 1).unwrap_err();
        assert!(matches!(err, RoomError::RoomFull));
    }

    #[test]
    fn join_rejects_locked_room() {
        let mut conn = setup(10);
        conn.execute("UPDATE rooms SET locked = 1 WHERE id = 1", [])
            .unwrap();
        let err = join(&mut conn, 1, 1).unwrap_err();
        assert!(matches!(err, RoomError::RoomLocked));
    }

    #[test]
    fn leave_decrements_occupancy_and_returns_to_baseline() {
        let mut conn = setup(10);
        join(&mut conn, 1, 1).unwrap();
        let outcome = leave(&mut conn, 1, 1).expect("leave should succeed");
        assert_eq!(outcome.occupancy, 0);

        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM memberships", [], |r| r.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn leave_rejects_non_member() {
        let mut conn = setup(10);
        let err = leave(&mut conn, 1, 1).unwrap_err();
        assert!(matches!(err, RoomError::NotAMember));
    }

    #[test]
    fn force_remove_is_idempotent_on_missing_membership() {
        let mut conn = setup(10);
        let result = force_remove(&mut conn, 1, 1).expect("force_remove should not error");
        assert!(result.is_none());
    }

    #[test]
    fn force_remove_removes_existing_membership() {
        let mut conn = setup(10);
        join(&mut conn, 1, 1).unwrap();
        let result = force_remove(&mut conn, 1, 1).unwrap();
        assert_eq!(result.unwrap().occupancy, 0);
    }

    #[test]
    fn list_reports_occupancy_and_fullness() {
        let mut conn = setup(1);
        join(&mut conn, 1, 1).unwrap();
        let rooms = list(&conn).unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].occupancy, 1);
        assert!(rooms[0].is_full);
    }

    #[test]
    fn set_media_state_updates_flag() {
        let mut conn = setup(10);
        join(&mut conn, 1, 1).unwrap();
        set_media_state(&conn, 1, 1, MediaKind::Video, true).expect("toggle should succeed");

        let video_on: bool = conn
            .query_row(
                "SELECT video_on FROM memberships WHERE principal_id = 1",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!(video_on);
    }

    #[test]
    fn set_media_state_rejects_non_member() {
        let conn = setup(10);
        let err = set_media_state(&conn, 1, 1, MediaKind::Audio, true).unwrap_err();
        assert!(matches!(err, RoomError::NotAMember));
    }

    #[test]
    fn ensure_rooms_seeds_fixed_roster() {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        studyhall_db::run_migrations(&conn).expect("run migrations");
        let inserted = ensure_rooms(&conn, 3, 10).expect("ensure_rooms should succeed");
        assert_eq!(inserted, 3);
        let rooms = list(&conn).unwrap();
        assert_eq!(rooms.len(), 3);
        assert!(rooms.iter().all(|r| r.capacity == 10));
    }

    #[test]
    fn ensure_rooms_is_idempotent() {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        studyhall_db::run_migrations(&conn).expect("run migrations");
        ensure_rooms(&conn, 3, 10).unwrap();
        let second = ensure_rooms(&conn, 3, 10).expect("re-running should not error");
        assert_eq!(second, 0);
        assert_eq!(list(&conn).unwrap().len(), 3);
    }

    #[test]
    fn current_membership_room_reflects_state() {
        let mut conn = setup(10);
        assert_eq!(current_membership_room(&conn, 1).unwrap(), None);
        join(&mut conn, 1, 1).unwrap();
        assert_eq!(current_membership_room(&conn, 1).unwrap(), Some(1));
    }

    #[test]
    fn snapshot_matches_join_outcome() {
        let mut conn = setup(10);
        let joined = join(&mut conn, 1, 1).unwrap();
        let (occupancy, participants) = snapshot(&conn, 1).unwrap();
        assert_eq!(occupancy, joined.occupancy);
        assert_eq!(participants, joined.participants);
    }

    #[test]
    fn capacity_race_admits_exactly_remaining_seats() {
        // Serial simulation of "N concurrent joins, C-O seats left": each
        // call reuses the same IMMEDIATE-transaction path a concurrent
        // caller would take, so asserting the aggregate outcome here
        // exercises the same capacity-enforcement logic a true concurrent
        // run would.
        let mut conn = setup(2);
        let mut successes = 0;
        let mut full_rejections = 0;
        for principal in 1..=5 {
            match join(&mut conn, principal, 1) {
                Ok(_) => successes += 1,
                Err(RoomError::RoomFull) => full_rejections += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(successes, 2);
        assert_eq!(full_rejections, 3);

        let rooms = list(&conn).unwrap();
        assert_eq!(rooms[0].occupancy, 2);
    }
}
