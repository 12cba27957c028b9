//! Session lifecycle state.
//!
//! Every transition is a single conditional statement, so two processes on
//! the same database never both win it.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use tl_core::{Error, Result, SessionId};

use super::timestamp;
use crate::models::{session_state_from_row, SessionState};

pub fn get_state(conn: &Connection, session_id: &SessionId) -> Result<Option<SessionState>> {
    conn.query_row(
        "SELECT state FROM sessions WHERE session_id=?1",
        [session_id.as_str()],
        |row| session_state_from_row(row, 0),
    )
    .optional()
    .map_err(|e| Error::database(e.to_string()))
}

/// Register an unknown session as `recording`.
///
/// Returns the state the session is in afterwards and whether it was new.
pub fn start_recording(conn: &Connection, session_id: &SessionId) -> Result<(SessionState, bool)> {
    let created = insert_if_absent(conn, session_id, SessionState::Recording)?;
    let state = get_state(conn, session_id)?.unwrap_or(SessionState::Recording);
    Ok((state, created))
}

/// Move an unknown or recording session to `finalized`.
///
/// Returns the state afterwards and whether this call moved it.
pub fn finalize(conn: &Connection, session_id: &SessionId) -> Result<(SessionState, bool)> {
    let n = conn
        .execute(
            "INSERT INTO sessions (session_id, state, updated_at) VALUES (?1, 'finalized', ?2)
             ON CONFLICT(session_id) DO UPDATE SET
                 state = 'finalized',
                 updated_at = excluded.updated_at
             WHERE sessions.state = 'recording'",
            rusqlite::params![session_id.as_str(), timestamp(Utc::now())],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    let state = get_state(conn, session_id)?.unwrap_or(SessionState::Finalized);
    Ok((state, n > 0))
}

/// Move a session in any state to `reclaimed`. Returns `false` if it already
/// was.
pub fn reclaim(conn: &Connection, session_id: &SessionId) -> Result<bool> {
    let n = conn
        .execute(
            "INSERT INTO sessions (session_id, state, updated_at) VALUES (?1, 'reclaimed', ?2)
             ON CONFLICT(session_id) DO UPDATE SET
                 state = 'reclaimed',
                 updated_at = excluded.updated_at
             WHERE sessions.state != 'reclaimed'",
            rusqlite::params![session_id.as_str(), timestamp(Utc::now())],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Record `state` for a session the table does not know yet.
pub fn insert_if_absent(
    conn: &Connection,
    session_id: &SessionId,
    state: SessionState,
) -> Result<bool> {
    let n = conn
        .execute(
            "INSERT INTO sessions (session_id, state, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(session_id) DO NOTHING",
            rusqlite::params![session_id.as_str(), state.as_str(), timestamp(Utc::now())],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

pub fn count_in_state(conn: &Connection, state: SessionState) -> Result<usize> {
    conn.query_row(
        "SELECT COUNT(*) FROM sessions WHERE state=?1",
        [state.as_str()],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n as usize)
    .map_err(|e| Error::database(e.to_string()))
}
