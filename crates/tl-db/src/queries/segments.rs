//! Per-session segment records.

use chrono::Utc;
use rusqlite::Connection;
use tl_core::{Error, Result, SessionId};

use super::timestamp;
use crate::models::{SegmentRecord, SegmentStatus};

const COLS: &str = "session_id, chunk_index, file_path, duration, status, error, updated_at";

/// Record that a chunk is about to be processed.
///
/// A record already `appended` keeps its status; any other record is reset
/// to `pending`.
pub fn upsert_pending(
    conn: &Connection,
    session_id: &SessionId,
    chunk_index: u64,
    file_path: &str,
    duration: f64,
) -> Result<()> {
    let now = timestamp(Utc::now());
    conn.execute(
        "INSERT INTO segments (session_id, chunk_index, file_path, duration, status, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'pending', ?5)
         ON CONFLICT(session_id, chunk_index) DO UPDATE SET
             file_path = excluded.file_path,
             duration = excluded.duration,
             status = 'pending',
             error = NULL,
             updated_at = excluded.updated_at
         WHERE segments.status != 'appended'",
        rusqlite::params![session_id.as_str(), chunk_index as i64, file_path, duration, now],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

/// Move a record to `status`. An `appended` record is never moved back.
///
/// Returns `false` when the record does not exist or was left unchanged.
pub fn set_status(
    conn: &Connection,
    session_id: &SessionId,
    chunk_index: u64,
    status: SegmentStatus,
    error: Option<&str>,
) -> Result<bool> {
    let now = timestamp(Utc::now());
    let n = conn
        .execute(
            "UPDATE segments SET status=?1, error=?2, updated_at=?3
             WHERE session_id=?4 AND chunk_index=?5
               AND (status != 'appended' OR ?1 = 'appended')",
            rusqlite::params![
                status.as_str(),
                error,
                now,
                session_id.as_str(),
                chunk_index as i64
            ],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

pub fn get_segment(
    conn: &Connection,
    session_id: &SessionId,
    chunk_index: u64,
) -> Result<Option<SegmentRecord>> {
    let q = format!("SELECT {COLS} FROM segments WHERE session_id=?1 AND chunk_index=?2");
    let result = conn.query_row(
        &q,
        rusqlite::params![session_id.as_str(), chunk_index as i64],
        SegmentRecord::from_row,
    );
    match result {
        Ok(s) => Ok(Some(s)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// All records of a session, by chunk index.
pub fn list_segments(conn: &Connection, session_id: &SessionId) -> Result<Vec<SegmentRecord>> {
    let q = format!("SELECT {COLS} FROM segments WHERE session_id=?1 ORDER BY chunk_index ASC");
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([session_id.as_str()], SegmentRecord::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

pub fn delete_session_segments(conn: &Connection, session_id: &SessionId) -> Result<usize> {
    let n = conn
        .execute("DELETE FROM segments WHERE session_id=?1", [session_id.as_str()])
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n)
}
