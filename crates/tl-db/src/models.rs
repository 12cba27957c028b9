//! Rows of the `jobs`, `segments` and `sessions` tables, and their status
//! enums.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::Type;
use serde::{Deserialize, Serialize};
use tl_core::{JobId, SessionId};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

fn conversion_err(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_job_id(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<JobId> {
    let s: String = row.get(idx)?;
    let uuid = Uuid::parse_str(&s).map_err(|e| conversion_err(idx, e))?;
    Ok(JobId::from(uuid))
}

fn parse_session_id(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<SessionId> {
    let s: String = row.get(idx)?;
    SessionId::new(s).map_err(|e| conversion_err(idx, e))
}

fn parse_enum<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = UnknownStatus>,
{
    let s: String = row.get(idx)?;
    s.parse().map_err(|e| conversion_err(idx, e))
}

/// A status column held a value no variant maps to.
#[derive(Debug, thiserror::Error)]
#[error("unknown status: {0}")]
pub struct UnknownStatus(pub String);

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Lifecycle of a queue entry.
///
/// `Queued -> Active -> Completed`, or `Active -> Retrying -> Active` while
/// attempts remain, or `Active -> Failed` once they are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Active,
    Retrying,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Completed or permanently failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "active" => Ok(Self::Active),
            "retrying" => Ok(Self::Retrying),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// What a worker needs to process one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    pub session_id: SessionId,
    pub chunk_index: u64,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub session_id: SessionId,
    pub chunk_index: u64,
    pub status: JobStatus,
    /// Runs started so far, including the current one.
    pub attempts: u32,
    pub max_attempts: u32,
    pub error: Option<String>,
    pub locked_by: Option<String>,
    pub locked_at: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    /// Earliest time a retrying job may be picked up again.
    pub scheduled_for: Option<String>,
}

impl Job {
    /// Build from a row selected as all columns in table order.
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_job_id(row, 0)?,
            session_id: parse_session_id(row, 1)?,
            chunk_index: row.get::<_, i64>(2)? as u64,
            status: parse_enum(row, 3)?,
            attempts: row.get::<_, i64>(4).unwrap_or(0) as u32,
            max_attempts: row.get::<_, i64>(5).unwrap_or(3) as u32,
            error: row.get(6)?,
            locked_by: row.get(7)?,
            locked_at: row.get(8)?,
            created_at: row.get(9)?,
            started_at: row.get(10)?,
            completed_at: row.get(11)?,
            scheduled_for: row.get(12)?,
        })
    }

    /// Whether a failed run may be followed by another.
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn payload(&self) -> JobPayload {
        JobPayload {
            session_id: self.session_id.clone(),
            chunk_index: self.chunk_index,
        }
    }
}

// ---------------------------------------------------------------------------
// Segment
// ---------------------------------------------------------------------------

/// Processing state of one chunk/segment pair.
///
/// `Appended` is final: once a segment is in the playlist no later write
/// moves it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    Pending,
    Transcoded,
    Appended,
    Failed,
}

impl SegmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Transcoded => "transcoded",
            Self::Appended => "appended",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SegmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SegmentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "transcoded" => Ok(Self::Transcoded),
            "appended" => Ok(Self::Appended),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SegmentRecord {
    pub session_id: SessionId,
    pub chunk_index: u64,
    pub file_path: String,
    pub duration: f64,
    pub status: SegmentStatus,
    pub error: Option<String>,
    pub updated_at: String,
}

impl SegmentRecord {
    /// Build from a row selected as:
    /// session_id, chunk_index, file_path, duration, status, error, updated_at
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            session_id: parse_session_id(row, 0)?,
            chunk_index: row.get::<_, i64>(1)? as u64,
            file_path: row.get(2)?,
            duration: row.get(3)?,
            status: parse_enum(row, 4)?,
            error: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Lifecycle of a recording session.
///
/// ```text
/// Recording ──finalize──▶ Finalized ──cleanup──▶ Reclaimed
///     └──────────────cleanup───────────────────────▲
/// ```
///
/// `Reclaimed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Recording,
    Finalized,
    Reclaimed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recording => "recording",
            Self::Finalized => "finalized",
            Self::Reclaimed => "reclaimed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recording" => Ok(Self::Recording),
            "finalized" => Ok(Self::Finalized),
            "reclaimed" => Ok(Self::Reclaimed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Read a `state` column.
pub fn session_state_from_row(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<SessionState> {
    parse_enum(row, idx)
}

// ---------------------------------------------------------------------------
// JobStats
// ---------------------------------------------------------------------------

/// Queue depth per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub queued: u64,
    pub active: u64,
    pub retrying: u64,
    pub completed: u64,
    pub failed: u64,
}

impl JobStats {
    pub fn total(&self) -> u64 {
        self.queued + self.active + self.retrying + self.completed + self.failed
    }

    /// Jobs that still need a worker.
    pub fn pending(&self) -> u64 {
        self.queued + self.active + self.retrying
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_round_trips_through_text() {
        for s in [
            JobStatus::Queued,
            JobStatus::Active,
            JobStatus::Retrying,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(s.as_str().parse::<JobStatus>().unwrap(), s);
        }
        assert!("processing".parse::<JobStatus>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Retrying.is_terminal());
    }

    #[test]
    fn unknown_segment_status_is_rejected() {
        let err = "lost".parse::<SegmentStatus>().unwrap_err();
        assert_eq!(err.to_string(), "unknown status: lost");
    }

    #[test]
    fn attempts_left_follow_the_job_limit() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        crate::migrations::run_migrations(&conn).unwrap();
        let session = SessionId::new("abc123").unwrap();
        let (mut job, _) = crate::queries::jobs::enqueue(&conn, &session, 0, 2).unwrap();

        job.attempts = 1;
        assert!(job.has_attempts_left());
        job.attempts = 2;
        assert!(!job.has_attempts_left());
    }

    #[test]
    fn session_state_text() {
        assert_eq!("finalized".parse::<SessionState>().unwrap(), SessionState::Finalized);
        assert_eq!(SessionState::Reclaimed.to_string(), "reclaimed");
        assert!("closed".parse::<SessionState>().is_err());
    }

    #[test]
    fn stats_totals() {
        let stats = JobStats {
            queued: 2,
            active: 1,
            retrying: 1,
            completed: 5,
            failed: 1,
        };
        assert_eq!(stats.total(), 10);
        assert_eq!(stats.pending(), 4);
    }
}
