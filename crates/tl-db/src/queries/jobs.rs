//! Processing queue operations.
//!
//! A job is claimed with a single `UPDATE ... RETURNING` statement, so two
//! workers sharing the database can never run the same job at once.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tl_core::config::QueuePolicy;
use tl_core::{Error, JobId, Result, SessionId};

use super::timestamp;
use crate::models::{Job, JobStats, JobStatus};

const COLS: &str = "id, session_id, chunk_index, status, attempts, max_attempts,
    error, locked_by, locked_at, created_at, started_at, completed_at, scheduled_for";

/// Rows removed by one [`purge_jobs`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeCounts {
    pub completed: usize,
    pub failed: usize,
}

impl PurgeCounts {
    pub fn total(&self) -> usize {
        self.completed + self.failed
    }
}

/// Queue a job for `(session_id, chunk_index)`.
///
/// If a job for the same chunk is still waiting (queued or retrying) it is
/// returned instead and the flag is `false`. A job that is already running is
/// not reused: the chunk may have been re-uploaded after the worker read it.
pub fn enqueue(
    conn: &Connection,
    session_id: &SessionId,
    chunk_index: u64,
    max_attempts: u32,
) -> Result<(Job, bool)> {
    let id = JobId::new();
    let now = timestamp(Utc::now());

    let inserted = conn
        .execute(
            "INSERT INTO jobs (id, session_id, chunk_index, status, max_attempts, created_at)
             SELECT ?1, ?2, ?3, 'queued', ?4, ?5
             WHERE NOT EXISTS (
                 SELECT 1 FROM jobs
                 WHERE session_id = ?2 AND chunk_index = ?3
                   AND status IN ('queued', 'retrying')
             )",
            rusqlite::params![
                id.to_string(),
                session_id.as_str(),
                chunk_index as i64,
                max_attempts,
                &now
            ],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if inserted == 1 {
        return Ok((
            Job {
                id,
                session_id: session_id.clone(),
                chunk_index,
                status: JobStatus::Queued,
                attempts: 0,
                max_attempts,
                error: None,
                locked_by: None,
                locked_at: None,
                created_at: now,
                started_at: None,
                completed_at: None,
                scheduled_for: None,
            },
            true,
        ));
    }

    let q = format!(
        "SELECT {COLS} FROM jobs
         WHERE session_id = ?1 AND chunk_index = ?2 AND status IN ('queued', 'retrying')
         ORDER BY created_at ASC LIMIT 1"
    );
    let existing = conn
        .query_row(
            &q,
            rusqlite::params![session_id.as_str(), chunk_index as i64],
            Job::from_row,
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok((existing, false))
}

/// Get a job by ID.
pub fn get_job(conn: &Connection, id: JobId) -> Result<Option<Job>> {
    let q = format!("SELECT {COLS} FROM jobs WHERE id = ?1");
    let result = conn.query_row(&q, [id.to_string()], Job::from_row);
    match result {
        Ok(j) => Ok(Some(j)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// List jobs with optional status filter and pagination, oldest first.
pub fn list_jobs(
    conn: &Connection,
    status: Option<JobStatus>,
    offset: i64,
    limit: i64,
) -> Result<Vec<Job>> {
    let (q, params_vec): (String, Vec<Box<dyn rusqlite::types::ToSql>>) = if let Some(s) = status {
        (
            format!(
                "SELECT {COLS} FROM jobs WHERE status = ?1
                 ORDER BY created_at ASC, rowid ASC LIMIT ?2 OFFSET ?3"
            ),
            vec![
                Box::new(s.as_str()),
                Box::new(limit),
                Box::new(offset),
            ],
        )
    } else {
        (
            format!(
                "SELECT {COLS} FROM jobs
                 ORDER BY created_at ASC, rowid ASC LIMIT ?1 OFFSET ?2"
            ),
            vec![Box::new(limit), Box::new(offset)],
        )
    };

    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let params_refs: Vec<&dyn rusqlite::types::ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
    let rows = stmt
        .query_map(params_refs.as_slice(), Job::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

/// All jobs of one session, by chunk index.
pub fn list_session_jobs(conn: &Connection, session_id: &SessionId) -> Result<Vec<Job>> {
    let q = format!(
        "SELECT {COLS} FROM jobs WHERE session_id = ?1
         ORDER BY chunk_index ASC, created_at ASC"
    );
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([session_id.as_str()], Job::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

/// Atomically claim the oldest runnable job.
///
/// Runnable means `queued`, or `retrying` with its backoff elapsed at `now`.
/// The claimed job becomes `active`, is locked by `worker`, and its attempt
/// counter is incremented.
pub fn dequeue_next(conn: &Connection, worker: &str, now: DateTime<Utc>) -> Result<Option<Job>> {
    let now = timestamp(now);

    // SQLite RETURNING is supported since 3.35.
    let q = format!(
        "UPDATE jobs SET status='active', attempts=attempts+1, locked_by=?1, locked_at=?2,
             started_at=COALESCE(started_at, ?2), scheduled_for=NULL
         WHERE id = (
             SELECT id FROM jobs
             WHERE status='queued'
                OR (status='retrying' AND (scheduled_for IS NULL OR scheduled_for <= ?2))
             ORDER BY created_at ASC, rowid ASC LIMIT 1
         )
         RETURNING {COLS}"
    );

    let result = conn.query_row(&q, rusqlite::params![worker, &now], Job::from_row);
    match result {
        Ok(j) => Ok(Some(j)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Mark a job as completed.
pub fn complete_job(conn: &Connection, id: JobId) -> Result<bool> {
    let now = timestamp(Utc::now());
    let n = conn
        .execute(
            "UPDATE jobs SET status='completed', error=NULL, locked_by=NULL, locked_at=NULL,
                completed_at=?1
             WHERE id=?2",
            rusqlite::params![now, id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Put an active job back in line, runnable again from `run_at`.
pub fn schedule_retry(
    conn: &Connection,
    id: JobId,
    error: &str,
    run_at: DateTime<Utc>,
) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE jobs SET status='retrying', error=?1, scheduled_for=?2,
                locked_by=NULL, locked_at=NULL
             WHERE id=?3 AND status='active'",
            rusqlite::params![error, timestamp(run_at), id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Mark a job as permanently failed.
pub fn fail_job(conn: &Connection, id: JobId, error: &str) -> Result<bool> {
    let now = timestamp(Utc::now());
    let n = conn
        .execute(
            "UPDATE jobs SET status='failed', error=?1, completed_at=?2,
                locked_by=NULL, locked_at=NULL, scheduled_for=NULL
             WHERE id=?3",
            rusqlite::params![error, now, id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Release jobs left `active` by a process that stopped mid-run.
///
/// Jobs with attempts left go back to `queued`; the rest fail. Returns the
/// number of jobs touched. Only call this before any worker has started.
pub fn requeue_orphaned(conn: &Connection) -> Result<usize> {
    let now = timestamp(Utc::now());
    let n = conn
        .execute(
            "UPDATE jobs SET
                status = CASE WHEN attempts < max_attempts THEN 'queued' ELSE 'failed' END,
                error = CASE WHEN attempts < max_attempts THEN error
                             ELSE 'interrupted after final attempt' END,
                completed_at = CASE WHEN attempts < max_attempts THEN NULL ELSE ?1 END,
                locked_by=NULL, locked_at=NULL
             WHERE status='active'",
            [now],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n)
}

/// Fail every waiting job of a session so no worker picks it up.
pub fn cancel_session_jobs(conn: &Connection, session_id: &SessionId, reason: &str) -> Result<usize> {
    let now = timestamp(Utc::now());
    let n = conn
        .execute(
            "UPDATE jobs SET status='failed', error=?1, completed_at=?2, scheduled_for=NULL
             WHERE session_id=?3 AND status IN ('queued', 'retrying')",
            rusqlite::params![reason, now, session_id.as_str()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n)
}

/// Apply the retention half of `policy` at `now`.
///
/// Completed jobs survive only while younger than `keep_completed` **and**
/// among the newest `keep_completed_count`; failed jobs while younger than
/// `keep_failed`. Waiting and active jobs are never touched.
pub fn purge_jobs(conn: &Connection, policy: &QueuePolicy, now: DateTime<Utc>) -> Result<PurgeCounts> {
    let completed_cutoff = chrono::Duration::from_std(policy.keep_completed())
        .map(|d| timestamp(now - d))
        .map_err(|e| Error::Validation(format!("keep_completed_secs out of range: {e}")))?;
    let failed_cutoff = chrono::Duration::from_std(policy.keep_failed())
        .map(|d| timestamp(now - d))
        .map_err(|e| Error::Validation(format!("keep_failed_secs out of range: {e}")))?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| Error::database(e.to_string()))?;

    let aged = tx
        .execute(
            "DELETE FROM jobs WHERE status='completed' AND completed_at < ?1",
            [&completed_cutoff],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    let overflow = tx
        .execute(
            "DELETE FROM jobs WHERE status='completed' AND id NOT IN (
                 SELECT id FROM jobs WHERE status='completed'
                 ORDER BY completed_at DESC, rowid DESC LIMIT ?1
             )",
            [policy.keep_completed_count],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    let failed = tx
        .execute(
            "DELETE FROM jobs WHERE status='failed' AND completed_at < ?1",
            [&failed_cutoff],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    tx.commit().map_err(|e| Error::database(e.to_string()))?;

    Ok(PurgeCounts {
        completed: aged + overflow,
        failed,
    })
}

/// Count jobs per status.
pub fn job_stats(conn: &Connection) -> Result<JobStats> {
    let mut stmt = conn
        .prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")
        .map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    let mut stats = JobStats::default();
    for (status, count) in rows {
        let count = count as u64;
        match status.parse::<JobStatus>() {
            Ok(JobStatus::Queued) => stats.queued = count,
            Ok(JobStatus::Active) => stats.active = count,
            Ok(JobStatus::Retrying) => stats.retrying = count,
            Ok(JobStatus::Completed) => stats.completed = count,
            Ok(JobStatus::Failed) => stats.failed = count,
            Err(e) => tracing::warn!("Ignoring jobs with {e}"),
        }
    }
    Ok(stats)
}
