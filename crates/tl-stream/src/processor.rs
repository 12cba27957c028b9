//! Background worker pool.
//!
//! Each worker polls the durable queue, processes the claimed chunk, and
//! records the outcome. Failed attempts are rescheduled with exponential
//! backoff while attempts remain and the error is retryable; otherwise the
//! job fails and its segment is excluded from the manifest. No job outcome
//! ever stops a worker.

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use tl_core::events::EventPayload;
use tl_core::{Error, Result};
use tl_db::models::Job;
use tl_db::queries::jobs;

use crate::context::StreamContext;
use crate::service::{mark_segment_failed, process_stored_chunk};

/// Release jobs a previous process left running. Call before starting
/// workers.
pub fn recover_orphaned_jobs(ctx: &StreamContext) -> Result<usize> {
    let conn = tl_db::pool::get_conn(&ctx.db)?;
    let n = jobs::requeue_orphaned(&conn)?;
    if n > 0 {
        tracing::warn!(jobs = n, "Recovered jobs interrupted by a previous shutdown");
    }
    Ok(n)
}

/// Run `workers.count` workers until `cancel` fires.
///
/// A job that is in flight when cancellation arrives is finished first.
pub async fn run_workers(ctx: StreamContext, cancel: CancellationToken) {
    let count = ctx.config.workers.count.max(1);
    tracing::info!(workers = count, "Job processor started");

    let mut workers = JoinSet::new();
    for i in 0..count {
        workers.spawn(run_worker(ctx.clone(), format!("worker-{i}"), cancel.clone()));
    }

    while let Some(result) = workers.join_next().await {
        if let Err(e) = result {
            tracing::error!("Worker task ended abnormally: {e}");
        }
    }

    tracing::info!("Job processor stopped");
}

async fn run_worker(ctx: StreamContext, worker_id: String, cancel: CancellationToken) {
    let poll_interval = Duration::from_millis(ctx.config.workers.poll_interval_ms);
    tracing::debug!(worker = %worker_id, "Worker started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        match process_next_job(&ctx, &worker_id).await {
            Ok(true) => {
                // Processed a job; immediately check for the next one.
                continue;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(worker = %worker_id, "Job processor error: {e}");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = ctx.job_notify.notified() => {}
            _ = cancel.cancelled() => { break; }
        }
    }

    tracing::debug!(worker = %worker_id, "Worker stopped");
}

/// Claim and process the next runnable job.
///
/// Returns `Ok(true)` if a job was processed (whatever its outcome),
/// `Ok(false)` if none was runnable. Errors only come from the queue itself.
pub async fn process_next_job(ctx: &StreamContext, worker_id: &str) -> Result<bool> {
    let conn = tl_db::pool::get_conn(&ctx.db)?;
    let job = jobs::dequeue_next(&conn, worker_id, Utc::now())?;
    drop(conn);

    let Some(job) = job else {
        return Ok(false);
    };

    let job_id = job.id;
    tracing::info!(
        job_id = %job_id,
        session_id = %job.session_id,
        chunk_index = job.chunk_index,
        attempt = job.attempts,
        "Processing job"
    );
    ctx.event_bus.broadcast(EventPayload::JobStarted {
        job_id,
        attempt: job.attempts,
    });

    match process_stored_chunk(ctx, &job.session_id, job.chunk_index).await {
        Ok(_) => {
            let conn = tl_db::pool::get_conn(&ctx.db)?;
            jobs::complete_job(&conn, job_id)?;
            ctx.event_bus
                .broadcast(EventPayload::JobCompleted { job_id });
            tracing::info!(job_id = %job_id, "Job completed");
        }
        Err(e) => handle_failure(ctx, &job, e)?,
    }

    Ok(true)
}

fn handle_failure(ctx: &StreamContext, job: &Job, error: Error) -> Result<()> {
    let job_id = job.id;
    let error_msg = error.to_string();
    let conn = tl_db::pool::get_conn(&ctx.db)?;

    if error.is_retryable() && job.has_attempts_left() {
        let backoff = ctx.config.queue.backoff_for(job.attempts);
        let run_at = Utc::now() + chrono::Duration::milliseconds(backoff.as_millis() as i64);
        jobs::schedule_retry(&conn, job_id, &error_msg, run_at)?;

        tracing::warn!(
            job_id = %job_id,
            attempt = job.attempts,
            max_attempts = job.max_attempts,
            backoff_ms = backoff.as_millis() as u64,
            error = %error_msg,
            "Job attempt failed; scheduling retry"
        );
        ctx.event_bus.broadcast(EventPayload::JobRetrying {
            job_id,
            attempt: job.attempts,
            backoff_ms: backoff.as_millis() as u64,
            error: error_msg,
        });
        return Ok(());
    }

    jobs::fail_job(&conn, job_id, &error_msg)?;
    drop(conn);
    mark_segment_failed(ctx, &job.session_id, job.chunk_index, &error);

    if matches!(error, Error::SessionClosed { .. }) {
        tracing::warn!(job_id = %job_id, error = %error_msg, "Job dropped");
    } else {
        tracing::error!(
            job_id = %job_id,
            session_id = %job.session_id,
            chunk_index = job.chunk_index,
            attempts = job.attempts,
            error = %error_msg,
            "Job failed permanently"
        );
    }
    ctx.event_bus.broadcast(EventPayload::JobFailed {
        job_id,
        error: error_msg,
    });
    Ok(())
}
