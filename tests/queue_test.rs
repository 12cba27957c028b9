//! Durable queue behavior: retry policy, failure isolation, deduplication,
//! recovery after a crash and retention of finished jobs.

mod common;

use std::time::Duration;

use chrono::Utc;
use common::{session, TestHarness};
use tl_core::events::EventPayload;
use tl_db::models::{JobStatus, SegmentStatus};
use tl_db::queries::jobs;
use tl_stream::purge::JobPurgeService;

#[tokio::test]
async fn failing_chunk_is_dropped_after_exhausting_retries() {
    let h = TestHarness::new();
    let id = session("abc123");
    h.transcoder.fail_always(1).await;

    let mut ids = Vec::new();
    for index in 0..3 {
        ids.push(h.service.submit_chunk(&id, index, b"raw").await.unwrap());
    }
    h.drain().await;
    h.service.finalize_playlist(&id).await.unwrap();

    assert_eq!(h.manifest_uris(&id), vec!["segment-0.ts", "segment-2.ts"]);
    assert_eq!(h.manifest(&id).lines().last(), Some("#EXT-X-ENDLIST"));

    let conn = h.conn();
    let failed = jobs::get_job(&conn, ids[1]).unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.attempts, 3);
    assert!(failed.error.unwrap().contains("Invalid data found"));
    for ok in [ids[0], ids[2]] {
        assert_eq!(jobs::get_job(&conn, ok).unwrap().unwrap().status, JobStatus::Completed);
    }

    // three attempts for chunk 1, one each for the others
    assert_eq!(h.transcoder.calls(), 5);
    assert!(h.ctx().layout.chunk_path(&id, 1).exists());
}

#[tokio::test]
async fn transient_failure_recovers_on_retry() {
    let h = TestHarness::new();
    let id = session("abc123");
    h.transcoder.fail(0, 2).await;
    let mut events = h.ctx().event_bus.subscribe();

    let job_id = h.service.submit_chunk(&id, 0, b"raw").await.unwrap();
    h.drain().await;

    let job = jobs::get_job(&h.conn(), job_id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 3);
    assert_eq!(h.manifest_uris(&id), vec!["segment-0.ts"]);

    let mut retries = 0;
    let mut completed = false;
    while let Ok(event) = events.try_recv() {
        match event.payload {
            EventPayload::JobRetrying { job_id: j, .. } if j == job_id => retries += 1,
            EventPayload::JobCompleted { job_id: j } if j == job_id => completed = true,
            _ => {}
        }
    }
    assert_eq!(retries, 2);
    assert!(completed);
}

#[tokio::test]
async fn retries_wait_for_their_backoff() {
    let h = TestHarness::with_config(|c| c.queue.backoff_delay_ms = 60_000);
    let id = session("abc123");
    h.transcoder.fail(0, 1).await;

    let job_id = h.service.submit_chunk(&id, 0, b"raw").await.unwrap();
    h.drain().await;

    let job = jobs::get_job(&h.conn(), job_id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Retrying);
    assert_eq!(job.attempts, 1);
    assert!(job.scheduled_for.is_some());
    // the retry is not due yet
    assert!(!tl_stream::processor::process_next_job(h.ctx(), "w").await.unwrap());
}

#[tokio::test]
async fn waiting_chunk_is_queued_once() {
    let h = TestHarness::new();
    let id = session("abc123");
    let mut events = h.ctx().event_bus.subscribe();

    let first = h.service.submit_chunk(&id, 4, b"raw").await.unwrap();
    let second = h.service.submit_chunk(&id, 4, b"raw-again").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(h.stats().queued, 1);

    let queued = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|e| matches!(e.payload, EventPayload::JobQueued { .. }))
        .count();
    assert_eq!(queued, 1);

    // the latest payload wins
    let chunk = h.ctx().layout.chunk_path(&id, 4);
    assert_eq!(std::fs::read(chunk).unwrap(), b"raw-again");
}

#[tokio::test]
async fn finalized_session_drops_its_waiting_jobs() {
    let h = TestHarness::new();
    let id = session("abc123");
    h.service.submit_chunk(&id, 0, b"raw").await.unwrap();
    h.drain().await;

    let late = h.service.submit_chunk(&id, 1, b"raw").await.unwrap();
    h.service.finalize_playlist(&id).await.unwrap();
    let before = h.manifest(&id);
    h.drain().await;

    let job = jobs::get_job(&h.conn(), late).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    // not retried
    assert_eq!(job.attempts, 1);
    assert_eq!(h.manifest(&id), before);

    let segment = h
        .service
        .segments(&id)
        .unwrap()
        .into_iter()
        .find(|s| s.chunk_index == 1)
        .unwrap();
    assert_eq!(segment.status, SegmentStatus::Failed);
}

#[tokio::test]
async fn cleanup_cancels_waiting_jobs() {
    let h = TestHarness::new();
    let id = session("abc123");
    for index in 0..3 {
        h.service.submit_chunk(&id, index, b"raw").await.unwrap();
    }

    let report = h.service.cleanup(&id).await;
    assert_eq!(report.cancelled_jobs, 3);
    assert_eq!(report.removed_files, 3);

    let stats = h.stats();
    assert_eq!(stats.pending(), 0);
    assert_eq!(stats.failed, 3);
    assert_eq!(h.transcoder.calls(), 0);
}

#[tokio::test]
async fn interrupted_job_is_recovered_on_restart() {
    let h = TestHarness::new();
    let id = session("abc123");
    let job_id = h.service.submit_chunk(&id, 0, b"raw").await.unwrap();

    // A worker claimed the job and the process died.
    let claimed = jobs::dequeue_next(&h.conn(), "crashed", Utc::now())
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id, job_id);
    assert!(!tl_stream::processor::process_next_job(h.ctx(), "w").await.unwrap());

    assert_eq!(tl_stream::processor::recover_orphaned_jobs(h.ctx()).unwrap(), 1);
    h.drain().await;

    let job = jobs::get_job(&h.conn(), job_id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 2);
    assert_eq!(h.manifest_uris(&id), vec!["segment-0.ts"]);
}

#[tokio::test]
async fn purge_applies_retention_policy() {
    let h = TestHarness::with_config(|c| c.queue.keep_completed_count = 2);
    let id = session("abc123");
    h.transcoder.fail_always(9).await;
    for index in [0, 1, 2, 3, 9] {
        h.service.submit_chunk(&id, index, b"raw").await.unwrap();
    }
    h.drain().await;
    assert_eq!(h.stats().completed, 4);
    assert_eq!(h.stats().failed, 1);

    let purge = JobPurgeService::new(
        h.ctx().db.clone(),
        h.ctx().config.queue.clone(),
        Duration::from_secs(60),
    );
    let counts = purge.run_purge().unwrap();

    assert_eq!(counts.completed, 2);
    assert_eq!(counts.failed, 0);
    let stats = h.stats();
    assert_eq!(stats.completed, 2);
    // failed jobs are kept for a week
    assert_eq!(stats.failed, 1);
    // the manifest is unaffected by queue housekeeping
    assert_eq!(h.manifest_uris(&id).len(), 4);
}
