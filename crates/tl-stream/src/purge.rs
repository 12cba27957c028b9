//! Job purge service for retention of finished jobs.
//!
//! Runs in the background and periodically deletes completed and failed
//! jobs that fall outside the [`QueuePolicy`] retention limits.

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use tl_core::config::QueuePolicy;
use tl_core::Result;
use tl_db::pool::DbPool;
use tl_db::queries::jobs::{self, PurgeCounts};

pub struct JobPurgeService {
    db: DbPool,
    policy: QueuePolicy,
    check_interval: Duration,
}

impl JobPurgeService {
    pub fn new(db: DbPool, policy: QueuePolicy, check_interval: Duration) -> Self {
        Self {
            db,
            policy,
            check_interval,
        }
    }

    /// Run a single purge pass.
    pub fn run_purge(&self) -> Result<PurgeCounts> {
        let conn = tl_db::pool::get_conn(&self.db)?;
        let counts = jobs::purge_jobs(&conn, &self.policy, Utc::now())?;

        if counts.total() > 0 {
            info!(
                completed = counts.completed,
                failed = counts.failed,
                "Purged finished jobs"
            );
        } else {
            debug!("No jobs to purge");
        }
        Ok(counts)
    }

    /// Start the background purge task. The first pass runs immediately.
    pub fn start_background_task(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.check_interval);
            info!(
                interval_secs = self.check_interval.as_secs(),
                "Job purge service started"
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Job purge service shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_purge() {
                            error!("Purge cycle failed: {e}");
                        }
                    }
                }
            }
        })
    }

    pub fn policy(&self) -> &QueuePolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tl_core::SessionId;
    use tl_db::pool::init_memory_pool;

    fn age_job(db: &DbPool, job_id: tl_core::JobId, hours: i64) {
        let at = Utc::now() - chrono::Duration::hours(hours);
        let conn = tl_db::pool::get_conn(db).unwrap();
        conn.execute(
            "UPDATE jobs SET completed_at=?1 WHERE id=?2",
            [tl_db::queries::timestamp(at), job_id.to_string()],
        )
        .unwrap();
    }

    #[test]
    fn run_purge_applies_policy() {
        let db = init_memory_pool().unwrap();
        let id = SessionId::new("abc123").unwrap();
        let (old, recent) = {
            let conn = tl_db::pool::get_conn(&db).unwrap();
            let (old, _) = jobs::enqueue(&conn, &id, 0, 3).unwrap();
            let (recent, _) = jobs::enqueue(&conn, &id, 1, 3).unwrap();
            jobs::complete_job(&conn, old.id).unwrap();
            jobs::complete_job(&conn, recent.id).unwrap();
            (old.id, recent.id)
        };
        age_job(&db, old, 48);

        let service = JobPurgeService::new(db.clone(), QueuePolicy::default(), Duration::from_secs(60));
        let counts = service.run_purge().unwrap();
        assert_eq!(counts, PurgeCounts { completed: 1, failed: 0 });

        let conn = tl_db::pool::get_conn(&db).unwrap();
        assert!(jobs::get_job(&conn, old).unwrap().is_none());
        assert!(jobs::get_job(&conn, recent).unwrap().is_some());
    }

    #[tokio::test]
    async fn background_task_stops_on_cancel() {
        let db = init_memory_pool().unwrap();
        let service = JobPurgeService::new(db, QueuePolicy::default(), Duration::from_millis(10));
        assert_eq!(service.policy().keep_completed_count, 100);

        let cancel = CancellationToken::new();
        let handle = service.start_background_task(cancel.clone());
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
