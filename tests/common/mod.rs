//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which builds a full [`StreamService`] over a
//! temporary storage directory and an on-disk job database, with a
//! [`FakeTranscoder`] standing in for ffmpeg.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Mutex;

use tl_av::SegmentTranscoder;
use tl_core::config::Config;
use tl_core::{Error, Result, SessionId};
use tl_db::models::JobStats;
use tl_db::pool::PooledConnection;
use tl_stream::{StreamContext, StreamService};

/// Writes a tiny segment and consumes the chunk, failing chosen chunks a
/// fixed number of times first.
#[derive(Default)]
pub struct FakeTranscoder {
    failures: Mutex<HashMap<u64, u32>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl FakeTranscoder {
    /// Fail `chunk_index` on its next `times` conversions.
    pub async fn fail(&self, chunk_index: u64, times: u32) {
        self.failures.lock().await.insert(chunk_index, times);
    }

    /// Fail `chunk_index` on every conversion.
    pub async fn fail_always(&self, chunk_index: u64) {
        self.fail(chunk_index, u32::MAX).await;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SegmentTranscoder for FakeTranscoder {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn convert(&self, chunk: &Path, output: &Path, chunk_index: u64) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        {
            let mut failures = self.failures.lock().await;
            if let Some(left) = failures.get_mut(&chunk_index) {
                if *left > 0 {
                    *left = left.saturating_sub(1);
                    return Err(Error::transcode(
                        chunk_index,
                        "Invalid data found when processing input",
                    ));
                }
            }
        }

        tokio::fs::write(output, format!("ts-{chunk_index}")).await?;
        tokio::fs::remove_file(chunk).await?;
        Ok(())
    }
}

/// Test harness wrapping a [`StreamService`] over a temporary directory.
pub struct TestHarness {
    pub dir: TempDir,
    pub service: StreamService,
    pub transcoder: Arc<FakeTranscoder>,
}

impl TestHarness {
    /// Default policy except for a zero retry backoff.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Transcoder conversions take `delay` each, so workers overlap.
    pub fn with_delay(delay: Duration, adjust: impl FnOnce(&mut Config)) -> Self {
        Self::build(delay, adjust)
    }

    pub fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        Self::build(Duration::ZERO, adjust)
    }

    fn build(delay: Duration, adjust: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");

        let mut config = Config::default();
        config.storage.base_dir = dir.path().join("sessions");
        config.storage.database_path = dir.path().join("tapeline.db");
        config.queue.backoff_delay_ms = 0;
        config.workers.poll_interval_ms = 20;
        adjust(&mut config);

        let transcoder = Arc::new(FakeTranscoder {
            delay,
            ..FakeTranscoder::default()
        });
        let service = tl_stream::open_service(config, transcoder.clone())
            .expect("failed to open service");

        Self {
            dir,
            service,
            transcoder,
        }
    }

    /// A second service on the same storage root and database, the way
    /// another process would open it.
    pub fn reopen(&self) -> StreamService {
        let config = (*self.ctx().config).clone();
        tl_stream::open_service(config, self.transcoder.clone()).expect("failed to reopen service")
    }

    pub fn ctx(&self) -> &StreamContext {
        self.service.context()
    }

    pub fn conn(&self) -> PooledConnection {
        tl_db::pool::get_conn(&self.ctx().db).expect("failed to get connection")
    }

    pub fn stats(&self) -> JobStats {
        tl_db::queries::jobs::job_stats(&self.conn()).expect("failed to read job stats")
    }

    /// Manifest text of the session; panics if there is none.
    pub fn manifest(&self, session: &SessionId) -> String {
        let path = self.service.get_playlist_path(session);
        std::fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("no manifest at {}: {e}", path.display()))
    }

    /// Segment URIs listed in the session manifest, in order.
    pub fn manifest_uris(&self, session: &SessionId) -> Vec<String> {
        self.manifest(session)
            .lines()
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect()
    }

    /// Process queued jobs on this task until none is ready.
    pub async fn drain(&self) {
        while tl_stream::processor::process_next_job(self.ctx(), "test-worker")
            .await
            .expect("job processing failed")
        {}
    }
}

pub fn session(id: &str) -> SessionId {
    SessionId::new(id).expect("invalid session id")
}

/// Every ordering of `items`.
pub fn permutations(items: &[u64]) -> Vec<Vec<u64>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut out = Vec::new();
    for (i, &first) in items.iter().enumerate() {
        let mut rest = items.to_vec();
        rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, first);
            out.push(tail);
        }
    }
    out
}
