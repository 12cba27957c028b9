//! Configuration, read from a JSON file.
//!
//! Sections: storage layout, the queue's retry and retention policy, the
//! worker pool, transcoding and tool paths. An empty `{}` is a complete
//! config.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub queue: QueuePolicy,
    pub workers: WorkerConfig,
    pub transcode: TranscodeConfig,
    pub tools: ToolsConfig,
}

impl Config {
    /// Parse JSON; absent sections and fields take their defaults.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Read `path` if given. A missing or unparsable file is logged and the
    /// defaults are used instead.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Settings that are accepted but probably not what was meant.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.storage.chunk_extension.is_empty()
            || self.storage.chunk_extension.contains(['/', '\\', '.'])
        {
            warnings.push(format!(
                "storage.chunk_extension {:?} is not a plain file extension",
                self.storage.chunk_extension
            ));
        }

        if self.queue.max_attempts == 0 {
            warnings.push("queue.max_attempts is 0; failed jobs are never retried".into());
        }

        if self.queue.keep_completed_count == 0 {
            warnings.push("queue.keep_completed_count is 0; completed jobs are purged immediately".into());
        }

        if self.workers.count == 0 {
            warnings.push("workers.count is 0; a single worker will be started".into());
        }

        if self.transcode.timeout_secs == 0 {
            warnings.push("transcode.timeout_secs is 0; every conversion will time out".into());
        }

        if let Some(ref p) = self.tools.ffmpeg_path {
            if !p.exists() {
                warnings.push(format!("tools.ffmpeg_path does not exist: {}", p.display()));
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Where session files and the job database live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory; each session gets `{base_dir}/{session_id}`.
    pub base_dir: PathBuf,
    /// Extension of raw chunk files as uploaded by the recorder.
    pub chunk_extension: String,
    /// SQLite file backing the job queue.
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./data/sessions"),
            chunk_extension: "webm".into(),
            database_path: PathBuf::from("./data/tapeline.db"),
        }
    }
}

/// Retry, backoff and retention policy of the processing queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueuePolicy {
    /// Total attempts per job, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on every further retry.
    pub backoff_delay_ms: u64,
    /// Completed jobs older than this are purged.
    pub keep_completed_secs: u64,
    /// At most this many completed jobs are kept.
    pub keep_completed_count: u32,
    /// Permanently failed jobs older than this are purged.
    pub keep_failed_secs: u64,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_delay_ms: 5_000,
            keep_completed_secs: 24 * 60 * 60,
            keep_completed_count: 100,
            keep_failed_secs: 7 * 24 * 60 * 60,
        }
    }
}

impl QueuePolicy {
    /// Delay before re-running a job whose `attempt`-th run (1-based) failed.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_delay_ms.saturating_mul(1u64 << exponent))
    }

    pub fn keep_completed(&self) -> Duration {
        Duration::from_secs(self.keep_completed_secs)
    }

    pub fn keep_failed(&self) -> Duration {
        Duration::from_secs(self.keep_failed_secs)
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent workers pulling from the queue.
    pub count: usize,
    /// Idle poll interval when no job is ready.
    pub poll_interval_ms: u64,
    /// How often the retention purge runs.
    pub purge_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 4,
            poll_interval_ms: 500,
            purge_interval_secs: 3600,
        }
    }
}

/// Segment transcoding settings.
///
/// The encoding profile itself is fixed; only the wall-clock bound is
/// tunable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    pub timeout_secs: u64,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self { timeout_secs: 120 }
    }
}

impl TranscodeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Custom paths to external tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert_eq!(cfg.storage.base_dir, PathBuf::from("./data/sessions"));
        assert_eq!(cfg.storage.chunk_extension, "webm");
        assert_eq!(cfg.workers.count, 4);
        assert_eq!(cfg.transcode.timeout_secs, 120);
    }

    #[test]
    fn default_config_no_warnings() {
        let cfg = Config::default();
        let warnings = cfg.validate();
        assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);
    }

    #[test]
    fn default_queue_policy_values() {
        let p = QueuePolicy::default();
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.backoff_delay_ms, 5_000);
        assert_eq!(p.keep_completed(), Duration::from_secs(86_400));
        assert_eq!(p.keep_completed_count, 100);
        assert_eq!(p.keep_failed(), Duration::from_secs(604_800));
    }

    #[test]
    fn backoff_is_exponential_from_five_seconds() {
        let p = QueuePolicy::default();
        assert_eq!(p.backoff_for(1), Duration::from_secs(5));
        assert_eq!(p.backoff_for(2), Duration::from_secs(10));
        assert_eq!(p.backoff_for(3), Duration::from_secs(20));
    }

    #[test]
    fn bad_chunk_extension_warns() {
        let mut cfg = Config::default();
        cfg.storage.chunk_extension = "../webm".into();
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.contains("chunk_extension")));
    }

    #[test]
    fn zero_workers_warns() {
        let mut cfg = Config::default();
        cfg.workers.count = 0;
        assert!(cfg.validate().iter().any(|w| w.contains("workers.count")));
    }

    #[test]
    fn parse_json_config() {
        let json = r#"{"queue": {"max_attempts": 5}, "storage": {"chunk_extension": "mkv"}}"#;
        let cfg = Config::from_json(json).unwrap();
        assert_eq!(cfg.queue.max_attempts, 5);
        assert_eq!(cfg.queue.backoff_delay_ms, 5_000);
        assert_eq!(cfg.storage.chunk_extension, "mkv");
    }

    #[test]
    fn parse_empty_json_uses_defaults() {
        let cfg = Config::from_json("{}").unwrap();
        assert_eq!(cfg.queue, QueuePolicy::default());
    }

    #[test]
    fn parse_invalid_json_is_validation_error() {
        let err = Config::from_json("{not json").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn load_or_default_with_none() {
        let cfg = Config::load_or_default(None);
        assert_eq!(cfg.workers.count, 4);
    }

    #[test]
    fn load_or_default_with_missing_file() {
        let cfg = Config::load_or_default(Some(Path::new("/nonexistent/config.json")));
        assert_eq!(cfg.workers.count, 4);
    }
}
