//! Chunk-to-segment transcoding.
//!
//! Every raw recording chunk becomes exactly one MPEG-TS segment encoded with
//! a fixed, player-friendly profile. The transcoder keeps no per-session
//! state, so any number of conversions may run at once, including several
//! for the same session.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tl_core::{Error, Result};
use tl_media::segment_file_name;

use crate::command::ToolCommand;
use crate::tools::ToolRegistry;

/// Nominal segment length handed to the segment muxer, in seconds.
const SEGMENT_TIME_SECS: u32 = 5;

/// Converts one raw chunk into one playable segment.
#[async_trait]
pub trait SegmentTranscoder: Send + Sync {
    /// A short name for logs (e.g. "ffmpeg").
    fn name(&self) -> &'static str;

    /// Convert `chunk` into the segment file `output` for chunk `chunk_index`.
    ///
    /// On success the raw chunk is removed (best effort). On failure it is
    /// left in place for a retry and the diagnostic output is returned as
    /// [`Error::Transcode`].
    async fn convert(&self, chunk: &Path, output: &Path, chunk_index: u64) -> Result<()>;
}

/// [`SegmentTranscoder`] backed by an ffmpeg subprocess.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
    timeout: Duration,
}

impl FfmpegTranscoder {
    /// Create a transcoder using the ffmpeg found in `tools`.
    pub fn new(tools: &ToolRegistry, timeout: Duration) -> Result<Self> {
        let ffmpeg = tools.require("ffmpeg")?;
        Ok(Self {
            ffmpeg: ffmpeg.path.clone(),
            timeout,
        })
    }

    /// Create a transcoder for an explicit ffmpeg executable without checking
    /// that it exists; a missing binary surfaces on the first conversion.
    pub fn with_path(ffmpeg: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            timeout,
        }
    }

    /// Build the fixed ffmpeg argument list.
    ///
    /// `pattern` is the segment muxer's `%d` output template; the segment
    /// number starts at `chunk_index` so the first (and normally only)
    /// output file is named after the chunk.
    pub fn segment_args(chunk: &Path, pattern: &Path, chunk_index: u64) -> Vec<String> {
        let segment_time = SEGMENT_TIME_SECS.to_string();
        let start_number = chunk_index.to_string();
        let input = chunk.to_string_lossy().into_owned();
        let output = pattern.to_string_lossy().into_owned();

        [
            "-hide_banner", "-nostdin", "-loglevel", "error", "-y",
            "-i", input.as_str(),
            // Video: constrained H.264 for the widest player support.
            "-c:v", "libx264", "-profile:v", "baseline", "-level", "3.0",
            "-pix_fmt", "yuv420p", "-preset", "veryfast", "-crf", "23",
            "-maxrate", "1M", "-bufsize", "2M",
            // Audio.
            "-c:a", "aac", "-b:a", "128k", "-ar", "44100", "-ac", "2",
            // Muxing.
            "-f", "segment", "-segment_format", "mpegts",
            "-segment_time", segment_time.as_str(),
            "-segment_start_number", start_number.as_str(),
            "-reset_timestamps", "1",
            output.as_str(),
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }
}

#[async_trait]
impl SegmentTranscoder for FfmpegTranscoder {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn convert(&self, chunk: &Path, output: &Path, chunk_index: u64) -> Result<()> {
        if !chunk.exists() {
            return Err(Error::not_found("chunk", chunk.display()));
        }

        let expected_name = segment_file_name(chunk_index);
        if output.file_name().and_then(|n| n.to_str()) != Some(expected_name.as_str()) {
            return Err(Error::Validation(format!(
                "segment output {} does not match chunk index {chunk_index}",
                output.display()
            )));
        }
        let dir = output.parent().unwrap_or_else(|| Path::new("."));
        let pattern = dir.join("segment-%d.ts");

        tracing::debug!(
            chunk = %chunk.display(),
            output = %output.display(),
            chunk_index,
            "Transcoding chunk"
        );

        let mut cmd = ToolCommand::new(self.ffmpeg.clone());
        cmd.timeout(self.timeout);
        cmd.args(Self::segment_args(chunk, &pattern, chunk_index));

        if let Err(e) = cmd.execute().await {
            let message = match e {
                Error::Tool { message, .. } => message,
                other => other.to_string(),
            };
            return Err(Error::transcode(chunk_index, message));
        }

        if !output.exists() {
            return Err(Error::transcode(
                chunk_index,
                format!("ffmpeg produced no segment at {}", output.display()),
            ));
        }

        remove_chunk(chunk);
        Ok(())
    }
}

/// Delete a consumed raw chunk; a chunk that is already gone is fine.
pub fn remove_chunk(chunk: &Path) {
    match std::fs::remove_file(chunk) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("Chunk {} already removed", chunk.display());
        }
        Err(e) => {
            tracing::warn!("Failed to remove chunk {}: {e}", chunk.display());
        }
    }
}
