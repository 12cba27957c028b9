//! # tl-av
//!
//! External tool management and segment transcoding for the tapeline
//! pipeline.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache the path to
//!   ffmpeg.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout
//!   support for running external processes.
//! - **Segment transcoding** ([`SegmentTranscoder`], [`FfmpegTranscoder`])
//!   -- convert one raw recording chunk into one MPEG-TS segment with a
//!   fixed encoding profile.

pub mod command;
pub mod tools;
pub mod transcode;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolOutput};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
pub use transcode::{FfmpegTranscoder, SegmentTranscoder};
