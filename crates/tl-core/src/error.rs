//! Unified error type for the tapeline pipeline.
//!
//! All crates funnel their failures into [`Error`], which carries enough
//! context for the job processor to decide via [`Error::is_retryable`]
//! whether a failed attempt should be scheduled again.

use std::fmt;

/// Unified error type covering all failure modes in tapeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Bad input: a malformed session id, config, or output path.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The job database failed; the queue cannot make progress.
    #[error("Database error: {source}")]
    Database {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// An external tool could not be located or spawned, or exited non-zero.
    #[error("Tool error [{tool}]: {message}")]
    Tool { tool: String, message: String },

    /// Converting a raw chunk into a playable segment failed.
    ///
    /// The message carries the transcoder's diagnostic output.
    #[error("Transcode error [chunk {chunk_index}]: {message}")]
    Transcode { chunk_index: u64, message: String },

    /// The session manifest could not be parsed or written.
    #[error("Playlist error: {0}")]
    Playlist(String),

    /// The session no longer accepts the requested operation (finalized,
    /// reclaimed, or its directory disappeared).
    #[error("Session {session_id} is {state}")]
    SessionClosed { session_id: String, state: String },

    /// A background task died, or a similar bug.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a job that failed with this error should be attempted again.
    ///
    /// Lifecycle misuse and invalid input will fail identically on every
    /// attempt; everything else may be transient.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::SessionClosed { .. } | Error::Validation(_) | Error::NotFound { .. }
        )
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Database`].
    pub fn database(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Database {
            source: source.into(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Transcode`].
    pub fn transcode(chunk_index: u64, message: impl Into<String>) -> Self {
        Error::Transcode {
            chunk_index,
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::SessionClosed`].
    pub fn session_closed(session_id: impl fmt::Display, state: impl fmt::Display) -> Self {
        Error::SessionClosed {
            session_id: session_id.to_string(),
            state: state.to_string(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
