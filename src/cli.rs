use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tapeline")]
#[command(author, version, about = "Live recording chunks to HLS, as they arrive")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the worker pool until interrupted
    Run,

    /// Store one recording chunk and turn it into a segment
    Ingest {
        /// Session identifier
        session: String,

        /// Zero-based chunk index
        index: u64,

        /// File holding the chunk payload
        file: PathBuf,

        /// Queue the chunk for the worker pool instead of processing it now
        #[arg(long)]
        queue: bool,
    },

    /// Close a session's playlist
    Finalize {
        /// Session identifier
        session: String,
    },

    /// Delete every file of a session
    Cleanup {
        /// Session identifier
        session: String,
    },

    /// Show a session's state and segments
    Status {
        /// Session identifier
        session: String,
    },

    /// List queued and finished jobs
    Jobs {
        /// Only jobs with this status (queued, active, retrying, completed, failed)
        #[arg(long)]
        status: Option<String>,

        /// Only jobs of this session
        #[arg(long)]
        session: Option<String>,

        /// Maximum number of jobs to list
        #[arg(long, default_value = "50")]
        limit: i64,
    },

    /// Delete finished jobs outside the retention policy
    Purge,

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
