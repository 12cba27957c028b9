//! tl-stream: turns recording chunks into a growing HLS asset.
//!
//! This crate ties the other tl-* crates together. It provides:
//!
//! - [`StreamService`], the public operations on a recording session
//! - A per-session manifest manager with atomic rewrites
//! - A worker pool draining the durable chunk queue with retry and backoff
//! - Session finalization, storage reclamation and the session state table
//! - Background retention of finished jobs
//! - Graceful shutdown via signal handling

pub mod context;
pub mod layout;
pub mod lifecycle;
pub mod playlist;
pub mod processor;
pub mod purge;
pub mod registry;
pub mod service;

use std::sync::Arc;
use std::time::Duration;

use tl_av::SegmentTranscoder;
use tl_core::config::Config;
use tl_core::{Error, Result};
use tokio_util::sync::CancellationToken;

pub use context::StreamContext;
pub use layout::SessionLayout;
pub use lifecycle::CleanupReport;
pub use registry::{SessionRegistry, SessionState};
pub use service::{ChunkOutput, StreamService};

/// Open the job database, build the shared context, and restore session
/// states from disk.
pub fn open_service(config: Config, transcoder: Arc<dyn SegmentTranscoder>) -> Result<StreamService> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let db_path = &config.storage.database_path;
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let existed = db_path.exists();
    let db = tl_db::pool::init_pool(&db_path.to_string_lossy())?;
    if !existed {
        tracing::info!("Created job database at {}", db_path.display());
    }

    let ctx = StreamContext::new(config, db, transcoder);
    std::fs::create_dir_all(ctx.layout.base_dir())?;
    ctx.registry.rehydrate(&ctx.layout)?;

    Ok(StreamService::new(ctx))
}

/// Run the worker pool and the purge task until a shutdown signal.
pub async fn start(config: Config, transcoder: Arc<dyn SegmentTranscoder>) -> Result<()> {
    let service = open_service(config, transcoder)?;
    let ctx = service.context().clone();
    processor::recover_orphaned_jobs(&ctx)?;

    let cancel = CancellationToken::new();

    let processor_ctx = ctx.clone();
    let processor_cancel = cancel.clone();
    let processor_handle = tokio::spawn(async move {
        processor::run_workers(processor_ctx, processor_cancel).await;
    });

    let purge = purge::JobPurgeService::new(
        ctx.db.clone(),
        ctx.config.queue.clone(),
        Duration::from_secs(ctx.config.workers.purge_interval_secs.max(1)),
    );
    let purge_handle = purge.start_background_task(cancel.clone());

    tracing::info!(
        base_dir = %ctx.layout.base_dir().display(),
        transcoder = ctx.transcoder.name(),
        "tapeline running"
    );

    shutdown_signal(cancel.clone()).await?;

    // Signal all background tasks to stop.
    cancel.cancel();
    let (processor_result, purge_result) = tokio::join!(processor_handle, purge_handle);
    if let Err(e) = processor_result.and(purge_result) {
        return Err(Error::Internal(format!("Background task failed: {e}")));
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal(cancel: CancellationToken) -> Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let terminate = terminate.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        result = ctrl_c => result?,
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
    Ok(())
}
