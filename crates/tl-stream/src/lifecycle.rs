//! Session finalization and storage reclamation.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tl_core::events::EventPayload;
use tl_core::{Result, SessionId};

use crate::context::StreamContext;

/// What a [`cleanup`] pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub removed_files: usize,
    /// Files that could not be removed; logged at warn.
    pub failed_files: usize,
    pub removed_dir: bool,
    pub cancelled_jobs: usize,
}

/// Close a session's manifest with the end marker.
///
/// Idempotent: a second call leaves the file byte-identical. A session that
/// never produced a segment gets an empty, ended manifest.
pub async fn finalize(ctx: &StreamContext, session_id: &SessionId) -> Result<PathBuf> {
    let changed = {
        let lock = ctx.playlists.lock(session_id).await?;
        // Under the lock: cleanup marks the session before it takes it.
        ctx.registry.mark_finalized(session_id)?;
        ctx.playlists.finalize(&lock).await?
    };

    if changed {
        tracing::info!(session_id = %session_id, "Session finalized");
        ctx.event_bus.broadcast(EventPayload::SessionFinalized {
            session_id: session_id.clone(),
        });
    } else {
        tracing::debug!(session_id = %session_id, "Session already finalized");
    }

    Ok(ctx.layout.playlist_path(session_id))
}

/// Remove every file of a session, then its directory, and mark it
/// reclaimed.
///
/// Best effort: files already gone are ignored and other failures are
/// logged without aborting. Waiting jobs of the session are cancelled.
/// Calling it again is harmless.
pub async fn cleanup(ctx: &StreamContext, session_id: &SessionId) -> CleanupReport {
    let newly_reclaimed = ctx.registry.mark_reclaimed(session_id).unwrap_or_else(|e| {
        tracing::warn!(session_id = %session_id, "Failed to record reclaimed state: {e}");
        true
    });

    let mut report = CleanupReport {
        cancelled_jobs: cancel_jobs(ctx, session_id),
        ..CleanupReport::default()
    };

    {
        // No manifest or chunk write may interleave with the removal.
        let lock = ctx.playlists.lock(session_id).await;
        if let Err(e) = &lock {
            tracing::warn!(session_id = %session_id, "Removing session files unlocked: {e}");
        }
        remove_session_dir(&ctx.layout.session_dir(session_id), &mut report).await;
    }
    ctx.playlists.forget(session_id);

    match tl_db::pool::get_conn(&ctx.db)
        .and_then(|conn| tl_db::queries::segments::delete_session_segments(&conn, session_id))
    {
        Ok(n) => tracing::debug!(session_id = %session_id, records = n, "Segment records removed"),
        Err(e) => tracing::warn!(session_id = %session_id, "Failed to remove segment records: {e}"),
    }

    if newly_reclaimed {
        tracing::info!(
            session_id = %session_id,
            files = report.removed_files,
            failed = report.failed_files,
            cancelled_jobs = report.cancelled_jobs,
            "Session reclaimed"
        );
        ctx.event_bus.broadcast(EventPayload::SessionReclaimed {
            session_id: session_id.clone(),
        });
    }

    report
}

fn cancel_jobs(ctx: &StreamContext, session_id: &SessionId) -> usize {
    let result = tl_db::pool::get_conn(&ctx.db).and_then(|conn| {
        tl_db::queries::jobs::cancel_session_jobs(&conn, session_id, "session reclaimed")
    });
    match result {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(session_id = %session_id, "Failed to cancel queued jobs: {e}");
            0
        }
    }
}

async fn remove_session_dir(dir: &Path, report: &mut CleanupReport) {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("Session directory {} already removed", dir.display());
            return;
        }
        Err(e) => {
            tracing::warn!("Failed to list {}: {e}", dir.display());
            return;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Failed to list {}: {e}", dir.display());
                break;
            }
        };

        let path = entry.path();
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        let result = if is_dir {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };

        match result {
            Ok(()) => report.removed_files += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("{} already removed", path.display());
            }
            Err(e) => {
                report.failed_files += 1;
                tracing::warn!("Failed to remove {}: {e}", path.display());
            }
        }
    }

    match tokio::fs::remove_dir(dir).await {
        Ok(()) => report.removed_dir = true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("Session directory {} already removed", dir.display());
        }
        Err(e) => tracing::warn!("Failed to remove {}: {e}", dir.display()),
    }
}
