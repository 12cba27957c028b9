//! Public facade over the streaming pipeline.
//!
//! A chunk is either processed inline ([`StreamService::process_chunk`]) or
//! handed to the durable queue ([`StreamService::submit_chunk`]) for the
//! worker pool. Both paths end in [`process_stored_chunk`].

use std::path::PathBuf;

use serde::Serialize;
use tl_core::events::{Event, EventPayload};
use tl_core::{Error, JobId, Result, SessionId};
use tl_db::models::{SegmentRecord, SegmentStatus};
use tl_db::queries::{jobs, segments};
use tl_media::{PlaylistEntry, SEGMENT_DURATION_SECS};

use crate::context::StreamContext;
use crate::lifecycle::{self, CleanupReport};
use crate::registry::SessionState;

/// Files produced by processing one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkOutput {
    pub segment_path: PathBuf,
    pub playlist_path: PathBuf,
}

#[derive(Clone)]
pub struct StreamService {
    ctx: StreamContext,
}

impl StreamService {
    pub fn new(ctx: StreamContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &StreamContext {
        &self.ctx
    }

    /// Store, transcode and append one chunk before returning.
    ///
    /// On failure the chunk stays on disk and its segment record is marked
    /// failed; the manifest is not changed.
    pub async fn process_chunk(
        &self,
        session_id: &SessionId,
        chunk_index: u64,
        payload: &[u8],
    ) -> Result<ChunkOutput> {
        self.store_chunk(session_id, chunk_index, payload).await?;

        match process_stored_chunk(&self.ctx, session_id, chunk_index).await {
            Ok(output) => Ok(output),
            Err(e) => {
                mark_segment_failed(&self.ctx, session_id, chunk_index, &e);
                Err(e)
            }
        }
    }

    /// Store one chunk and queue it for the worker pool.
    pub async fn submit_chunk(
        &self,
        session_id: &SessionId,
        chunk_index: u64,
        payload: &[u8],
    ) -> Result<JobId> {
        self.store_chunk(session_id, chunk_index, payload).await?;

        let max_attempts = self.ctx.config.queue.max_attempts;
        let conn = tl_db::pool::get_conn(&self.ctx.db)?;
        let (job, created) = jobs::enqueue(&conn, session_id, chunk_index, max_attempts)?;
        drop(conn);

        if created {
            tracing::debug!(
                session_id = %session_id,
                chunk_index,
                job_id = %job.id,
                "Chunk queued"
            );
            self.ctx.event_bus.broadcast(EventPayload::JobQueued {
                job_id: job.id,
                session_id: session_id.clone(),
                chunk_index,
            });
        }
        self.ctx.job_notify.notify_one();
        Ok(job.id)
    }

    /// Close the session's manifest. Returns the manifest path.
    pub async fn finalize_playlist(&self, session_id: &SessionId) -> Result<PathBuf> {
        lifecycle::finalize(&self.ctx, session_id).await
    }

    /// Reclaim every file of the session.
    pub async fn cleanup(&self, session_id: &SessionId) -> CleanupReport {
        lifecycle::cleanup(&self.ctx, session_id).await
    }

    /// Where the session's manifest lives (whether or not it exists yet).
    pub fn get_playlist_path(&self, session_id: &SessionId) -> PathBuf {
        self.ctx.layout.playlist_path(session_id)
    }

    pub fn session_state(&self, session_id: &SessionId) -> Result<Option<SessionState>> {
        self.ctx.registry.get(session_id)
    }

    /// The session's latest lifecycle events, newest first.
    pub fn session_events(&self, session_id: &SessionId, n: usize) -> Vec<Event> {
        self.ctx.event_bus.session_history(session_id, n)
    }

    /// Segment records of the session, by chunk index.
    pub fn segments(&self, session_id: &SessionId) -> Result<Vec<SegmentRecord>> {
        let conn = tl_db::pool::get_conn(&self.ctx.db)?;
        segments::list_segments(&conn, session_id)
    }

    /// Write the chunk payload to its place in the session directory.
    ///
    /// A chunk uploaded again replaces the earlier payload. The state check
    /// and the write share the session lock, so a concurrent cleanup either
    /// removes the chunk or rejects it.
    async fn store_chunk(
        &self,
        session_id: &SessionId,
        chunk_index: u64,
        payload: &[u8],
    ) -> Result<PathBuf> {
        let _lock = self.ctx.playlists.lock(session_id).await?;
        self.ctx.registry.ensure_recording(session_id)?;
        self.ctx.layout.ensure_session_dir(session_id).await?;

        let path = self.ctx.layout.chunk_path(session_id, chunk_index);
        tokio::fs::write(&path, payload).await?;
        tracing::debug!(
            session_id = %session_id,
            chunk_index,
            bytes = payload.len(),
            "Chunk stored"
        );
        Ok(path)
    }
}

/// Turn a stored chunk into a listed segment.
///
/// Safe to repeat: when the chunk was already consumed but its segment
/// exists, only the (idempotent) manifest append is redone.
pub(crate) async fn process_stored_chunk(
    ctx: &StreamContext,
    session_id: &SessionId,
    chunk_index: u64,
) -> Result<ChunkOutput> {
    ctx.registry.ensure_not_reclaimed(session_id)?;
    if !tokio::fs::try_exists(ctx.layout.session_dir(session_id)).await? {
        return Err(Error::session_closed(session_id, "gone"));
    }

    let chunk_path = ctx.layout.chunk_path(session_id, chunk_index);
    let segment_path = ctx.layout.segment_path(session_id, chunk_index);
    let chunk_present = tokio::fs::try_exists(&chunk_path).await?;

    if chunk_present {
        {
            let conn = tl_db::pool::get_conn(&ctx.db)?;
            segments::upsert_pending(
                &conn,
                session_id,
                chunk_index,
                &segment_path.to_string_lossy(),
                f64::from(SEGMENT_DURATION_SECS),
            )?;
        }

        ctx.transcoder
            .convert(&chunk_path, &segment_path, chunk_index)
            .await?;

        let conn = tl_db::pool::get_conn(&ctx.db)?;
        segments::set_status(&conn, session_id, chunk_index, SegmentStatus::Transcoded, None)?;
    } else if tokio::fs::try_exists(&segment_path).await? {
        tracing::debug!(
            session_id = %session_id,
            chunk_index,
            "Chunk already transcoded; re-appending segment"
        );
    } else {
        return Err(Error::not_found("chunk", chunk_path.display()));
    }

    let playlist_path = {
        let lock = ctx.playlists.lock(session_id).await?;
        ctx.playlists
            .append_segment(&lock, PlaylistEntry::for_index(chunk_index))
            .await?
    };

    {
        let conn = tl_db::pool::get_conn(&ctx.db)?;
        segments::set_status(&conn, session_id, chunk_index, SegmentStatus::Appended, None)?;
    }

    tracing::info!(session_id = %session_id, chunk_index, "Segment appended");
    ctx.event_bus.broadcast(EventPayload::SegmentAppended {
        session_id: session_id.clone(),
        chunk_index,
    });

    Ok(ChunkOutput {
        segment_path,
        playlist_path,
    })
}

/// Record a permanent failure on the segment; never fails itself.
pub(crate) fn mark_segment_failed(
    ctx: &StreamContext,
    session_id: &SessionId,
    chunk_index: u64,
    error: &Error,
) {
    let message = error.to_string();
    let result = tl_db::pool::get_conn(&ctx.db).and_then(|conn| {
        segments::set_status(
            &conn,
            session_id,
            chunk_index,
            SegmentStatus::Failed,
            Some(&message),
        )
    });
    if let Err(e) = result {
        tracing::warn!(
            session_id = %session_id,
            chunk_index,
            "Failed to record segment failure: {e}"
        );
    }
}
