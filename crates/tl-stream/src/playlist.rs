//! Authoritative per-session manifest.
//!
//! Every change is a read-parse-modify-serialize cycle under a
//! [`SessionLock`], followed by a write to a temporary file in the session
//! directory and a rename over `playlist.m3u8`. Readers therefore only ever
//! observe a complete manifest, and a failed write leaves the previous one in
//! place.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use fs2::FileExt;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tl_core::{Error, Result, SessionId};
use tl_media::{generate_media_playlist, parse_media_playlist, MediaPlaylist, PlaylistEntry};

use crate::layout::SessionLayout;

/// Exclusive right to change one session's files.
///
/// Holds the in-process mutex and an advisory lock on the session's lock
/// file, so tasks of this process and other processes on the same storage
/// root are both kept out. Released on drop.
#[derive(Debug)]
pub struct SessionLock {
    session_id: SessionId,
    _file: File,
    _guard: OwnedMutexGuard<()>,
}

impl SessionLock {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

/// Serializes manifest updates per session.
#[derive(Debug)]
pub struct PlaylistManager {
    layout: Arc<SessionLayout>,
    locks: DashMap<SessionId, Arc<Mutex<()>>>,
}

impl PlaylistManager {
    pub fn new(layout: Arc<SessionLayout>) -> Self {
        Self {
            layout,
            locks: DashMap::new(),
        }
    }

    /// Acquire the session's lock. Hold it across the whole
    /// read-modify-write.
    pub async fn lock(&self, session_id: &SessionId) -> Result<SessionLock> {
        let mutex = self
            .locks
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;

        let path = self.layout.lock_path(session_id);
        let file = tokio::task::spawn_blocking(move || lock_file(&path))
            .await
            .map_err(|e| Error::Internal(format!("session lock task failed: {e}")))??;

        Ok(SessionLock {
            session_id: session_id.clone(),
            _file: file,
            _guard: guard,
        })
    }

    /// Drop the in-process lock entry of a reclaimed session.
    pub fn forget(&self, session_id: &SessionId) {
        self.locks.remove(session_id);
    }

    /// Current manifest, or `None` if the session has none yet.
    pub async fn read(&self, session_id: &SessionId) -> Result<Option<MediaPlaylist>> {
        read_playlist(&self.layout.playlist_path(session_id)).await
    }

    /// Insert `entry` (replacing one with the same index), re-sort, and
    /// rewrite the manifest. Returns the manifest path.
    ///
    /// Fails with [`Error::SessionClosed`] if the manifest is already
    /// finalized or the session directory no longer exists.
    pub async fn append_segment(&self, lock: &SessionLock, entry: PlaylistEntry) -> Result<PathBuf> {
        let session_id = lock.session_id();
        let dir = self.layout.session_dir(session_id);
        if !tokio::fs::try_exists(&dir).await? {
            return Err(Error::session_closed(session_id, "gone"));
        }

        let path = self.layout.playlist_path(session_id);
        let mut playlist = read_playlist(&path).await?.unwrap_or_default();
        if playlist.ended {
            return Err(Error::session_closed(session_id, "finalized"));
        }

        let index = entry.index;
        let replaced = playlist.upsert(entry);
        playlist.recompute_target_duration();
        let segments = playlist.entries.len();
        write_atomic(dir, path.clone(), generate_media_playlist(&playlist)).await?;

        tracing::debug!(
            session_id = %session_id,
            chunk_index = index,
            replaced,
            segments,
            "Manifest updated"
        );
        Ok(path)
    }

    /// Add the end marker. Returns `false` if it was already present, in which
    /// case the file is not touched.
    ///
    /// A session without a manifest gets an empty, ended one. The caller
    /// decides whether the session may still be written.
    pub async fn finalize(&self, lock: &SessionLock) -> Result<bool> {
        let session_id = lock.session_id();
        let dir = self.layout.ensure_session_dir(session_id).await?;
        let path = self.layout.playlist_path(session_id);
        let mut playlist = read_playlist(&path).await?.unwrap_or_default();
        if playlist.ended {
            return Ok(false);
        }

        playlist.ended = true;
        playlist.recompute_target_duration();
        write_atomic(dir, path, generate_media_playlist(&playlist)).await?;
        Ok(true)
    }
}

/// Open (creating if needed) and exclusively lock `path`. Blocks.
fn lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    file.lock_exclusive()?;
    Ok(file)
}

async fn read_playlist(path: &Path) -> Result<Option<MediaPlaylist>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => parse_media_playlist(&text).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write `contents` to `path` through a temporary file in `dir`.
async fn write_atomic(dir: PathBuf, path: PathBuf, contents: String) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut tmp = tempfile::Builder::new()
            .prefix(".playlist-")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(|e| Error::Playlist(format!("failed to create temp manifest: {e}")))?;

        tmp.write_all(contents.as_bytes())
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| Error::Playlist(format!("failed to write temp manifest: {e}")))?;

        tmp.persist(&path).map_err(|e| {
            Error::Playlist(format!("failed to replace {}: {}", path.display(), e.error))
        })?;
        Ok(())
    })
    .await
    .map_err(|e| Error::Internal(format!("manifest write task failed: {e}")))?
}
