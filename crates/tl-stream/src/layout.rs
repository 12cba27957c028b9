//! On-disk layout of a recording session.
//!
//! ```text
//! {base_dir}/{session_id}/chunk-{index}.{ext}   raw upload, removed once transcoded
//! {base_dir}/{session_id}/segment-{index}.ts    transcoded segment
//! {base_dir}/{session_id}/playlist.m3u8         session manifest
//! {base_dir}/.locks/{session_id}.lock           cross-process session lock
//! ```
//!
//! Lock files live outside the session directory so that they survive its
//! removal. The dot keeps `.locks` from parsing as a session id.

use std::path::{Path, PathBuf};

use tl_core::config::StorageConfig;
use tl_core::{Result, SessionId};
use tl_media::segment_file_name;

/// File name of every session manifest.
pub const PLAYLIST_FILE_NAME: &str = "playlist.m3u8";

/// Directory of the per-session lock files.
pub const LOCK_DIR_NAME: &str = ".locks";

/// Path convention for session files under one storage root.
#[derive(Debug, Clone)]
pub struct SessionLayout {
    base_dir: PathBuf,
    chunk_extension: String,
}

impl SessionLayout {
    pub fn new(base_dir: impl Into<PathBuf>, chunk_extension: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            chunk_extension: chunk_extension.into(),
        }
    }

    pub fn from_config(storage: &StorageConfig) -> Self {
        Self::new(storage.base_dir.clone(), storage.chunk_extension.clone())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn session_dir(&self, session_id: &SessionId) -> PathBuf {
        self.base_dir.join(session_id.as_str())
    }

    pub fn chunk_path(&self, session_id: &SessionId, index: u64) -> PathBuf {
        self.session_dir(session_id)
            .join(format!("chunk-{index}.{}", self.chunk_extension))
    }

    pub fn segment_path(&self, session_id: &SessionId, index: u64) -> PathBuf {
        self.session_dir(session_id).join(segment_file_name(index))
    }

    pub fn playlist_path(&self, session_id: &SessionId) -> PathBuf {
        self.session_dir(session_id).join(PLAYLIST_FILE_NAME)
    }

    pub fn lock_path(&self, session_id: &SessionId) -> PathBuf {
        self.base_dir
            .join(LOCK_DIR_NAME)
            .join(format!("{}.lock", session_id.as_str()))
    }

    /// Create the session directory (and the storage root) if missing.
    pub async fn ensure_session_dir(&self, session_id: &SessionId) -> Result<PathBuf> {
        let dir = self.session_dir(session_id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Session ids of every directory under the storage root.
    ///
    /// Entries that are not directories or whose names are not valid session
    /// ids are skipped. A missing root yields an empty list.
    pub fn list_sessions(&self) -> Result<Vec<SessionId>> {
        let entries = match std::fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut sessions = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            match name.to_str().map(SessionId::new) {
                Some(Ok(id)) => sessions.push(id),
                _ => {
                    tracing::debug!("Skipping foreign directory {:?}", name);
                }
            }
        }
        sessions.sort();
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(s: &str) -> SessionId {
        SessionId::new(s).unwrap()
    }

    #[test]
    fn paths_follow_convention() {
        let layout = SessionLayout::new("/data/sessions", "webm");
        let id = sid("abc123");
        assert_eq!(layout.session_dir(&id), PathBuf::from("/data/sessions/abc123"));
        assert_eq!(
            layout.chunk_path(&id, 4),
            PathBuf::from("/data/sessions/abc123/chunk-4.webm")
        );
        assert_eq!(
            layout.segment_path(&id, 4),
            PathBuf::from("/data/sessions/abc123/segment-4.ts")
        );
        assert_eq!(
            layout.playlist_path(&id),
            PathBuf::from("/data/sessions/abc123/playlist.m3u8")
        );
        assert_eq!(
            layout.lock_path(&id),
            PathBuf::from("/data/sessions/.locks/abc123.lock")
        );
    }

    #[test]
    fn chunk_extension_is_configurable() {
        let layout = SessionLayout::new("/d", "mkv");
        assert_eq!(layout.chunk_path(&sid("s1"), 0), PathBuf::from("/d/s1/chunk-0.mkv"));
    }

    #[tokio::test]
    async fn list_sessions_skips_files_and_bad_names() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SessionLayout::new(dir.path(), "webm");
        assert!(layout.list_sessions().unwrap().is_empty());

        layout.ensure_session_dir(&sid("b-2")).await.unwrap();
        layout.ensure_session_dir(&sid("a_1")).await.unwrap();
        std::fs::create_dir(dir.path().join("not valid")).unwrap();
        std::fs::create_dir(dir.path().join(LOCK_DIR_NAME)).unwrap();
        std::fs::write(dir.path().join("stray.txt"), b"x").unwrap();

        let ids: Vec<String> = layout
            .list_sessions()
            .unwrap()
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(ids, vec!["a_1", "b-2"]);
    }

    #[test]
    fn missing_root_has_no_sessions() {
        let layout = SessionLayout::new("/nonexistent/tapeline/root", "webm");
        assert!(layout.list_sessions().unwrap().is_empty());
    }
}
