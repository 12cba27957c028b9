//! Session state, kept in the `sessions` table.
//!
//! The table is the only copy, so every process on the same database sees
//! the same state and a reclaimed session stays reclaimed after a restart.
//! Unknown sessions start in `Recording` on their first chunk.

use tl_core::{Error, Result, SessionId};
use tl_db::pool::{get_conn, DbPool};
use tl_db::queries::sessions;
use tl_media::parse_media_playlist;

use crate::layout::SessionLayout;

pub use tl_db::models::SessionState;

pub struct SessionRegistry {
    db: DbPool,
}

impl SessionRegistry {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub fn get(&self, session_id: &SessionId) -> Result<Option<SessionState>> {
        sessions::get_state(&*get_conn(&self.db)?, session_id)
    }

    /// Fail with [`Error::SessionClosed`] if the session is reclaimed.
    pub fn ensure_not_reclaimed(&self, session_id: &SessionId) -> Result<()> {
        match self.get(session_id)? {
            Some(SessionState::Reclaimed) => {
                Err(Error::session_closed(session_id, SessionState::Reclaimed))
            }
            _ => Ok(()),
        }
    }

    /// Register the session as recording if unknown.
    ///
    /// Fails with [`Error::SessionClosed`] once the session was finalized or
    /// reclaimed.
    pub fn ensure_recording(&self, session_id: &SessionId) -> Result<()> {
        let (state, created) = sessions::start_recording(&*get_conn(&self.db)?, session_id)?;
        if created {
            tracing::debug!(session_id = %session_id, "New recording session");
        }
        match state {
            SessionState::Recording => Ok(()),
            state => Err(Error::session_closed(session_id, state)),
        }
    }

    /// Move to `Finalized`. Returns `false` if the session already was.
    pub fn mark_finalized(&self, session_id: &SessionId) -> Result<bool> {
        match sessions::finalize(&*get_conn(&self.db)?, session_id)? {
            (SessionState::Reclaimed, _) => {
                Err(Error::session_closed(session_id, SessionState::Reclaimed))
            }
            (_, changed) => Ok(changed),
        }
    }

    /// Move to `Reclaimed` from any state. Returns `false` if the session
    /// already was.
    pub fn mark_reclaimed(&self, session_id: &SessionId) -> Result<bool> {
        sessions::reclaim(&*get_conn(&self.db)?, session_id)
    }

    /// Number of known sessions in `state`.
    pub fn count(&self, state: SessionState) -> Result<usize> {
        sessions::count_in_state(&*get_conn(&self.db)?, state)
    }

    /// Record session directories the table does not know yet.
    ///
    /// A directory whose manifest carries the end marker is `Finalized`; any
    /// other is `Recording`. Known sessions keep their stored state. Returns
    /// the number of sessions added.
    pub fn rehydrate(&self, layout: &SessionLayout) -> Result<usize> {
        let conn = get_conn(&self.db)?;
        let mut added = 0;
        for session_id in layout.list_sessions()? {
            let state = state_from_disk(layout, &session_id);
            if sessions::insert_if_absent(&conn, &session_id, state)? {
                added += 1;
            }
        }
        tracing::info!(
            added,
            recording = sessions::count_in_state(&conn, SessionState::Recording)?,
            finalized = sessions::count_in_state(&conn, SessionState::Finalized)?,
            "Session registry loaded"
        );
        Ok(added)
    }
}

fn state_from_disk(layout: &SessionLayout, session_id: &SessionId) -> SessionState {
    let Ok(text) = std::fs::read_to_string(layout.playlist_path(session_id)) else {
        return SessionState::Recording;
    };
    match parse_media_playlist(&text) {
        Ok(playlist) if playlist.ended => SessionState::Finalized,
        Ok(_) => SessionState::Recording,
        Err(e) => {
            tracing::warn!(session_id = %session_id, "Unreadable manifest: {e}");
            SessionState::Recording
        }
    }
}
