//! Shared runtime context.
//!
//! [`StreamContext`] bundles the infrastructure that the facade, the worker
//! pool and the purge task all need. It only holds `Arc`s and the pool
//! handle, so cloning it is cheap.

use std::sync::Arc;

use tokio::sync::Notify;

use tl_av::SegmentTranscoder;
use tl_core::config::Config;
use tl_core::events::EventBus;
use tl_db::pool::DbPool;

use crate::layout::SessionLayout;
use crate::playlist::PlaylistManager;
use crate::registry::SessionRegistry;

#[derive(Clone)]
pub struct StreamContext {
    /// Database connection pool (job queue and segment records).
    pub db: DbPool,
    /// Immutable application configuration snapshot.
    pub config: Arc<Config>,
    pub layout: Arc<SessionLayout>,
    pub registry: Arc<SessionRegistry>,
    pub playlists: Arc<PlaylistManager>,
    /// Chunk-to-segment converter.
    pub transcoder: Arc<dyn SegmentTranscoder>,
    /// Broadcast bus for job and session events.
    pub event_bus: Arc<EventBus>,
    /// Wakes idle workers when a job is enqueued.
    pub job_notify: Arc<Notify>,
}

impl StreamContext {
    pub fn new(config: Config, db: DbPool, transcoder: Arc<dyn SegmentTranscoder>) -> Self {
        let layout = Arc::new(SessionLayout::from_config(&config.storage));
        Self {
            registry: Arc::new(SessionRegistry::new(db.clone())),
            db,
            config: Arc::new(config),
            playlists: Arc::new(PlaylistManager::new(layout.clone())),
            layout,
            transcoder,
            event_bus: Arc::new(EventBus::default()),
            job_notify: Arc::new(Notify::new()),
        }
    }
}
