//! Job and session lifecycle events.
//!
//! Everything that happens to a chunk or a session is published on the
//! [`EventBus`]. Subscribers get a live `broadcast` stream; the last
//! [`HISTORY_LEN`] events are also kept for anyone who subscribes late.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ids::{JobId, SessionId};

/// Events kept for [`EventBus::history`].
pub const HISTORY_LEN: usize = 100;

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    JobQueued {
        job_id: JobId,
        session_id: SessionId,
        chunk_index: u64,
    },
    JobStarted {
        job_id: JobId,
        attempt: u32,
    },
    JobCompleted {
        job_id: JobId,
    },
    /// A failed attempt that will run again after `backoff_ms`.
    JobRetrying {
        job_id: JobId,
        attempt: u32,
        backoff_ms: u64,
        error: String,
    },
    /// No attempts left, or the error cannot be fixed by retrying.
    JobFailed {
        job_id: JobId,
        error: String,
    },
    SegmentAppended {
        session_id: SessionId,
        chunk_index: u64,
    },
    SessionFinalized {
        session_id: SessionId,
    },
    SessionReclaimed {
        session_id: SessionId,
    },
}

impl EventPayload {
    /// The serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JobQueued { .. } => "job_queued",
            Self::JobStarted { .. } => "job_started",
            Self::JobCompleted { .. } => "job_completed",
            Self::JobRetrying { .. } => "job_retrying",
            Self::JobFailed { .. } => "job_failed",
            Self::SegmentAppended { .. } => "segment_appended",
            Self::SessionFinalized { .. } => "session_finalized",
            Self::SessionReclaimed { .. } => "session_reclaimed",
        }
    }

    /// The session named by the event, if it names one.
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::JobQueued { session_id, .. }
            | Self::SegmentAppended { session_id, .. }
            | Self::SessionFinalized { session_id }
            | Self::SessionReclaimed { session_id } => Some(session_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

pub struct EventBus {
    tx: broadcast::Sender<Event>,
    /// Oldest at the front.
    history: Mutex<VecDeque<Event>>,
}

impl EventBus {
    /// `capacity` bounds how far a live subscriber may lag before it
    /// starts missing events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LEN)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn broadcast(&self, payload: EventPayload) {
        let event = Event::new(payload);
        tracing::trace!(kind = event.payload.kind(), id = %event.id, "Event");

        {
            let mut history = self.history.lock();
            if history.len() == HISTORY_LEN {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // Nobody listening is normal.
        let _ = self.tx.send(event);
    }

    /// Up to `n` of the latest events, newest first.
    pub fn history(&self, n: usize) -> Vec<Event> {
        self.history.lock().iter().rev().take(n).cloned().collect()
    }

    /// Up to `n` of the latest events that name `session_id`, newest first.
    pub fn session_history(&self, session_id: &SessionId, n: usize) -> Vec<Event> {
        self.history
            .lock()
            .iter()
            .rev()
            .filter(|e| e.payload.session_id() == Some(session_id))
            .take(n)
            .cloned()
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str) -> SessionId {
        SessionId::new(id).unwrap()
    }

    #[test]
    fn subscriber_receives_broadcast() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let job_id = JobId::new();
        bus.broadcast(EventPayload::JobQueued {
            job_id,
            session_id: session("abc123"),
            chunk_index: 7,
        });

        match rx.try_recv().unwrap().payload {
            EventPayload::JobQueued { job_id: got, chunk_index, .. } => {
                assert_eq!(got, job_id);
                assert_eq!(chunk_index, 7);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn history_is_bounded_and_newest_first() {
        let bus = EventBus::default();
        for i in 0..150 {
            bus.broadcast(EventPayload::SegmentAppended {
                session_id: session("abc123"),
                chunk_index: i,
            });
        }

        assert_eq!(bus.history(500).len(), HISTORY_LEN);
        let latest = bus.history(2);
        assert!(matches!(
            latest[0].payload,
            EventPayload::SegmentAppended { chunk_index: 149, .. }
        ));
        assert!(matches!(
            latest[1].payload,
            EventPayload::SegmentAppended { chunk_index: 148, .. }
        ));
    }

    #[test]
    fn session_history_filters_by_session() {
        let bus = EventBus::default();
        bus.broadcast(EventPayload::SegmentAppended {
            session_id: session("a"),
            chunk_index: 0,
        });
        bus.broadcast(EventPayload::JobCompleted { job_id: JobId::new() });
        bus.broadcast(EventPayload::SessionFinalized { session_id: session("b") });
        bus.broadcast(EventPayload::SessionFinalized { session_id: session("a") });

        let events = bus.session_history(&session("a"), 10);
        let kinds: Vec<_> = events.iter().map(|e| e.payload.kind()).collect();
        assert_eq!(kinds, ["session_finalized", "segment_appended"]);
    }

    #[test]
    fn broadcast_without_subscribers() {
        let bus = EventBus::new(4);
        bus.broadcast(EventPayload::JobFailed {
            job_id: JobId::new(),
            error: "boom".into(),
        });
        assert_eq!(bus.history(1).len(), 1);
    }

    #[test]
    fn kind_matches_serialized_tag() {
        let payload = EventPayload::JobRetrying {
            job_id: JobId::new(),
            attempt: 1,
            backoff_ms: 5000,
            error: "ffmpeg exited 1".into(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], payload.kind());
        assert_eq!(json["backoff_ms"], 5000);
    }
}
