//! Progress reporting for uploads.
//!
//! Every update is persisted to the progress table first, then fanned out
//! to live subscribers. The durable record decides whether an update is
//! accepted, so subscribers never see progress go backwards or resume after
//! a failure.

use async_trait::async_trait;
use dashmap::DashMap;
use parcel_core::{FAILED_PROGRESS, ProgressEvent, ProgressState, UploadResult};
use parcel_metadata::MetadataStore;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::broadcast;

/// Buffered events per session before slow subscribers start lagging.
const CHANNEL_CAPACITY: usize = 64;

/// Last known progress of a session as seen by the notifier.
#[derive(Clone, Debug)]
pub struct ProgressRecord {
    pub state: ProgressState,
    pub result: Option<UploadResult>,
    pub error: Option<String>,
}

/// Sink for upload progress.
///
/// Publishing is best-effort: failures are logged and never surface to the
/// upload that produced them.
#[async_trait]
pub trait ProgressNotifier: Send + Sync {
    async fn publish_progress(&self, session_id: &str, progress: i32);

    async fn publish_result(&self, session_id: &str, result: &UploadResult);

    async fn publish_error(&self, session_id: &str, message: &str);

    /// The stored record, or `None` if nothing was published or it expired.
    async fn last_record(&self, session_id: &str) -> Option<ProgressRecord>;

    async fn last_progress(&self, session_id: &str) -> Option<ProgressState> {
        self.last_record(session_id).await.map(|r| r.state)
    }

    async fn last_result(&self, session_id: &str) -> Option<UploadResult> {
        self.last_record(session_id).await.and_then(|r| r.result)
    }
}

/// Per-session broadcast channels for live progress subscribers.
#[derive(Clone, Default)]
pub struct EventHub {
    channels: Arc<DashMap<String, broadcast::Sender<ProgressEvent>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events published for `session_id` from now on.
    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<ProgressEvent> {
        self.channels
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Deliver an event to current subscribers. Returns how many received it.
    ///
    /// Terminal events close the channel; subscribers still drain what was
    /// buffered before seeing the close.
    pub fn send(&self, session_id: &str, event: ProgressEvent) -> usize {
        let terminal = event.is_terminal();
        let delivered = match self.channels.get(session_id) {
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        };

        if terminal {
            self.channels.remove(session_id);
        } else if delivered == 0 {
            self.prune(session_id);
        }
        delivered
    }

    /// Drop the channel for `session_id` if nobody listens to it anymore.
    pub fn prune(&self, session_id: &str) {
        self.channels
            .remove_if(session_id, |_, tx| tx.receiver_count() == 0);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

/// Notifier backed by the metadata store's progress records.
pub struct StoreNotifier {
    metadata: Arc<dyn MetadataStore>,
    hub: EventHub,
    ttl: time::Duration,
}

impl StoreNotifier {
    pub fn new(metadata: Arc<dyn MetadataStore>, hub: EventHub, ttl: time::Duration) -> Self {
        Self { metadata, hub, ttl }
    }

    fn window(&self) -> (OffsetDateTime, OffsetDateTime) {
        let now = OffsetDateTime::now_utc();
        (now, now + self.ttl)
    }
}

#[async_trait]
impl ProgressNotifier for StoreNotifier {
    async fn publish_progress(&self, session_id: &str, progress: i32) {
        let (now, expires_at) = self.window();
        match self
            .metadata
            .record_progress(session_id, progress, now, expires_at)
            .await
        {
            Ok(true) => {
                self.hub
                    .send(session_id, ProgressEvent::Progress { progress });
            }
            Ok(false) => {
                tracing::trace!(session_id = %session_id, progress, "Progress not advanced");
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to record progress");
            }
        }
    }

    async fn publish_result(&self, session_id: &str, result: &UploadResult) {
        let (now, expires_at) = self.window();
        match serde_json::to_string(result) {
            Ok(json) => {
                if let Err(e) = self
                    .metadata
                    .record_result(session_id, &json, now, expires_at)
                    .await
                {
                    tracing::warn!(session_id = %session_id, error = %e, "Failed to record upload result");
                }
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to encode upload result");
            }
        }
        self.hub
            .send(session_id, ProgressEvent::Result(result.clone()));
    }

    async fn publish_error(&self, session_id: &str, message: &str) {
        let (now, expires_at) = self.window();
        if let Err(e) = self
            .metadata
            .record_failure(session_id, message, now, expires_at)
            .await
        {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to record upload failure");
        }
        self.hub.send(
            session_id,
            ProgressEvent::Error {
                error: message.to_string(),
            },
        );
    }

    async fn last_record(&self, session_id: &str) -> Option<ProgressRecord> {
        let row = match self
            .metadata
            .get_progress(session_id, OffsetDateTime::now_utc())
            .await
        {
            Ok(row) => row?,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to read progress");
                return None;
            }
        };

        let result = row.result().unwrap_or_else(|e| {
            tracing::warn!(session_id = %session_id, error = %e, "Discarding unreadable upload result");
            None
        });
        // A stored result wins over an earlier failure.
        let progress = if result.is_some() { 100 } else { row.progress };

        Some(ProgressRecord {
            state: ProgressState {
                progress,
                updated_at: row.updated_at,
            },
            result,
            error: row.error.filter(|_| progress == FAILED_PROGRESS),
        })
    }
}
