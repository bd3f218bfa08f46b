//! Process-wide event bus.
//!
//! One-to-many broadcast of status-change and progress notifications.
//! Events form a closed set of variants; subscribers receive everything
//! emitted after they subscribe and unsubscribe by dropping the receiver.
//! Emission is fire-and-forget: events are dropped when nobody listens.

use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::domain::{Recording, RecordingStatus};

/// Notification pushed from the core to observers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum AppEvent {
    /// Engine progress for the active transcription job
    TranscriptionProgress {
        recording_id: String,
        percent_complete: u32,
    },

    /// A transcript was persisted and the recording reached `completed`
    TranscriptionCompleted { recording_id: String },

    /// A transcription job failed; the message is display-ready
    TranscriptionError {
        recording_id: String,
        message: String,
    },

    /// A new recording was discovered and persisted
    RecordingAdded { recording: Recording },

    /// An existing recording changed (status transition or re-ingest)
    RecordingChanged {
        recording_id: String,
        status: RecordingStatus,
        error: Option<String>,
    },

    /// A watched file disappeared and its recording was deleted
    RecordingRemoved { filepath: PathBuf },

    /// Initial directory scan progress, one event per entry processed
    ScanProgress {
        directory: PathBuf,
        processed: usize,
        total: usize,
    },

    /// A path permanently failed ingestion (retries exhausted) or a
    /// directory scan failed
    IngestError { filepath: PathBuf, message: String },
}

/// Broadcast bus carrying [`AppEvent`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AppEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all current subscribers.
    ///
    /// Push events are fire-and-forget: an event emitted with no subscribers
    /// is silently dropped.
    pub fn emit(&self, event: AppEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
