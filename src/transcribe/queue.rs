//! Transcription queue manager.
//!
//! The ordering and admission authority for transcription jobs: a strictly
//! FIFO in-memory queue drained one item at a time, so at most one engine
//! process runs system-wide. The queue manager is the sole writer of
//! transcription status on recordings and the sole driver of worker
//! supervisors; every status notification is emitted after the
//! corresponding store write.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

use crate::bus::{AppEvent, EventBus};
use crate::domain::{RecordingStatus, Transcription};
use crate::store::{Store, StoreError};

use super::worker::{TranscriptionRequest, WorkerConfig, WorkerError, WorkerSupervisor};

/// Errors returned by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Transient lifecycle of one queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueItemStatus {
    Queued,
    Processing,
    Completed,
    Error,
    Cancelled,
}

/// In-memory record of a transcription request. Never persisted; destroyed
/// when processing finishes or the item is cancelled.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub recording_id: String,
    pub filepath: PathBuf,
    pub language: Option<String>,
    pub status: QueueItemStatus,
}

struct ActiveJob {
    recording_id: String,
    supervisor: Arc<WorkerSupervisor>,
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<QueueItem>,
    draining: bool,
    active: Option<ActiveJob>,
}

struct QueueShared {
    store: Arc<Store>,
    bus: EventBus,
    worker_config: WorkerConfig,
    state: Mutex<QueueState>,
}

/// Single-flight transcription queue. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<QueueShared>,
}

impl QueueManager {
    pub fn new(store: Arc<Store>, bus: EventBus, worker_config: WorkerConfig) -> Self {
        Self {
            inner: Arc::new(QueueShared {
                store,
                bus,
                worker_config,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    /// Enqueue a transcription request.
    ///
    /// Idempotent per recording: a request for a recording that is already
    /// queued or processing is a no-op (returns false). Otherwise the item
    /// is appended, the recording's status persisted as `pending` (clearing
    /// any prior error), a notification emitted and draining started if
    /// idle. A store failure rolls the enqueue back.
    pub fn add_to_queue(&self, request: TranscriptionRequest) -> Result<bool, QueueError> {
        {
            let mut state = lock(&self.inner.state);
            if state
                .items
                .iter()
                .any(|item| item.recording_id == request.recording_id)
            {
                tracing::debug!("{} already queued", request.recording_id);
                return Ok(false);
            }

            state.items.push_back(QueueItem {
                recording_id: request.recording_id.clone(),
                filepath: request.file_path.clone(),
                language: request.language.clone(),
                status: QueueItemStatus::Queued,
            });
        }

        if let Err(e) =
            self.inner
                .store
                .update_status(&request.recording_id, RecordingStatus::Pending, None)
        {
            let mut state = lock(&self.inner.state);
            state.items.retain(|item| {
                !(item.recording_id == request.recording_id
                    && item.status == QueueItemStatus::Queued)
            });
            return Err(e.into());
        }

        self.inner.bus.emit(AppEvent::RecordingChanged {
            recording_id: request.recording_id.clone(),
            status: RecordingStatus::Pending,
            error: None,
        });

        tracing::info!("queued transcription for {}", request.recording_id);
        self.maybe_drain();

        Ok(true)
    }

    /// Cancel a transcription request.
    ///
    /// A queued item is removed at any position and marked `cancelled`; the
    /// item currently processing has its supervisor terminated, after which
    /// the drain loop records the cancellation and immediately moves on.
    /// Unknown ids are a no-op (returns false).
    pub fn cancel_transcription(&self, recording_id: &str) -> Result<bool, QueueError> {
        enum Action {
            Active(Arc<WorkerSupervisor>),
            Queued,
            None,
        }

        let action = {
            let mut state = lock(&self.inner.state);

            if state
                .active
                .as_ref()
                .map(|job| job.recording_id == recording_id)
                .unwrap_or(false)
            {
                let supervisor = state
                    .active
                    .as_ref()
                    .map(|job| Arc::clone(&job.supervisor));
                supervisor.map(Action::Active).unwrap_or(Action::None)
            } else if let Some(pos) = state.items.iter().position(|item| {
                item.recording_id == recording_id && item.status == QueueItemStatus::Queued
            }) {
                state.items.remove(pos);
                Action::Queued
            } else {
                Action::None
            }
        };

        match action {
            Action::Active(supervisor) => {
                tracing::info!("cancelling active transcription for {}", recording_id);
                supervisor.terminate();
                Ok(true)
            }
            Action::Queued => {
                self.inner
                    .store
                    .update_status(recording_id, RecordingStatus::Cancelled, None)?;
                self.inner.bus.emit(AppEvent::RecordingChanged {
                    recording_id: recording_id.to_string(),
                    status: RecordingStatus::Cancelled,
                    error: None,
                });
                tracing::info!("cancelled queued transcription for {}", recording_id);
                Ok(true)
            }
            Action::None => Ok(false),
        }
    }

    /// In-memory queue item for a recording, if one exists. Authoritative
    /// for transient state; callers fall back to the persisted recording
    /// status for terminal states.
    pub fn get_status(&self, recording_id: &str) -> Option<QueueItem> {
        lock(&self.inner.state)
            .items
            .iter()
            .find(|item| item.recording_id == recording_id)
            .cloned()
    }

    /// Progress of the active job, if `recording_id` is the one processing.
    pub fn get_progress(&self, recording_id: &str) -> Option<u32> {
        let state = lock(&self.inner.state);
        state
            .active
            .as_ref()
            .filter(|job| job.recording_id == recording_id)
            .map(|job| job.supervisor.progress().unwrap_or(0))
    }

    /// Number of items currently queued or processing.
    pub fn len(&self) -> usize {
        lock(&self.inner.state).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start the drain loop unless one is already running.
    fn maybe_drain(&self) {
        {
            let mut state = lock(&self.inner.state);
            if state.draining {
                return;
            }
            state.draining = true;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(drain_loop(inner));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A poisoned lock still holds usable state.
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Serial drain: one job at a time until the queue is empty.
async fn drain_loop(inner: Arc<QueueShared>) {
    loop {
        let next = {
            let mut state = lock(&inner.state);
            match state.items.front().cloned() {
                Some(item) => item,
                None => {
                    state.draining = false;
                    state.active = None;
                    return;
                }
            }
        };

        let supervisor = Arc::new(WorkerSupervisor::new(
            inner.worker_config.clone(),
            inner.bus.clone(),
        ));

        // Mark the head as processing and expose the supervisor for
        // cancellation in one step. The head may have been cancelled since
        // the peek; if so, start over.
        {
            let mut state = lock(&inner.state);
            match state.items.front_mut() {
                Some(front) if front.recording_id == next.recording_id => {
                    front.status = QueueItemStatus::Processing;
                    state.active = Some(ActiveJob {
                        recording_id: next.recording_id.clone(),
                        supervisor: Arc::clone(&supervisor),
                    });
                }
                _ => continue,
            }
        }

        if let Err(e) =
            inner
                .store
                .update_status(&next.recording_id, RecordingStatus::Processing, None)
        {
            tracing::error!(
                "failed to persist processing status for {}: {}",
                next.recording_id,
                e
            );
        }
        inner.bus.emit(AppEvent::RecordingChanged {
            recording_id: next.recording_id.clone(),
            status: RecordingStatus::Processing,
            error: None,
        });

        tracing::info!(
            "transcribing {} ({})",
            next.filepath.display(),
            next.recording_id
        );

        let request = TranscriptionRequest {
            recording_id: next.recording_id.clone(),
            file_path: next.filepath.clone(),
            language: next.language.clone(),
        };
        let result = supervisor.transcribe(&request).await;

        {
            let mut state = lock(&inner.state);
            state.active = None;
        }

        finish_job(&inner, &next.recording_id, result);

        // Destroy the finished item (cancellation may already have removed it).
        {
            let mut state = lock(&inner.state);
            let head_finished = state
                .items
                .front()
                .map(|front| front.recording_id == next.recording_id)
                .unwrap_or(false);
            if head_finished {
                state.items.pop_front();
            }
        }
    }
}

/// Persist the terminal state of one job and notify observers.
fn finish_job(
    inner: &Arc<QueueShared>,
    recording_id: &str,
    result: Result<super::worker::Transcript, WorkerError>,
) {
    match result {
        Ok(transcript) => {
            let transcription = Transcription::new(
                recording_id,
                transcript.text,
                transcript.language,
                transcript.confidence,
                transcript.segments,
            );

            match inner.store.complete_transcription(&transcription) {
                Ok(()) => {
                    tracing::info!("transcription completed for {}", recording_id);
                    inner.bus.emit(AppEvent::RecordingChanged {
                        recording_id: recording_id.to_string(),
                        status: RecordingStatus::Completed,
                        error: None,
                    });
                    inner.bus.emit(AppEvent::TranscriptionCompleted {
                        recording_id: recording_id.to_string(),
                    });
                }
                Err(e) => {
                    let message = format!("failed to persist transcript: {e}");
                    record_failure(inner, recording_id, &message);
                }
            }
        }

        Err(WorkerError::Cancelled) => {
            if let Err(e) =
                inner
                    .store
                    .update_status(recording_id, RecordingStatus::Cancelled, None)
            {
                tracing::error!("failed to persist cancellation for {}: {}", recording_id, e);
            }
            inner.bus.emit(AppEvent::RecordingChanged {
                recording_id: recording_id.to_string(),
                status: RecordingStatus::Cancelled,
                error: None,
            });
            tracing::info!("transcription cancelled for {}", recording_id);
        }

        Err(e) => {
            record_failure(inner, recording_id, &e.to_string());
        }
    }
}

fn record_failure(inner: &Arc<QueueShared>, recording_id: &str, message: &str) {
    tracing::warn!("transcription failed for {}: {}", recording_id, message);

    if let Err(e) =
        inner
            .store
            .update_status(recording_id, RecordingStatus::Error, Some(message))
    {
        tracing::error!("failed to persist error status for {}: {}", recording_id, e);
    }

    inner.bus.emit(AppEvent::RecordingChanged {
        recording_id: recording_id.to_string(),
        status: RecordingStatus::Error,
        error: Some(message.to_string()),
    });
    inner.bus.emit(AppEvent::TranscriptionError {
        recording_id: recording_id.to_string(),
        message: message.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::{AudioMetadata, Recording};

    fn test_worker_config() -> WorkerConfig {
        WorkerConfig {
            engine_path: PathBuf::from("/nonexistent/engine"),
            model_path: PathBuf::from("/nonexistent/model.bin"),
            timeout: Duration::from_secs(5),
        }
    }

    fn seed_recording(store: &Store, path: &str) -> Recording {
        let rec = Recording::new(
            PathBuf::from(path),
            512,
            1.0,
            AudioMetadata {
                format: "wav".to_string(),
                codec: "pcm_s16le".to_string(),
                bitrate: None,
                channels: Some(1),
                sample_rate: Some(16_000),
            },
        );
        store.insert_recording(&rec).unwrap();
        rec
    }

    #[tokio::test]
    async fn test_enqueue_unknown_recording_rolls_back() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let queue = QueueManager::new(store, EventBus::new(16), test_worker_config());

        let err = queue.add_to_queue(TranscriptionRequest {
            recording_id: "missing".to_string(),
            file_path: PathBuf::from("/x.wav"),
            language: None,
        });

        assert!(matches!(
            err,
            Err(QueueError::Store(StoreError::RecordingNotFound(_)))
        ));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let rec = seed_recording(&store, "/music/a.wav");
        let queue = QueueManager::new(store, EventBus::new(16), test_worker_config());

        let request = TranscriptionRequest {
            recording_id: rec.id.clone(),
            file_path: rec.filepath.clone(),
            language: None,
        };

        assert!(queue.add_to_queue(request.clone()).unwrap());
        // Second enqueue before processing starts: exactly one item.
        let _ = queue.add_to_queue(request);
        assert!(queue.len() <= 1);
    }

    #[tokio::test]
    async fn test_cancel_unknown_is_noop() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let queue = QueueManager::new(store, EventBus::new(16), test_worker_config());

        assert!(!queue.cancel_transcription("missing").unwrap());
    }
}
