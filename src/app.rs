//! Application context.
//!
//! Owns one instance of each component — store, event bus, metadata
//! extractor, file watcher, transcription queue — and wires them together
//! by explicit construction (no globals). The methods here form the
//! transport-agnostic operation surface consumed by the CLI and any other
//! front end.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::bus::{AppEvent, EventBus};
use crate::config::Config;
use crate::domain::{Recording, RecordingStatus, Transcription, TranscriptionProgress};
use crate::ingest::{
    ingest_file, FileWatcher, IngestError, MetadataExtractor, ScanSummary, WatcherConfig,
    WatcherError,
};
use crate::store::settings::{SETTING_AUTO_TRANSCRIBE, SETTING_LANGUAGE};
use crate::store::{Store, StoreError};
use crate::transcribe::{
    QueueError, QueueItemStatus, QueueManager, TranscriptionRequest, WorkerConfig,
};

/// Combined transient/persisted transcription status for one recording.
#[derive(Debug, Clone)]
pub struct TranscriptionStatus {
    pub status: RecordingStatus,
    pub error: Option<String>,
}

/// The scribed application: one store, one bus, one watcher, one queue.
pub struct App {
    config: Config,
    store: Arc<Store>,
    bus: EventBus,
    extractor: MetadataExtractor,
    watcher: FileWatcher,
    queue: QueueManager,
}

impl App {
    /// Construct the application from resolved configuration.
    ///
    /// Must be called from within a tokio runtime: the auto-transcribe
    /// listener is spawned here.
    pub fn new(config: Config) -> Result<Self> {
        let store = Arc::new(
            Store::open(&config.db_path)
                .with_context(|| format!("Failed to open store at {}", config.db_path.display()))?,
        );
        let bus = EventBus::new(config.bus_capacity);
        let extractor = MetadataExtractor::new(config.ffprobe_path.clone());

        let watcher = FileWatcher::new(
            Arc::clone(&store),
            bus.clone(),
            extractor.clone(),
            WatcherConfig {
                debounce: config.debounce,
                retry_delay: config.retry_delay,
                max_retry_attempts: config.max_retry_attempts,
                ..WatcherConfig::default()
            },
        );

        let queue = QueueManager::new(
            Arc::clone(&store),
            bus.clone(),
            WorkerConfig {
                engine_path: config.engine_path.clone(),
                model_path: config.model_path.clone(),
                timeout: config.transcription_timeout,
            },
        );

        let app = Self {
            config,
            store,
            bus,
            extractor,
            watcher,
            queue,
        };
        app.spawn_auto_transcribe_listener();

        Ok(app)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Subscribe to the push-event stream (progress, status changes,
    /// ingestion lifecycle).
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<AppEvent> {
        self.bus.subscribe()
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    pub fn get_settings(&self) -> Result<Vec<(String, String)>, StoreError> {
        self.store.all_settings()
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.store.get_setting(key)
    }

    pub fn save_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.store.set_setting(key, value)
    }

    // ------------------------------------------------------------------
    // Recordings
    // ------------------------------------------------------------------

    pub fn get_audio_files(&self) -> Result<Vec<Recording>, StoreError> {
        self.store.all_recordings()
    }

    pub fn get_recording(&self, id: &str) -> Result<Option<Recording>, StoreError> {
        self.store.get_recording(id)
    }

    /// Probe and register a single audio file, returning its recording id.
    pub async fn add_audio_file(&self, path: &Path) -> Result<Recording, IngestError> {
        ingest_file(&self.store, &self.bus, &self.extractor, path).await
    }

    pub fn update_recording_status(
        &self,
        id: &str,
        status: RecordingStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        self.store.update_status(id, status, error)?;
        self.bus.emit(AppEvent::RecordingChanged {
            recording_id: id.to_string(),
            status,
            error: error.map(str::to_string),
        });
        Ok(())
    }

    /// Delete a recording (cascading to its transcription) and notify.
    pub fn delete_recording(&self, id: &str) -> Result<(), StoreError> {
        let recording = self
            .store
            .get_recording(id)?
            .ok_or_else(|| StoreError::RecordingNotFound(id.to_string()))?;

        self.store.delete_recording(id)?;
        self.bus.emit(AppEvent::RecordingRemoved {
            filepath: recording.filepath,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transcription
    // ------------------------------------------------------------------

    /// Enqueue a transcription for a known recording.
    ///
    /// Returns false when the recording is already queued or processing.
    pub fn start_transcription(
        &self,
        recording_id: &str,
        language: Option<String>,
    ) -> Result<bool, QueueError> {
        let recording = self
            .store
            .get_recording(recording_id)?
            .ok_or_else(|| StoreError::RecordingNotFound(recording_id.to_string()))?;

        let language = match language {
            Some(lang) => Some(lang),
            None => self
                .store
                .get_setting(SETTING_LANGUAGE)?
                .or_else(|| Some(self.config.language.clone())),
        };

        self.queue.add_to_queue(TranscriptionRequest {
            recording_id: recording.id,
            file_path: recording.filepath,
            language,
        })
    }

    /// Cancel a queued or running transcription. No-op on unknown ids.
    pub fn cancel_transcription(&self, recording_id: &str) -> Result<bool, QueueError> {
        self.queue.cancel_transcription(recording_id)
    }

    /// Transcription status: the in-memory queue item when one exists,
    /// otherwise the persisted recording status.
    pub fn get_transcription_status(
        &self,
        recording_id: &str,
    ) -> Result<Option<TranscriptionStatus>, StoreError> {
        if let Some(item) = self.queue.get_status(recording_id) {
            let status = match item.status {
                QueueItemStatus::Queued => RecordingStatus::Pending,
                QueueItemStatus::Processing => RecordingStatus::Processing,
                QueueItemStatus::Completed => RecordingStatus::Completed,
                QueueItemStatus::Error => RecordingStatus::Error,
                QueueItemStatus::Cancelled => RecordingStatus::Cancelled,
            };
            return Ok(Some(TranscriptionStatus {
                status,
                error: None,
            }));
        }

        Ok(self.store.get_recording(recording_id)?.map(|rec| {
            TranscriptionStatus {
                status: rec.status,
                error: rec.error_message,
            }
        }))
    }

    pub fn get_transcription(
        &self,
        recording_id: &str,
    ) -> Result<Option<Transcription>, StoreError> {
        self.store.get_transcription(recording_id)
    }

    /// Persist an externally supplied transcript (insert-or-replace).
    pub fn save_transcription(&self, transcription: &Transcription) -> Result<(), StoreError> {
        self.store.upsert_transcription(transcription)
    }

    /// Progress of the active job, if `recording_id` is currently running.
    pub fn get_transcription_progress(&self, recording_id: &str) -> Option<TranscriptionProgress> {
        self.queue
            .get_progress(recording_id)
            .map(|percent| TranscriptionProgress {
                recording_id: recording_id.to_string(),
                percent_complete: percent,
                current_segment: None,
                estimated_time_remaining: None,
            })
    }

    // ------------------------------------------------------------------
    // Watching
    // ------------------------------------------------------------------

    pub async fn watch_directory(&self, path: &Path) -> Result<(), WatcherError> {
        self.watcher.watch_directory(path).await
    }

    pub fn unwatch_directory(&self, path: &Path) {
        self.watcher.unwatch_directory(path)
    }

    pub async fn scan_directory(&self, path: &Path) -> Result<ScanSummary, WatcherError> {
        self.watcher.scan_directory(path).await
    }

    pub fn watched_directories(&self) -> Vec<PathBuf> {
        self.watcher.watched_directories()
    }

    /// Tear down watches, retry timers and in-flight tracking. Safe during
    /// shutdown.
    pub fn cleanup(&self) {
        self.watcher.cleanup()
    }

    /// Enqueue newly discovered recordings when the `auto_transcribe`
    /// setting is on.
    fn spawn_auto_transcribe_listener(&self) {
        let mut rx = self.bus.subscribe();
        let store = Arc::clone(&self.store);
        let queue = self.queue.clone();
        let default_language = self.config.language.clone();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(AppEvent::RecordingAdded { recording }) => {
                        let enabled = matches!(
                            store.get_setting(SETTING_AUTO_TRANSCRIBE),
                            Ok(Some(ref v)) if v == "true" || v == "1"
                        );
                        if !enabled {
                            continue;
                        }

                        let language = store
                            .get_setting(SETTING_LANGUAGE)
                            .ok()
                            .flatten()
                            .unwrap_or_else(|| default_language.clone());

                        if let Err(e) = queue.add_to_queue(TranscriptionRequest {
                            recording_id: recording.id.clone(),
                            file_path: recording.filepath.clone(),
                            language: Some(language),
                        }) {
                            tracing::warn!(
                                "auto-transcribe enqueue failed for {}: {}",
                                recording.id,
                                e
                            );
                        }
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("auto-transcribe listener lagged by {} events", skipped);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}
