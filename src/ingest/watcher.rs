//! Directory watcher.
//!
//! Watches directories for audio files and keeps the recording store in
//! sync: appeared/changed files are probed and persisted, removed files are
//! deleted. Rapid event bursts for one path are coalesced by the debouncer,
//! and a path already being ingested is never reprocessed concurrently.
//!
//! Failed ingestions are retried on a fixed delay; after
//! `max_retry_attempts` total attempts the path is abandoned and one
//! `IngestError` event is emitted.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bus::{AppEvent, EventBus};
use crate::store::Store;

use super::metadata::MetadataExtractor;
use super::{ingest_file, IngestError};

/// Audio extensions under management.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "ogg", "flac", "aac", "wma"];

/// Errors that can occur with the watcher
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("watch directory does not exist or is not accessible: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Tuning for the watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Coalescing window for rapid events on one path
    pub debounce: Duration,

    /// Fixed delay before an ingestion retry
    pub retry_delay: Duration,

    /// Total attempts per path before abandoning it
    pub max_retry_attempts: u32,

    /// File extensions to manage
    pub extensions: Vec<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(1000),
            retry_delay: Duration::from_millis(5000),
            max_retry_attempts: 3,
            extensions: AUDIO_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Result of a one-shot directory scan
#[derive(Debug, Clone, Default)]
pub struct ScanSummary {
    /// Audio files ingested (or re-ingested)
    pub ingested: usize,

    /// Audio files whose first ingestion attempt failed (retry scheduled)
    pub errors: usize,

    /// Entries skipped (non-audio, hidden, subdirectories)
    pub skipped: usize,
}

struct WatchEntry {
    // Held to keep the underlying notify watcher alive.
    _debouncer: Debouncer<RecommendedWatcher>,
    pump: JoinHandle<()>,
}

struct RetryState {
    attempts: u32,
    timer: Option<JoinHandle<()>>,
}

struct WatcherShared {
    store: Arc<Store>,
    bus: EventBus,
    extractor: MetadataExtractor,
    config: WatcherConfig,
    watches: Mutex<HashMap<PathBuf, WatchEntry>>,
    processing: Mutex<HashSet<PathBuf>>,
    retries: Mutex<HashMap<PathBuf, RetryState>>,
}

/// Directory watcher and ingestion driver. Cheap to clone; clones share
/// watches and retry state.
#[derive(Clone)]
pub struct FileWatcher {
    inner: Arc<WatcherShared>,
}

impl FileWatcher {
    pub fn new(
        store: Arc<Store>,
        bus: EventBus,
        extractor: MetadataExtractor,
        config: WatcherConfig,
    ) -> Self {
        Self {
            inner: Arc::new(WatcherShared {
                store,
                bus,
                extractor,
                config,
                watches: Mutex::new(HashMap::new()),
                processing: Mutex::new(HashSet::new()),
                retries: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start watching a directory and run an initial full scan.
    ///
    /// Idempotent: watching an already-watched path is a no-op. Fails with
    /// [`WatcherError::DirectoryNotFound`] if the path is inaccessible.
    pub async fn watch_directory(&self, path: &Path) -> Result<(), WatcherError> {
        let path = path.to_path_buf();

        if lock(&self.inner.watches).contains_key(&path) {
            tracing::debug!("already watching {}", path.display());
            return Ok(());
        }

        let meta = std::fs::metadata(&path)
            .map_err(|_| WatcherError::DirectoryNotFound(path.clone()))?;
        if !meta.is_dir() {
            return Err(WatcherError::NotADirectory(path));
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<DebounceEventResult>();
        let mut debouncer = new_debouncer(self.inner.config.debounce, move |res| {
            let _ = tx.send(res);
        })?;
        debouncer
            .watcher()
            .watch(&path, RecursiveMode::NonRecursive)?;

        let pump_inner = Arc::clone(&self.inner);
        let pump_dir = path.clone();
        let pump = tokio::spawn(async move {
            while let Some(result) = rx.recv().await {
                match result {
                    Ok(events) => {
                        for event in events {
                            handle_event(&pump_inner, event.path);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("watch error on {}: {}", pump_dir.display(), e);
                    }
                }
            }
        });

        lock(&self.inner.watches).insert(
            path.clone(),
            WatchEntry {
                _debouncer: debouncer,
                pump,
            },
        );

        tracing::info!("watching {} for audio files", path.display());

        // Initial full scan. Scan failures are reported once per directory
        // via the bus; the watch itself stays active.
        if let Err(e) = self.scan_directory(&path).await {
            tracing::warn!("initial scan of {} failed: {}", path.display(), e);
            self.inner.bus.emit(AppEvent::IngestError {
                filepath: path,
                message: format!("scan failed: {e}"),
            });
        }

        Ok(())
    }

    /// Stop watching a directory. No-op if the path is not watched.
    pub fn unwatch_directory(&self, path: &Path) {
        if let Some(entry) = lock(&self.inner.watches).remove(path) {
            entry.pump.abort();
            tracing::info!("stopped watching {}", path.display());
        }
    }

    /// Directories currently being watched.
    pub fn watched_directories(&self) -> Vec<PathBuf> {
        lock(&self.inner.watches).keys().cloned().collect()
    }

    /// Whether `path` is currently being ingested.
    pub fn is_processing(&self, path: &Path) -> bool {
        lock(&self.inner.processing).contains(path)
    }

    /// Retry attempts recorded for `path`, if any.
    pub fn retry_attempts(&self, path: &Path) -> Option<u32> {
        lock(&self.inner.retries).get(path).map(|s| s.attempts)
    }

    /// Scan a directory once, ingesting every managed audio file in it.
    ///
    /// Emits one `ScanProgress` per directory entry processed. Per-file
    /// failures schedule retries and never abort the scan.
    pub async fn scan_directory(&self, dir: &Path) -> Result<ScanSummary, WatcherError> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            paths.push(entry.path());
        }

        let total = paths.len();
        let mut summary = ScanSummary::default();

        for (index, path) in paths.into_iter().enumerate() {
            if path.is_file() && !is_hidden(&path) && is_audio_file(&self.inner.config, &path) {
                if process_file(&self.inner, path).await {
                    summary.ingested += 1;
                } else {
                    summary.errors += 1;
                }
            } else {
                summary.skipped += 1;
            }

            self.inner.bus.emit(AppEvent::ScanProgress {
                directory: dir.to_path_buf(),
                processed: index + 1,
                total,
            });
        }

        Ok(summary)
    }

    /// Tear everything down: cancel pending retry timers, clear in-flight
    /// tracking and close every active watch. Safe to call repeatedly and
    /// during shutdown.
    pub fn cleanup(&self) {
        for (_, state) in lock(&self.inner.retries).drain() {
            if let Some(timer) = state.timer {
                timer.abort();
            }
        }
        lock(&self.inner.processing).clear();
        for (_, entry) in lock(&self.inner.watches).drain() {
            entry.pump.abort();
        }

        tracing::debug!("watcher cleaned up");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A poisoned lock still holds usable state.
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

fn is_audio_file(config: &WatcherConfig, path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| config.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// React to one debounced filesystem event.
fn handle_event(inner: &Arc<WatcherShared>, path: PathBuf) {
    if is_hidden(&path) || !is_audio_file(&inner.config, &path) {
        return;
    }

    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        if path.exists() {
            process_file(&inner, path).await;
        } else {
            remove_file(&inner, &path);
        }
    });
}

/// Ingest one file, guarding against concurrent reprocessing of the same
/// path. Returns true when the file was persisted.
async fn process_file(inner: &Arc<WatcherShared>, path: PathBuf) -> bool {
    if !lock(&inner.processing).insert(path.clone()) {
        tracing::debug!("{} is already being processed", path.display());
        return false;
    }

    let result = ingest_file(&inner.store, &inner.bus, &inner.extractor, &path).await;

    lock(&inner.processing).remove(&path);

    match result {
        Ok(_) => {
            if let Some(state) = lock(&inner.retries).remove(&path) {
                if let Some(timer) = state.timer {
                    timer.abort();
                }
            }
            true
        }
        Err(e) => {
            tracing::warn!("failed to ingest {}: {}", path.display(), e);
            schedule_retry(inner, path, e);
            false
        }
    }
}

/// Record a failed attempt and either schedule a retry or abandon the path.
fn schedule_retry(inner: &Arc<WatcherShared>, path: PathBuf, error: IngestError) {
    let mut retries = lock(&inner.retries);

    let attempts = {
        let state = retries.entry(path.clone()).or_insert(RetryState {
            attempts: 0,
            timer: None,
        });
        state.attempts += 1;
        if let Some(old) = state.timer.take() {
            old.abort();
        }
        state.attempts
    };

    if attempts >= inner.config.max_retry_attempts {
        retries.remove(&path);
        drop(retries);

        tracing::error!(
            "abandoning {} after {} attempts: {}",
            path.display(),
            attempts,
            error
        );
        inner.bus.emit(AppEvent::IngestError {
            filepath: path,
            message: error.to_string(),
        });
        return;
    }

    let retry_inner = Arc::clone(inner);
    let retry_path = path.clone();
    let delay = inner.config.retry_delay;

    let timer = tokio::spawn(async move {
        tokio::time::sleep(delay).await;

        // The timer has fired; the map keeps only the attempt count.
        if let Some(state) = lock(&retry_inner.retries).get_mut(&retry_path) {
            state.timer = None;
        }

        process_file(&retry_inner, retry_path).await;
    });

    if let Some(state) = retries.get_mut(&path) {
        state.timer = Some(timer);
    }
}

/// A watched file disappeared: drop its recording and notify.
fn remove_file(inner: &Arc<WatcherShared>, path: &Path) {
    match inner.store.delete_recording_by_path(path) {
        Ok(Some(id)) => {
            tracing::info!("recording removed: {} ({})", path.display(), id);
            inner.bus.emit(AppEvent::RecordingRemoved {
                filepath: path.to_path_buf(),
            });
        }
        Ok(None) => {}
        Err(e) => {
            tracing::warn!("failed to delete recording for {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_extensions() {
        let config = WatcherConfig::default();
        for ext in ["mp3", "wav", "m4a", "ogg", "flac", "aac", "wma"] {
            assert!(config.extensions.iter().any(|e| e == ext));
        }
    }

    #[test]
    fn test_is_audio_file() {
        let config = WatcherConfig::default();

        assert!(is_audio_file(&config, Path::new("/dir/song.wav")));
        assert!(is_audio_file(&config, Path::new("/dir/SONG.WAV")));
        assert!(!is_audio_file(&config, Path::new("/dir/notes.txt")));
        assert!(!is_audio_file(&config, Path::new("/dir/noext")));
    }

    #[test]
    fn test_is_hidden() {
        assert!(is_hidden(Path::new("/dir/.hidden.wav")));
        assert!(!is_hidden(Path::new("/dir/visible.wav")));
    }
}
