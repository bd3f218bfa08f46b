//! File-system ingestion pipeline.
//!
//! Keeps the recording store consistent with the contents of watched
//! directories:
//!
//! 1. **Metadata**: ffprobe-backed extraction of stream/container metadata
//! 2. **Watcher**: directory watches with debounce, bounded retry and
//!    removal handling
//!
//! ```text
//! watched dir → notify (debounced) → extract metadata → store → events
//! ```

pub mod metadata;
pub mod watcher;

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::bus::{AppEvent, EventBus};
use crate::domain::{now_ms, Recording, RecordingStatus};
use crate::store::{Store, StoreError};

// Re-export key types
pub use metadata::{ExtractionError, MetadataExtractor, ProbeData};
pub use watcher::{FileWatcher, ScanSummary, WatcherConfig, WatcherError};

/// Errors that can occur while ingesting one file.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error for {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Probe `path` and persist it as a recording.
///
/// A path seen before keeps its id and created_at (the id is assigned at
/// first discovery); metadata, size and duration are refreshed and the
/// status returns to `unprocessed`. Emits `RecordingAdded` for new paths,
/// `RecordingChanged` for re-ingested ones — after the store write.
pub(crate) async fn ingest_file(
    store: &Arc<Store>,
    bus: &EventBus,
    extractor: &MetadataExtractor,
    path: &Path,
) -> Result<Recording, IngestError> {
    let file_meta = tokio::fs::metadata(path)
        .await
        .map_err(|source| IngestError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    let probe = extractor.extract(path).await?;

    let existing = store.get_recording_by_path(path)?;
    let is_new = existing.is_none();

    let mut recording = Recording::new(
        path.to_path_buf(),
        file_meta.len(),
        probe.duration,
        probe.metadata,
    );
    if let Some(prev) = existing {
        recording.id = prev.id;
        recording.created_at = prev.created_at;
        recording.modified_at = now_ms();
    }

    store.insert_recording(&recording)?;

    if is_new {
        tracing::info!("new recording: {}", path.display());
        bus.emit(AppEvent::RecordingAdded {
            recording: recording.clone(),
        });
    } else {
        tracing::debug!("re-ingested recording: {}", path.display());
        bus.emit(AppEvent::RecordingChanged {
            recording_id: recording.id.clone(),
            status: RecordingStatus::Unprocessed,
            error: None,
        });
    }

    Ok(recording)
}
