//! scribed - audio recording watcher and transcription queue
//!
//! Watches directories for audio files, persists their metadata in SQLite
//! and transcribes them through a strictly serial queue driving an external
//! whisper-style engine process.
//!
//! # Architecture
//!
//! - Ingestion and queue management run on a single cooperative runtime;
//!   the engine runs as a child process so the orchestrator never blocks
//! - All status changes are persisted before observers are notified
//! - At most one transcription job runs at any time, system-wide
//!
//! # Modules
//!
//! - `app`: application context wiring one instance of every component
//! - `bus`: typed broadcast event bus
//! - `store`: SQLite persistence (recordings, transcriptions, settings)
//! - `ingest`: metadata extraction and the directory watcher
//! - `transcribe`: worker supervisor and the single-flight queue
//! - `cli`: command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Register and transcribe one file
//! scribed add ~/recordings/meeting.wav
//! scribed transcribe <recording-id>
//!
//! # Watch directories continuously
//! scribed watch ~/recordings
//! ```

pub mod app;
pub mod bus;
pub mod cli;
pub mod config;
pub mod domain;
pub mod ingest;
pub mod store;
pub mod transcribe;

// Re-export main types at crate root for convenience
pub use app::{App, TranscriptionStatus};
pub use bus::{AppEvent, EventBus};
pub use config::Config;
pub use domain::{
    AudioMetadata, Recording, RecordingStatus, Transcription, TranscriptionProgress,
    TranscriptionSegment,
};
pub use ingest::{FileWatcher, MetadataExtractor, ScanSummary, WatcherConfig};
pub use store::{Store, StoreError};
pub use transcribe::{QueueManager, TranscriptionRequest, WorkerError, WorkerSupervisor};
