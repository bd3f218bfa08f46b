//! Recording types.
//!
//! A Recording is one physical audio file under management. Its `status`
//! tracks the transcription lifecycle; `metadata` is extracted once at
//! discovery and never mutated afterwards.

use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current time as unix milliseconds (the persisted timestamp format).
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Processing status of a recording.
///
/// `Pending` is the persisted form of "enqueued for transcription"; the
/// transient queue-side states live in [`crate::transcribe::QueueItemStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    /// Discovered, metadata extracted, not yet queued
    Unprocessed,

    /// Enqueued for transcription
    Pending,

    /// Transcription in progress
    Processing,

    /// Transcription finished and persisted
    Completed,

    /// Transcription failed (error_message carries the reason)
    Error,

    /// Transcription cancelled by the user
    Cancelled,
}

impl RecordingStatus {
    /// Stable string form used in the database and CLI output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unprocessed => "unprocessed",
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the stable string form. Returns None for unknown values.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unprocessed" => Some(Self::Unprocessed),
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "error" => Some(Self::Error),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal states do not transition further without a new request.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }
}

impl std::fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Container/stream metadata extracted from an audio file.
///
/// Immutable once extracted; stored as a JSON column on the recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioMetadata {
    /// Container format name (e.g. "wav", "mov,mp4,m4a")
    pub format: String,

    /// Codec of the first audio stream (e.g. "pcm_s16le", "aac")
    pub codec: String,

    /// Overall bitrate in bits/s, if reported
    pub bitrate: Option<u64>,

    /// Channel count of the first audio stream
    pub channels: Option<u32>,

    /// Sample rate in Hz of the first audio stream
    pub sample_rate: Option<u32>,
}

/// One physical audio file under management.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    /// Stable unique id, assigned at first discovery
    pub id: String,

    /// Absolute path to the audio file (unique per recording)
    pub filepath: PathBuf,

    /// File name only
    pub filename: String,

    /// File size in bytes
    pub filesize: u64,

    /// Duration in seconds, as probed
    pub duration: f64,

    /// When the recording row was created (unix ms)
    pub created_at: i64,

    /// When the recording row was last modified (unix ms)
    pub modified_at: i64,

    /// Transcription lifecycle status
    pub status: RecordingStatus,

    /// Failure reason; present only when status is `Error`
    pub error_message: Option<String>,

    /// Probed stream/container metadata
    pub metadata: AudioMetadata,
}

impl Recording {
    /// Create a new recording at first discovery.
    pub fn new(filepath: PathBuf, filesize: u64, duration: f64, metadata: AudioMetadata) -> Self {
        let filename = filepath
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let now = now_ms();

        Self {
            id: Uuid::new_v4().to_string(),
            filepath,
            filename,
            filesize,
            duration,
            created_at: now,
            modified_at: now,
            status: RecordingStatus::Unprocessed,
            error_message: None,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> AudioMetadata {
        AudioMetadata {
            format: "wav".to_string(),
            codec: "pcm_s16le".to_string(),
            bitrate: Some(256_000),
            channels: Some(1),
            sample_rate: Some(16_000),
        }
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            RecordingStatus::Unprocessed,
            RecordingStatus::Pending,
            RecordingStatus::Processing,
            RecordingStatus::Completed,
            RecordingStatus::Error,
            RecordingStatus::Cancelled,
        ] {
            assert_eq!(RecordingStatus::parse(status.as_str()), Some(status));
        }

        assert_eq!(RecordingStatus::parse("transcribing"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(RecordingStatus::Completed.is_terminal());
        assert!(RecordingStatus::Error.is_terminal());
        assert!(RecordingStatus::Cancelled.is_terminal());
        assert!(!RecordingStatus::Pending.is_terminal());
        assert!(!RecordingStatus::Processing.is_terminal());
    }

    #[test]
    fn test_new_recording_defaults() {
        let rec = Recording::new(PathBuf::from("/music/song.wav"), 1024, 3.5, sample_metadata());

        assert_eq!(rec.filename, "song.wav");
        assert_eq!(rec.status, RecordingStatus::Unprocessed);
        assert!(rec.error_message.is_none());
        assert_eq!(rec.created_at, rec.modified_at);
    }

    #[test]
    fn test_metadata_serialization() {
        let metadata = sample_metadata();
        let json = serde_json::to_string(&metadata).unwrap();
        let parsed: AudioMetadata = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, metadata);
    }
}
