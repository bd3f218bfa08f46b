//! Transcription types.
//!
//! A Transcription is the output artifact for exactly one recording. It is
//! overwritten (not versioned) on re-transcription.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::recording::now_ms;

/// One timed segment of a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionSegment {
    /// Segment start, seconds from the beginning of the audio
    pub start_time: f64,

    /// Segment end, seconds; always >= start_time
    pub end_time: f64,

    /// Transcribed text for this segment
    pub text: String,

    /// Engine confidence for this segment, 0..1
    pub confidence: Option<f64>,
}

/// The transcript produced for one recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcription {
    /// Unique id of this transcript row
    pub id: String,

    /// Owning recording (1:1)
    pub recording_id: String,

    /// Full transcript text
    pub content: String,

    /// Detected or requested language code
    pub language: String,

    /// Overall confidence, 0..1
    pub confidence: f64,

    /// Ordered timed segments
    pub segments: Vec<TranscriptionSegment>,

    /// When the transcript was created (unix ms)
    pub created_at: i64,

    /// When the transcript was last replaced (unix ms)
    pub modified_at: i64,
}

impl Transcription {
    /// Build a fresh transcript for a recording.
    pub fn new(
        recording_id: impl Into<String>,
        content: impl Into<String>,
        language: impl Into<String>,
        confidence: f64,
        segments: Vec<TranscriptionSegment>,
    ) -> Self {
        let now = now_ms();

        Self {
            id: Uuid::new_v4().to_string(),
            recording_id: recording_id.into(),
            content: content.into(),
            language: language.into(),
            confidence,
            segments,
            created_at: now,
            modified_at: now,
        }
    }
}

/// Progress snapshot for an in-flight transcription.
///
/// `current_segment` and `estimated_time_remaining` are populated only when
/// the engine reports them; the whisper CLI contract reports percent only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionProgress {
    pub recording_id: String,
    pub percent_complete: u32,
    pub current_segment: Option<TranscriptionSegment>,
    pub estimated_time_remaining: Option<u64>,
}
