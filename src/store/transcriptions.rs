//! Transcriptions repository.
//!
//! Transcripts are keyed 1:1 by owning recording and overwritten on
//! re-transcription. Completing a job writes the transcript and the
//! recording's status in one transaction so observers never see one
//! without the other.

use rusqlite::{params, OptionalExtension};

use crate::domain::{RecordingStatus, Transcription, TranscriptionSegment};

use super::recordings::update_status_impl;
use super::{Store, StoreError};

impl Store {
    /// Insert or replace the transcript for its owning recording.
    pub fn upsert_transcription(&self, transcription: &Transcription) -> Result<(), StoreError> {
        self.with_conn(|conn| upsert_impl(conn, transcription))
    }

    /// Get the transcript for a recording.
    pub fn get_transcription(
        &self,
        recording_id: &str,
    ) -> Result<Option<Transcription>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, recording_id, content, language, confidence, segments, \
                 created_at, modified_at FROM transcriptions WHERE recording_id = ?1",
            )?;
            let row = stmt
                .query_row(params![recording_id], map_transcription)
                .optional()?;
            Ok(row)
        })
    }

    /// Persist a successful transcription: transcript upsert plus the
    /// owning recording's transition to `completed`, atomically.
    pub fn complete_transcription(&self, transcription: &Transcription) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            upsert_impl(&tx, transcription)?;
            update_status_impl(&tx, &transcription.recording_id, RecordingStatus::Completed, None)?;
            tx.commit()?;
            Ok(())
        })
    }
}

fn upsert_impl(conn: &rusqlite::Connection, t: &Transcription) -> Result<(), StoreError> {
    let segments = serde_json::to_string(&t.segments)?;

    conn.execute(
        r#"
        INSERT INTO transcriptions (
            id, recording_id, content, language, confidence, segments,
            created_at, modified_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(recording_id) DO UPDATE SET
            content = excluded.content,
            language = excluded.language,
            confidence = excluded.confidence,
            segments = excluded.segments,
            modified_at = excluded.modified_at
        "#,
        params![
            t.id,
            t.recording_id,
            t.content,
            t.language,
            t.confidence,
            segments,
            t.created_at,
            t.modified_at,
        ],
    )?;

    Ok(())
}

fn map_transcription(row: &rusqlite::Row<'_>) -> Result<Transcription, rusqlite::Error> {
    let segments_json: String = row.get(5)?;
    let segments: Vec<TranscriptionSegment> =
        serde_json::from_str(&segments_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Transcription {
        id: row.get(0)?,
        recording_id: row.get(1)?,
        content: row.get(2)?,
        language: row.get(3)?,
        confidence: row.get(4)?,
        segments,
        created_at: row.get(6)?,
        modified_at: row.get(7)?,
    })
}
