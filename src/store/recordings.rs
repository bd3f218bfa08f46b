//! Recordings repository.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::{now_ms, AudioMetadata, Recording, RecordingStatus};

use super::{Store, StoreError};

const RECORDING_COLUMNS: &str = "id, filepath, filename, filesize, duration, \
     created_at, modified_at, status, error_message, metadata";

impl Store {
    /// Insert a recording, replacing any existing row with the same id or
    /// filepath. A replace cascades away a stale transcription.
    pub fn insert_recording(&self, recording: &Recording) -> Result<(), StoreError> {
        self.with_conn(|conn| insert_recording_impl(conn, recording))
    }

    /// Get a recording by id.
    pub fn get_recording(&self, id: &str) -> Result<Option<Recording>, StoreError> {
        self.with_conn(|conn| get_recording_impl(conn, id))
    }

    /// Get a recording by file path.
    pub fn get_recording_by_path(&self, path: &Path) -> Result<Option<Recording>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORDING_COLUMNS} FROM recordings WHERE filepath = ?1"
            ))?;
            let row = stmt
                .query_row(params![path_str(path)], map_recording)
                .optional()?;
            Ok(row)
        })
    }

    /// All recordings, most recently created first.
    pub fn all_recordings(&self) -> Result<Vec<Recording>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORDING_COLUMNS} FROM recordings ORDER BY created_at DESC"
            ))?;
            let rows = stmt
                .query_map([], map_recording)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Recordings currently in `status`.
    pub fn recordings_with_status(
        &self,
        status: RecordingStatus,
    ) -> Result<Vec<Recording>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORDING_COLUMNS} FROM recordings WHERE status = ?1 \
                 ORDER BY created_at DESC"
            ))?;
            let rows = stmt
                .query_map(params![status.as_str()], map_recording)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Update a recording's status.
    ///
    /// `error_message` is persisted only for `Error`; every other status
    /// clears it. `modified_at` is bumped.
    pub fn update_status(
        &self,
        id: &str,
        status: RecordingStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| update_status_impl(conn, id, status, error))
    }

    /// Delete a recording by id, cascading to its transcription.
    pub fn delete_recording(&self, id: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM recordings WHERE id = ?1", params![id])?;
            if changed == 0 {
                return Err(StoreError::RecordingNotFound(id.to_string()));
            }
            Ok(())
        })
    }

    /// Delete a recording by file path (unlink events). Returns the deleted
    /// recording's id, or None if the path was not tracked.
    pub fn delete_recording_by_path(&self, path: &Path) -> Result<Option<String>, StoreError> {
        self.with_conn(|conn| {
            let id: Option<String> = conn
                .query_row(
                    "SELECT id FROM recordings WHERE filepath = ?1",
                    params![path_str(path)],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(ref id) = id {
                conn.execute("DELETE FROM recordings WHERE id = ?1", params![id])?;
            }
            Ok(id)
        })
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn insert_recording_impl(conn: &Connection, recording: &Recording) -> Result<(), StoreError> {
    let metadata = serde_json::to_string(&recording.metadata)?;

    conn.execute(
        r#"
        INSERT OR REPLACE INTO recordings (
            id, filepath, filename, filesize, duration, created_at, modified_at,
            status, error_message, metadata
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
        params![
            recording.id,
            path_str(&recording.filepath),
            recording.filename,
            recording.filesize as i64,
            recording.duration,
            recording.created_at,
            recording.modified_at,
            recording.status.as_str(),
            recording.error_message,
            metadata,
        ],
    )?;

    Ok(())
}

fn get_recording_impl(conn: &Connection, id: &str) -> Result<Option<Recording>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORDING_COLUMNS} FROM recordings WHERE id = ?1"
    ))?;
    let row = stmt.query_row(params![id], map_recording).optional()?;
    Ok(row)
}

pub(super) fn update_status_impl(
    conn: &Connection,
    id: &str,
    status: RecordingStatus,
    error: Option<&str>,
) -> Result<(), StoreError> {
    let error_message = match status {
        RecordingStatus::Error => error,
        _ => None,
    };

    let changed = conn.execute(
        "UPDATE recordings SET status = ?1, error_message = ?2, modified_at = ?3 WHERE id = ?4",
        params![status.as_str(), error_message, now_ms(), id],
    )?;

    if changed == 0 {
        return Err(StoreError::RecordingNotFound(id.to_string()));
    }
    Ok(())
}

/// Map a row to a [`Recording`], validating status and metadata JSON.
fn map_recording(row: &rusqlite::Row<'_>) -> Result<Recording, rusqlite::Error> {
    let status_str: String = row.get(7)?;
    let status = RecordingStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            rusqlite::types::Type::Text,
            format!("unknown recording status: {status_str}").into(),
        )
    })?;

    let metadata_json: String = row.get(9)?;
    let metadata: AudioMetadata = serde_json::from_str(&metadata_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let filepath: String = row.get(1)?;
    let filesize: i64 = row.get(3)?;

    Ok(Recording {
        id: row.get(0)?,
        filepath: PathBuf::from(filepath),
        filename: row.get(2)?,
        filesize: filesize as u64,
        duration: row.get(4)?,
        created_at: row.get(5)?,
        modified_at: row.get(6)?,
        status,
        error_message: row.get(8)?,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_recording(path: &str) -> Recording {
        Recording::new(
            PathBuf::from(path),
            2048,
            12.5,
            AudioMetadata {
                format: "wav".to_string(),
                codec: "pcm_s16le".to_string(),
                bitrate: Some(256_000),
                channels: Some(1),
                sample_rate: Some(16_000),
            },
        )
    }

    #[test]
    fn test_insert_and_get() {
        let store = Store::open_in_memory().unwrap();
        let rec = sample_recording("/music/a.wav");
        store.insert_recording(&rec).unwrap();

        let loaded = store.get_recording(&rec.id).unwrap().unwrap();
        assert_eq!(loaded.filepath, rec.filepath);
        assert_eq!(loaded.status, RecordingStatus::Unprocessed);
        assert_eq!(loaded.metadata, rec.metadata);

        let by_path = store
            .get_recording_by_path(Path::new("/music/a.wav"))
            .unwrap()
            .unwrap();
        assert_eq!(by_path.id, rec.id);
    }

    #[test]
    fn test_get_missing_returns_none() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get_recording("nope").unwrap().is_none());
        assert!(store
            .get_recording_by_path(Path::new("/missing.wav"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_update_status_clears_error_message() {
        let store = Store::open_in_memory().unwrap();
        let rec = sample_recording("/music/a.wav");
        store.insert_recording(&rec).unwrap();

        store
            .update_status(&rec.id, RecordingStatus::Error, Some("probe failed"))
            .unwrap();
        let loaded = store.get_recording(&rec.id).unwrap().unwrap();
        assert_eq!(loaded.status, RecordingStatus::Error);
        assert_eq!(loaded.error_message.as_deref(), Some("probe failed"));

        store
            .update_status(&rec.id, RecordingStatus::Pending, None)
            .unwrap();
        let loaded = store.get_recording(&rec.id).unwrap().unwrap();
        assert_eq!(loaded.status, RecordingStatus::Pending);
        assert!(loaded.error_message.is_none());
    }

    #[test]
    fn test_update_status_unknown_id() {
        let store = Store::open_in_memory().unwrap();
        let err = store
            .update_status("missing", RecordingStatus::Pending, None)
            .unwrap_err();
        assert!(matches!(err, StoreError::RecordingNotFound(_)));
    }

    #[test]
    fn test_all_recordings_ordering() {
        let store = Store::open_in_memory().unwrap();

        let mut first = sample_recording("/music/a.wav");
        first.created_at = 1000;
        let mut second = sample_recording("/music/b.wav");
        second.created_at = 2000;

        store.insert_recording(&first).unwrap();
        store.insert_recording(&second).unwrap();

        let all = store.all_recordings().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, second.id);
        assert_eq!(all[1].id, first.id);
    }

    #[test]
    fn test_replace_keeps_one_row_per_path() {
        let store = Store::open_in_memory().unwrap();
        let rec = sample_recording("/music/a.wav");
        store.insert_recording(&rec).unwrap();

        let mut updated = rec.clone();
        updated.filesize = 4096;
        store.insert_recording(&updated).unwrap();

        let all = store.all_recordings().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].filesize, 4096);
    }
}
