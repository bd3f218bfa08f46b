//! SQLite persistence for recordings, transcriptions and settings.
//!
//! The store owns a single connection behind a mutex. Repositories hang off
//! [`Store`] as impl blocks in the sibling modules:
//! - `recordings`: CRUD over the recordings table
//! - `transcriptions`: transcript upsert/read, transactional completion
//! - `settings`: key/value settings
//!
//! JSON columns (`metadata`, `segments`) are decoded into typed structs on
//! read as well as write; rows that fail to decode surface as errors instead
//! of leaking raw values.

pub mod recordings;
pub mod settings;
pub mod transcriptions;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use thiserror::Error;

/// Errors produced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("recording not found: {0}")]
    RecordingNotFound(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// SQLite-backed store. Cheap to share behind an `Arc`.
pub struct Store {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl Store {
    /// Open (or create) the database at `db_path` and run schema setup.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        init_schema(&conn)?;

        tracing::info!("store opened at {}", db_path.display());

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path.to_path_buf()),
        })
    }

    /// Open an in-memory database (tests).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: None,
        })
    }

    /// Path of the backing database file, if file-backed.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Run `f` with exclusive access to the connection.
    pub(crate) fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError>,
    {
        let mut guard = self.lock_conn();
        f(&mut guard)
    }

    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        // A poisoned lock still holds a usable connection.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS recordings (
            id TEXT PRIMARY KEY,
            filepath TEXT UNIQUE NOT NULL,
            filename TEXT NOT NULL,
            filesize INTEGER NOT NULL,
            duration REAL NOT NULL,
            created_at INTEGER NOT NULL,
            modified_at INTEGER NOT NULL,
            status TEXT NOT NULL CHECK(status IN (
                'unprocessed', 'pending', 'processing',
                'completed', 'error', 'cancelled'
            )),
            error_message TEXT,
            metadata JSON NOT NULL
        );

        CREATE TABLE IF NOT EXISTS transcriptions (
            id TEXT PRIMARY KEY,
            recording_id TEXT UNIQUE NOT NULL
                REFERENCES recordings(id) ON DELETE CASCADE,
            content TEXT NOT NULL,
            language TEXT NOT NULL,
            confidence REAL NOT NULL,
            segments JSON NOT NULL,
            created_at INTEGER NOT NULL,
            modified_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_recordings_filepath ON recordings(filepath);
        CREATE INDEX IF NOT EXISTS idx_recordings_status ON recordings(status);
        "#,
    )
}
