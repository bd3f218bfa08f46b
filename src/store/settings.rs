//! Settings repository: persisted key/value pairs.

use rusqlite::{params, OptionalExtension};

use super::{Store, StoreError};

/// Setting keys the core itself consults.
pub const SETTING_AUTO_TRANSCRIBE: &str = "auto_transcribe";
pub const SETTING_LANGUAGE: &str = "language";

impl Store {
    /// Get a setting value.
    pub fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_conn(|conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM settings WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
    }

    /// Set (insert or update) a setting.
    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
    }

    /// All settings, sorted by key.
    pub fn all_settings(&self) -> Result<Vec<(String, String)>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}
