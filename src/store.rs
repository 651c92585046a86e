//! Durable key-value persistence for the tracker collections.
//!
//! Each collection lives under its own key and is written by a single
//! autocommit statement, so a failed write to one key never touches another.

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use std::path::Path;

use crate::internal_error::InternalResult;

pub const TASKS: &str = "tasks";
pub const ENGLISH: &str = "english";
pub const GAME_STATS: &str = "gamestats";
pub const PRAYER_IMAGES: &str = "prayer_images";
pub const NEXT_ID: &str = "next_id";

pub trait Store: Send {
    /// Returns the JSON document stored under `key`, or `None` when nothing
    /// usable is stored there.
    fn get(&self, key: &str) -> InternalResult<Option<Value>>;

    /// Persists `value` under `key` before returning.
    fn set(&mut self, key: &str, value: &Value) -> InternalResult<()>;
}

pub struct SqliteStore {
    connection: Connection,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> InternalResult<SqliteStore> {
        SqliteStore::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> InternalResult<SqliteStore> {
        SqliteStore::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(connection: Connection) -> InternalResult<SqliteStore> {
        connection.execute(
            "CREATE TABLE IF NOT EXISTS kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            params![],
        )?;

        Ok(SqliteStore { connection })
    }
}

impl Store for SqliteStore {
    fn get(&self, key: &str) -> InternalResult<Option<Value>> {
        let text: Option<String> = self
            .connection
            .query_row("SELECT value FROM kv WHERE key = (?1)", params![key], |row| {
                row.get(0)
            })
            .optional()?;

        let Some(text) = text else {
            return Ok(None);
        };

        match serde_json::from_str(&text) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(key, error = %e, "stored value is not valid JSON, ignoring it");
                Ok(None)
            }
        }
    }

    fn set(&mut self, key: &str, value: &Value) -> InternalResult<()> {
        let text = serde_json::to_string(value)?;
        self.connection.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, text],
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_key_is_absent() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.get(TASKS).unwrap().is_none());
    }

    #[test]
    fn set_overwrites_previous_value() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.set(NEXT_ID, &json!(3)).unwrap();
        store.set(NEXT_ID, &json!(7)).unwrap();

        assert_eq!(store.get(NEXT_ID).unwrap(), Some(json!(7)));
    }

    #[test]
    fn keys_are_independent() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.set(TASKS, &json!([])).unwrap();
        store.set(ENGLISH, &json!({"A1.1": []})).unwrap();

        assert_eq!(store.get(TASKS).unwrap(), Some(json!([])));
        assert_eq!(store.get(ENGLISH).unwrap(), Some(json!({"A1.1": []})));
        assert!(store.get(GAME_STATS).unwrap().is_none());
    }

    #[test]
    fn malformed_text_reads_as_absent() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .connection
            .execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)",
                params![GAME_STATS, "{not json"],
            )
            .unwrap();

        assert!(store.get(GAME_STATS).unwrap().is_none());
    }

    #[test]
    fn values_survive_reopening_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.db");

        {
            let mut store = SqliteStore::open(&path).unwrap();
            store
                .set(PRAYER_IMAGES, &json!({"0_1": "data:image/png;base64,AA=="}))
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.get(PRAYER_IMAGES).unwrap(),
            Some(json!({"0_1": "data:image/png;base64,AA=="}))
        );
    }
}
