use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::{CacheError, Result, SlotStorage};

/// Slot storage backed by a single SQLite table
///
/// SQLite was chosen because:
/// - Zero-config embedded database
/// - Atomic whole-row replace, so a crash never leaves half a document
/// - Doesn't require a separate process
pub struct SqliteSlots {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSlots {
    /// Open (or create) the database at `db_path`
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        Self::init_schema(&conn)?;

        debug!("Opened slot database at {}", db_path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Throwaway database, gone when dropped
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS slots (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    /// Run a blocking closure against the connection off the async executor
    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| CacheError::Task("connection lock poisoned".to_string()))?;
            op(&guard).map_err(CacheError::from)
        })
        .await?
    }
}

#[async_trait]
impl SlotStorage for SqliteSlots {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();

        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT value FROM slots WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
        })
        .await
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        let now = chrono::Utc::now().timestamp_millis();

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO slots (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, now],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let key = key.to_string();

        self.with_conn(move |conn| {
            conn.execute("DELETE FROM slots WHERE key = ?1", params![key])?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_slot_reads_none() {
        let slots = SqliteSlots::open_in_memory().unwrap();
        assert_eq!(slots.read("@recent_images").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_replaces_whole_value() {
        let slots = SqliteSlots::open_in_memory().unwrap();

        slots.write("k", "[1,2,3]").await.unwrap();
        slots.write("k", "[4]").await.unwrap();

        assert_eq!(slots.read("k").await.unwrap().as_deref(), Some("[4]"));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let slots = SqliteSlots::open_in_memory().unwrap();

        slots.write("k", "v").await.unwrap();
        slots.remove("k").await.unwrap();
        slots.remove("k").await.unwrap();

        assert_eq!(slots.read("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let slots = SqliteSlots::open_in_memory().unwrap();

        slots.write("a", "1").await.unwrap();
        slots.write("b", "2").await.unwrap();
        slots.remove("a").await.unwrap();

        assert_eq!(slots.read("a").await.unwrap(), None);
        assert_eq!(slots.read("b").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("history.db");

        {
            let slots = SqliteSlots::open(&path).unwrap();
            slots.write("k", "persisted").await.unwrap();
        }

        let slots = SqliteSlots::open(&path).unwrap();
        assert_eq!(slots.read("k").await.unwrap().as_deref(), Some("persisted"));
    }
}
