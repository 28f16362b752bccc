use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::StateStore;
use crate::error::{AutopilotError, Result};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS autopilot_state (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)";

/// Single-table SQLite store. Values are stored as JSON text.
///
/// `rusqlite::Connection` is not `Sync`, so every call runs on the blocking
/// pool behind a mutex.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database at `path`, creating the table if needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute(SCHEMA, [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| AutopilotError::Store("sqlite connection mutex poisoned".into()))?;
            f(&guard)
        })
        .await?
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let text: Option<String> = conn
                .query_row(
                    "SELECT value FROM autopilot_state WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            match text {
                None => Ok(None),
                Some(t) => serde_json::from_str(&t)
                    .map(Some)
                    .map_err(|e| AutopilotError::CorruptValue {
                        key,
                        reason: e.to_string(),
                    }),
            }
        })
        .await
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let key = key.to_string();
        let text = serde_json::to_string(&value)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO autopilot_state (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, text],
            )?;
            Ok(())
        })
        .await
    }

    async fn del(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM autopilot_state WHERE key = ?1", params![key])?;
            Ok(())
        })
        .await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.to_string();
        self.with_conn(move |conn| {
            // substr/length count characters on both sides, so this is an
            // exact, case-sensitive prefix match (unlike LIKE).
            let mut stmt = conn.prepare(
                "SELECT key FROM autopilot_state
                 WHERE substr(key, 1, length(?1)) = ?1
                 ORDER BY key",
            )?;
            let rows = stmt.query_map(params![prefix], |row| row.get::<_, String>(0))?;
            let mut keys = Vec::new();
            for row in rows {
                keys.push(row?);
            }
            Ok(keys)
        })
        .await
    }
}
