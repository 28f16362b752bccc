//! Key-value persistence for markers, retry state, and the settlement cursor.
//!
//! Two interchangeable backends implement [`StateStore`]:
//!
//! - [`JsonFileStore`]: one JSON document, read-modify-write with an atomic
//!   rename on every mutation.
//! - [`SqliteStore`]: a single `key TEXT PRIMARY KEY, value TEXT` table.
//!
//! Neither backend coordinates between processes; one orchestrator instance
//! owns a store at a time.
//!
//! # Key namespace
//!
//! ```text
//! autopilot:bid-marker:<jobId>            → "2026-03-01T12:00:00.000Z"
//! autopilot:submit-state:<jobId>:<bidId>  → SubmitState
//! autopilot:settlement-cursor             → "2026-03-01T12:00:00.000Z"
//! autopilot:withdrawn-bid:<bidId>         → "2026-03-01T12:00:00.000Z"
//! ```

mod json_file;
mod sqlite;

pub use json_file::JsonFileStore;
pub use sqlite::SqliteStore;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::StoreBackend;
use crate::error::{AutopilotError, Result};
use crate::policy::SubmitState;

pub const BID_MARKER_PREFIX: &str = "autopilot:bid-marker:";
pub const SUBMIT_STATE_PREFIX: &str = "autopilot:submit-state:";
pub const SETTLEMENT_CURSOR_KEY: &str = "autopilot:settlement-cursor";
pub const WITHDRAWN_BID_PREFIX: &str = "autopilot:withdrawn-bid:";

pub fn bid_marker_key(job_id: &str) -> String {
    format!("{BID_MARKER_PREFIX}{job_id}")
}

pub fn submit_state_key(job_id: &str, bid_id: &str) -> String {
    format!("{SUBMIT_STATE_PREFIX}{job_id}:{bid_id}")
}

pub fn withdrawn_bid_key(bid_id: &str) -> String {
    format!("{WITHDRAWN_BID_PREFIX}{bid_id}")
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Removing a missing key is not an error.
    async fn del(&self, key: &str) -> Result<()>;

    /// Keys starting with `prefix`, in ascending order.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Open the backend selected by configuration.
pub fn open_store(backend: StoreBackend, path: &Path) -> Result<Arc<dyn StateStore>> {
    Ok(match backend {
        StoreBackend::Json => Arc::new(JsonFileStore::new(path)),
        StoreBackend::Sqlite => Arc::new(SqliteStore::open(path)?),
    })
}

// ---------------------------------------------------------------------------
// AutopilotStore
// ---------------------------------------------------------------------------

/// Typed view over a [`StateStore`] using the autopilot key namespace.
#[derive(Clone)]
pub struct AutopilotStore {
    inner: Arc<dyn StateStore>,
}

impl AutopilotStore {
    pub fn new(inner: Arc<dyn StateStore>) -> Self {
        Self { inner }
    }

    pub fn raw(&self) -> &Arc<dyn StateStore> {
        &self.inner
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        match self.inner.get(key).await? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(AutopilotError::CorruptValue {
                key: key.to_string(),
                reason: format!("expected a timestamp string, found {other}"),
            }),
        }
    }

    pub async fn bid_marker(&self, job_id: &str) -> Result<Option<String>> {
        self.get_string(&bid_marker_key(job_id)).await
    }

    pub async fn set_bid_marker(&self, job_id: &str, at: &str) -> Result<()> {
        self.inner
            .set(&bid_marker_key(job_id), Value::String(at.to_string()))
            .await
    }

    pub async fn clear_bid_marker(&self, job_id: &str) -> Result<()> {
        self.inner.del(&bid_marker_key(job_id)).await
    }

    /// All markers as `(job_id, timestamp)`, ordered by job id.
    pub async fn bid_markers(&self) -> Result<Vec<(String, String)>> {
        let mut out = Vec::new();
        for key in self.inner.keys(BID_MARKER_PREFIX).await? {
            let job_id = key[BID_MARKER_PREFIX.len()..].to_string();
            if let Some(at) = self.get_string(&key).await? {
                out.push((job_id, at));
            }
        }
        Ok(out)
    }

    pub async fn submit_state(&self, job_id: &str, bid_id: &str) -> Result<Option<SubmitState>> {
        let key = submit_state_key(job_id, bid_id);
        match self.inner.get(&key).await? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| AutopilotError::CorruptValue {
                    key,
                    reason: e.to_string(),
                }),
        }
    }

    pub async fn set_submit_state(
        &self,
        job_id: &str,
        bid_id: &str,
        state: &SubmitState,
    ) -> Result<()> {
        let value = serde_json::to_value(state)?;
        self.inner.set(&submit_state_key(job_id, bid_id), value).await
    }

    pub async fn mark_bid_withdrawn(&self, bid_id: &str, at: &str) -> Result<()> {
        self.inner
            .set(&withdrawn_bid_key(bid_id), Value::String(at.to_string()))
            .await
    }

    pub async fn withdrawn_at(&self, bid_id: &str) -> Result<Option<String>> {
        self.get_string(&withdrawn_bid_key(bid_id)).await
    }

    pub async fn settlement_cursor(&self) -> Result<Option<String>> {
        self.get_string(SETTLEMENT_CURSOR_KEY).await
    }

    pub async fn set_settlement_cursor(&self, at: &str) -> Result<()> {
        self.inner
            .set(SETTLEMENT_CURSOR_KEY, Value::String(at.to_string()))
            .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
