use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::StateStore;
use crate::error::{AutopilotError, Result};
use crate::io::{atomic_write, read_optional};

type Document = BTreeMap<String, Value>;

/// Whole-document JSON store. Every mutation reads the file, applies the
/// change, and atomically replaces the file. A missing file reads as empty.
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Document> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<Document> {
            match read_optional(&path)? {
                None => Ok(Document::new()),
                Some(text) if text.trim().is_empty() => Ok(Document::new()),
                Some(text) => serde_json::from_str(&text).map_err(|e| {
                    AutopilotError::Store(format!("{}: {e}", path.display()))
                }),
            }
        })
        .await?
    }

    async fn persist(&self, doc: Document) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let data = serde_json::to_vec_pretty(&doc)?;
            atomic_write(&path, &data)
        })
        .await?
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load().await?;
        Ok(doc.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load().await?;
        doc.insert(key.to_string(), value);
        self.persist(doc).await
    }

    async fn del(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load().await?;
        if doc.remove(key).is_none() {
            return Ok(());
        }
        self.persist(doc).await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let _guard = self.lock.lock().await;
        let doc = self.load().await?;
        Ok(doc
            .into_keys()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(&dir.path().join("state.json"));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.keys("").await.unwrap().is_empty());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn set_writes_whole_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/state.json");
        let store = JsonFileStore::new(&path);
        store.set("a", json!("one")).await.unwrap();
        store.set("b", json!({"n": 2})).await.unwrap();

        let on_disk: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk, json!({"a": "one", "b": {"n": 2}}));
    }

    #[tokio::test]
    async fn reopening_sees_previous_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        JsonFileStore::new(&path).set("k", json!(1)).await.unwrap();
        assert_eq!(JsonFileStore::new(&path).get("k").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn del_missing_key_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let store = JsonFileStore::new(&path);
        store.del("ghost").await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn keys_filters_by_prefix() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(&dir.path().join("state.json"));
        store.set("x:2", json!(2)).await.unwrap();
        store.set("x:1", json!(1)).await.unwrap();
        store.set("y:1", json!(3)).await.unwrap();
        assert_eq!(store.keys("x:").await.unwrap(), vec!["x:1", "x:2"]);
    }

    #[tokio::test]
    async fn malformed_document_is_a_store_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = JsonFileStore::new(&path).get("k").await.unwrap_err();
        assert!(matches!(err, AutopilotError::Store(_)));
    }
}
