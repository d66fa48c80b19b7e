//! Single-file JSON store.
//!
//! Keeps every blob in one JSON object on disk, loaded lazily at most once
//! per process. Writes are serialized through a mutex held across the disk
//! write, so the file never sees overlapping writers.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::{Mutex, OnceCell};

use super::DurableStore;
use crate::LookupError;

/// A [`DurableStore`] persisting to a single JSON file.
///
/// A missing file is treated as an empty store (the expected first-run
/// state). The whole map is rewritten on every `set`; this store is meant
/// for the modest cardinality of lookup caches, not bulk data.
pub struct JsonFileStore {
    path: PathBuf,
    state: OnceCell<Mutex<HashMap<String, String>>>,
}

impl JsonFileStore {
    /// Create a store backed by the file at `path`.
    ///
    /// Nothing is read until the first access.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: OnceCell::new(),
        }
    }

    async fn map(&self) -> Result<&Mutex<HashMap<String, String>>, LookupError> {
        self.state
            .get_or_try_init(|| async {
                match tokio::fs::read_to_string(&self.path).await {
                    Ok(raw) => serde_json::from_str(&raw).map(Mutex::new).map_err(|e| {
                        LookupError::Store(format!(
                            "corrupt store file {}: {e}",
                            self.path.display()
                        ))
                    }),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        Ok(Mutex::new(HashMap::new()))
                    }
                    Err(e) => Err(LookupError::Store(format!(
                        "read {}: {e}",
                        self.path.display()
                    ))),
                }
            })
            .await
    }
}

#[async_trait]
impl DurableStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, LookupError> {
        let map = self.map().await?;
        Ok(map.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, blob: &str) -> Result<(), LookupError> {
        let map = self.map().await?;
        let mut guard = map.lock().await;
        guard.insert(key.to_string(), blob.to_string());
        let serialized = serde_json::to_string(&*guard)
            .map_err(|e| LookupError::Store(format!("serialize store map: {e}")))?;
        tokio::fs::write(&self.path, serialized)
            .await
            .map_err(|e| LookupError::Store(format!("write {}: {e}", self.path.display())))
    }

    fn name(&self) -> &'static str {
        "json-file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("cache.json"));
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("cache.json"));

        store.set("k", "blob").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("blob".to_string()));
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let store = JsonFileStore::new(&path);
        store.set("k1", "v1").await.unwrap();
        store.set("k2", "v2").await.unwrap();
        drop(store);

        let reopened = JsonFileStore::new(&path);
        assert_eq!(reopened.get("k1").await.unwrap(), Some("v1".to_string()));
        assert_eq!(reopened.get("k2").await.unwrap(), Some("v2".to_string()));
    }

    #[tokio::test]
    async fn test_corrupt_file_surfaces_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        tokio::fs::write(&path, "not json").await.unwrap();

        let store = JsonFileStore::new(&path);
        let err = store.get("k").await.unwrap_err();
        assert!(matches!(err, LookupError::Store(_)));
    }
}
