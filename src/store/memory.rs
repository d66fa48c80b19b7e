//! In-process map store.
//!
//! Useful in tests and in embedders that handle persistence themselves and
//! only want the single-flight and TTL behavior of the cache core.

use async_trait::async_trait;
use dashmap::DashMap;

use super::DurableStore;
use crate::LookupError;

/// A [`DurableStore`] backed by an in-process concurrent map.
///
/// "Durable" only for the lifetime of the process; share one instance across
/// managers to simulate storage surviving a manager restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no blobs.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, LookupError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, blob: &str) -> Result<(), LookupError> {
        self.entries.insert(key.to_string(), blob.to_string());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
