//! Durable Key-Value Collaborators
//!
//! The cache core persists results through the [`DurableStore`] trait so the
//! hosting application chooses where cached lookups live: nowhere
//! (memory-only manager), a scratch map, a JSON file, or anything else that
//! can hold string blobs by key.
//!
//! An absent key is a valid, expected state — first run, cleared storage.
//! Implementations are accessed sequentially per key by the cache core; they
//! are never asked to service overlapping writes for the same key.

pub mod file;
pub mod memory;

use async_trait::async_trait;

use crate::LookupError;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// Asynchronous key-value persistence for cache records.
///
/// Implementations must be thread-safe (`Send + Sync`) for use across tasks.
/// The trait is object-safe to allow dynamic dispatch via
/// `Arc<dyn DurableStore>`.
#[async_trait]
pub trait DurableStore: Send + Sync + 'static {
    /// Fetch the blob stored under `key`, or `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<String>, LookupError>;

    /// Store `blob` under `key`, replacing any previous value.
    async fn set(&self, key: &str, blob: &str) -> Result<(), LookupError>;

    /// Short backend name for diagnostics.
    fn name(&self) -> &'static str {
        "durable"
    }
}
