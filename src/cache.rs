//! Memoizing Call Wrapper
//!
//! Coalesces and persists the results of expensive asynchronous lookups,
//! keyed by an operation namespace plus a caller-supplied serializable key.
//! Concurrent calls for the same key share one physical invocation
//! (single-flight), results are invalidated after a TTL, and an injectable
//! [`DurableStore`] keeps them across process restarts.
//!
//! ## Usage
//!
//! ```no_run
//! use lookup_memoize::{CacheManager, LookupError};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), LookupError> {
//! let manager = CacheManager::new();
//! let movie_info = manager.cached_with_ttl("movie-info", Duration::from_secs(3600));
//!
//! let title: String = movie_info
//!     .get_or_fetch(&550, || async {
//!         // ... call the provider here ...
//!         Ok("Fight Club".to_string())
//!     })
//!     .await?;
//! # Ok(()) }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::store::DurableStore;
use crate::LookupError;

/// Default time-to-live for cached lookups: one day.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60 * 24);

/// Outcome delivered to every caller coalesced onto one in-flight lookup.
type Outcome = Result<Value, LookupError>;

type FlightTx = broadcast::Sender<Outcome>;

/// Cache record as written to memory and the durable store.
///
/// The TTL is captured at write time; a later TTL change on the wrapper
/// never retroactively re-ages entries stored under the old one.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    value: Value,
    stored_at_ms: u64,
    ttl_ms: u64,
}

impl StoredEntry {
    fn is_fresh(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.stored_at_ms) <= self.ttl_ms
    }
}

/// Result of atomically claiming the in-flight slot for a key.
enum Flight {
    /// This caller owns the slot and must invoke the lookup and settle it.
    Owner(FlightTx),
    /// Another caller owns the slot; await its broadcast outcome.
    Waiter(broadcast::Receiver<Outcome>),
}

struct ManagerInner {
    entries: DashMap<String, StoredEntry>,
    in_flight: DashMap<String, FlightTx>,
    store: Option<Arc<dyn DurableStore>>,
    advised: AtomicBool,
}

/// Process-wide memoization manager.
///
/// Constructed once at startup and handed by reference (it is cheap to
/// clone) to every wrapped operation. One manager owns one cache store;
/// operations are namespaced within it via [`CacheManager::cached`].
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<ManagerInner>,
}

impl CacheManager {
    /// Create a memory-only manager.
    ///
    /// Results do not outlive the process; a one-time advisory is logged on
    /// first use to make the volatility visible.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a manager backed by a durable key-value store.
    pub fn with_store(store: Arc<dyn DurableStore>) -> Self {
        Self::build(Some(store))
    }

    fn build(store: Option<Arc<dyn DurableStore>>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                entries: DashMap::new(),
                in_flight: DashMap::new(),
                store,
                advised: AtomicBool::new(false),
            }),
        }
    }

    /// Wrap an operation namespace with the default one-day TTL.
    ///
    /// `name` must be unique per distinct underlying operation; it prefixes
    /// every cache key so unrelated operations sharing this manager never
    /// collide.
    pub fn cached(&self, name: impl Into<String>) -> Cached {
        self.cached_with_ttl(name, DEFAULT_TTL)
    }

    /// Wrap an operation namespace with an explicit TTL.
    ///
    /// The TTL is captured here, at wrap time. A zero TTL disables caching
    /// entirely: every access is a miss and nothing is stored, though
    /// concurrent callers are still coalesced onto one invocation.
    pub fn cached_with_ttl(&self, name: impl Into<String>, ttl: Duration) -> Cached {
        Cached {
            manager: self.clone(),
            name: name.into(),
            ttl,
        }
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.inner.entries.len(),
            in_flight: self.inner.in_flight.len(),
            backend: self
                .inner
                .store
                .as_ref()
                .map_or("volatile", |s| s.name())
                .to_string(),
        }
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagerInner {
    fn advise_if_volatile(&self) {
        if self.store.is_none() && !self.advised.swap(true, Ordering::Relaxed) {
            warn!("no durable store configured; cached lookups will not outlive this process");
        }
    }

    /// Look up a stored entry: memory first, then read-through from the
    /// durable store. Store read failures are treated as misses.
    async fn lookup(&self, key: &str) -> Option<StoredEntry> {
        if let Some(entry) = self.entries.get(key) {
            return Some(entry.clone());
        }
        let store = self.store.as_ref()?;
        match store.get(key).await {
            Ok(Some(blob)) => match serde_json::from_str::<StoredEntry>(&blob) {
                Ok(entry) => {
                    self.entries.insert(key.to_string(), entry.clone());
                    Some(entry)
                }
                Err(e) => {
                    warn!(key = key, error = %e, "unreadable cache record, treating as miss");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key = key, error = %e, "durable store read failed, treating as miss");
                None
            }
        }
    }

    /// Record a fresh value in memory and write it through to the durable
    /// store. A failed durable write is logged, never surfaced: the caller
    /// still gets the freshly computed value.
    async fn commit(&self, key: &str, value: &Value, ttl: Duration) {
        let entry = StoredEntry {
            value: value.clone(),
            stored_at_ms: now_ms(),
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        };
        self.entries.insert(key.to_string(), entry.clone());

        let Some(store) = self.store.as_ref() else {
            return;
        };
        match serde_json::to_string(&entry) {
            Ok(blob) => {
                if let Err(e) = store.set(key, &blob).await {
                    warn!(key = key, error = %e, "durable store write failed; result kept in memory only");
                }
            }
            Err(e) => {
                warn!(key = key, error = %e, "cache record not serializable; skipping durable write");
            }
        }
    }

    /// Atomically claim the in-flight slot for `key`, or subscribe to the
    /// claim that beat us to it. The entry API holds the shard lock across
    /// the check-and-insert, which is what makes single-flight hold under
    /// true parallelism.
    fn join_or_register(&self, key: &str) -> Flight {
        match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(occupied) => Flight::Waiter(occupied.get().subscribe()),
            Entry::Vacant(vacant) => {
                let (tx, _rx) = broadcast::channel(1);
                vacant.insert(tx.clone());
                Flight::Owner(tx)
            }
        }
    }

    /// Settle an in-flight lookup: clear the slot, then broadcast.
    ///
    /// Removal must precede the send so that a caller arriving after the
    /// broadcast finds either the committed entry (success) or a clean miss
    /// (failure), never a dead slot. Waiters subscribe under the shard lock,
    /// so anyone who found the slot is subscribed before removal completes.
    fn settle(&self, key: &str, tx: &FlightTx, outcome: Outcome) {
        self.in_flight.remove(key);
        let _ = tx.send(outcome);
    }
}

/// A memoized handle for one named operation.
///
/// Produced by [`CacheManager::cached`]; cheap to clone and share across
/// tasks. The TTL was captured when the handle was created.
#[derive(Clone)]
pub struct Cached {
    manager: CacheManager,
    name: String,
    ttl: Duration,
}

impl Cached {
    /// The operation namespace this handle caches under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The TTL captured at wrap time.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached value for `key`, or invoke `fetch` to produce it.
    ///
    /// `key` is the caller-chosen significant subset of the call's
    /// parameters — anything contextual that does not affect the result
    /// belongs in the `fetch` closure's captures instead. `fetch` must be
    /// safe to coalesce: concurrent callers with the same key share one
    /// physical invocation and all observe its outcome, value or error.
    ///
    /// A failed fetch never writes a cache entry; the next independent call
    /// starts from scratch.
    ///
    /// # Errors
    ///
    /// Propagates the fetch error verbatim, or [`LookupError::Codec`] if the
    /// key or value cannot round-trip through serialization.
    pub async fn get_or_fetch<K, V, F, Fut>(&self, key: &K, fetch: F) -> Result<V, LookupError>
    where
        K: Serialize + ?Sized,
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, LookupError>>,
    {
        let inner = &self.manager.inner;
        inner.advise_if_volatile();

        let key = cache_key(&self.name, key)?;
        let caching = !self.ttl.is_zero();

        // Someone already fetching this key? Subscribe under the map guard
        // so the owner cannot settle between lookup and subscription.
        let waiting = inner.in_flight.get(&key).map(|slot| slot.value().subscribe());
        if let Some(rx) = waiting {
            debug!(op = %self.name, "joined in-flight lookup");
            return await_shared(rx).await;
        }

        if caching {
            if let Some(entry) = inner.lookup(&key).await {
                if entry.is_fresh(now_ms()) {
                    debug!(op = %self.name, "cache hit");
                    return decode(&self.name, entry.value);
                }
                debug!(op = %self.name, "cache entry expired");
                inner.entries.remove(&key);
            } else {
                debug!(op = %self.name, "cache miss");
            }
        }

        // The durable read above suspended, so re-race for the slot.
        let tx = match inner.join_or_register(&key) {
            Flight::Owner(tx) => tx,
            Flight::Waiter(rx) => {
                debug!(op = %self.name, "joined in-flight lookup");
                return await_shared(rx).await;
            }
        };

        match fetch().await {
            Ok(value) => match serde_json::to_value(&value) {
                Ok(json) => {
                    if caching {
                        inner.commit(&key, &json, self.ttl).await;
                    }
                    inner.settle(&key, &tx, Ok(json));
                    Ok(value)
                }
                Err(e) => {
                    let err = LookupError::Codec(format!("encode {}: {e}", self.name));
                    inner.settle(&key, &tx, Err(err.clone()));
                    Err(err)
                }
            },
            Err(err) => {
                inner.settle(&key, &tx, Err(err.clone()));
                Err(err)
            }
        }
    }
}

/// Await the outcome of an in-flight lookup owned by another caller.
async fn await_shared<V: DeserializeOwned>(
    mut rx: broadcast::Receiver<Outcome>,
) -> Result<V, LookupError> {
    match rx.recv().await {
        Ok(Ok(json)) => serde_json::from_value(json)
            .map_err(|e| LookupError::Codec(format!("decode shared outcome: {e}"))),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(LookupError::ChannelClosed),
    }
}

fn decode<V: DeserializeOwned>(name: &str, value: Value) -> Result<V, LookupError> {
    serde_json::from_value(value).map_err(|e| LookupError::Codec(format!("decode {name}: {e}")))
}

/// Derive the cache key for an operation name and serialized key.
///
/// Deterministic: equal names and keys always map to the same string, and
/// the name prefix keeps distinct operations from ever colliding.
///
/// # Errors
///
/// Returns [`LookupError::Codec`] if the key is not serializable.
pub fn cache_key<K: Serialize + ?Sized>(name: &str, key: &K) -> Result<String, LookupError> {
    let serialized = serde_json::to_string(key)
        .map_err(|e| LookupError::Codec(format!("serialize key for {name}: {e}")))?;
    Ok(format!("cache-{name}-{serialized}"))
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Cache statistics.
#[derive(Debug)]
pub struct CacheStats {
    /// Number of entries currently held in memory.
    pub entries: usize,
    /// Number of lookups currently in flight.
    pub in_flight: usize,
    /// Name of the durable backend (`"volatile"` when memory-only).
    pub backend: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counted_fetch(
        counter: &Arc<AtomicUsize>,
        value: &str,
    ) -> impl Future<Output = Result<String, LookupError>> {
        let counter = counter.clone();
        let value = value.to_string();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        }
    }

    #[test]
    fn test_cache_key_deterministic() {
        let k1 = cache_key("movie-info", &550).unwrap();
        let k2 = cache_key("movie-info", &550).unwrap();
        assert_eq!(k1, k2);
        assert_eq!(k1, "cache-movie-info-550");
    }

    #[test]
    fn test_cache_key_namespaced() {
        let movie = cache_key("movie-info", &42).unwrap();
        let book = cache_key("book-info", &42).unwrap();
        assert_ne!(movie, book);
    }

    #[test]
    fn test_cache_key_distinguishes_keys() {
        let a = cache_key("places", &("pizza", 3)).unwrap();
        let b = cache_key("places", &("pizza", 4)).unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_second_call_served_from_cache() {
        let manager = CacheManager::new();
        let cached = manager.cached("op");
        let calls = Arc::new(AtomicUsize::new(0));

        let first: String = cached
            .get_or_fetch(&"k", || counted_fetch(&calls, "v"))
            .await
            .unwrap();
        let second: String = cached
            .get_or_fetch(&"k", || counted_fetch(&calls, "other"))
            .await
            .unwrap();

        assert_eq!(first, "v");
        assert_eq!(second, "v", "second call must see the stored value");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_disables_caching() {
        let manager = CacheManager::new();
        let cached = manager.cached_with_ttl("op", Duration::ZERO);
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let _: String = cached
                .get_or_fetch(&"k", || counted_fetch(&calls, "v"))
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(manager.stats().entries, 0, "zero TTL must store nothing");
    }

    #[tokio::test]
    async fn test_expired_entry_refetched() {
        let manager = CacheManager::new();
        let cached = manager.cached_with_ttl("op", Duration::from_millis(50));
        let calls = Arc::new(AtomicUsize::new(0));

        let _: String = cached
            .get_or_fetch(&1, || counted_fetch(&calls, "v"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        let _: String = cached
            .get_or_fetch(&1, || counted_fetch(&calls, "v"))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_leaves_cache_unchanged() {
        let manager = CacheManager::new();
        let cached = manager.cached("op");

        let result: Result<String, _> = cached
            .get_or_fetch(&"k", || async {
                Err(LookupError::Upstream("boom".into()))
            })
            .await;

        assert_eq!(result, Err(LookupError::Upstream("boom".into())));
        assert_eq!(manager.stats().entries, 0);
        assert_eq!(manager.stats().in_flight, 0, "slot must be cleared");
    }

    #[tokio::test]
    async fn test_stats_reports_backend() {
        let manager = CacheManager::new();
        assert_eq!(manager.stats().backend, "volatile");

        let cached = manager.cached("op");
        let _: i32 = cached.get_or_fetch(&"k", || async { Ok(7) }).await.unwrap();
        assert_eq!(manager.stats().entries, 1);
    }

    #[tokio::test]
    async fn test_struct_values_round_trip() {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        struct Movie {
            id: u32,
            title: String,
        }

        let manager = CacheManager::new();
        let cached = manager.cached("movie-info");
        let movie = Movie {
            id: 550,
            title: "Fight Club".into(),
        };

        let stored: Movie = cached
            .get_or_fetch(&550, || {
                let movie = movie.clone();
                async move { Ok(movie) }
            })
            .await
            .unwrap();
        let replayed: Movie = cached
            .get_or_fetch(&550, || async {
                Err(LookupError::Upstream("must not be called".into()))
            })
            .await
            .unwrap();

        assert_eq!(stored, movie);
        assert_eq!(replayed, movie);
    }
}
