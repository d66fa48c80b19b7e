//! # lookup-memoize
//!
//! Memoizing and retrying call wrappers for external metadata lookups.
//!
//! Adapters that enrich books, movies, places, links, and podcasts all share
//! the same failure mode: slow, flaky third-party APIs that are expensive to
//! call twice. This crate provides the two composable decorators those
//! adapters are built on:
//!
//! ```text
//! caller → Cached::get_or_fetch ─ hit ──────────────────────→ stored value
//!                     │ miss
//!                     └→ RetryPolicy::retry → underlying lookup → commit → value
//! ```
//!
//! - [`cache::CacheManager`] — memoizes asynchronous lookups keyed by an
//!   operation namespace plus a serializable key, with TTL invalidation,
//!   single-flight coalescing, and write-through to an injectable
//!   [`store::DurableStore`].
//! - [`retry::RetryPolicy`] — bounded retry with a fixed per-attempt delay
//!   (exponential backoff available as an explicit opt-in).

// ── Lint policy ───────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod cache;
pub mod config;
pub mod retry;
pub mod store;

// Re-exports for convenience
pub use cache::{CacheManager, CacheStats, Cached, DEFAULT_TTL};
pub use retry::{RetryPolicy, RetryStrategy};
pub use store::{DurableStore, JsonFileStore, MemoryStore};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"` — structured JSON output for production log aggregators
/// - anything else (including unset) — human-readable pretty output
///   for local development
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=debug`).
///
/// # Errors
///
/// Returns [`LookupError::Other`] if the global subscriber has already been
/// set (e.g. by a previous call or a test harness).
pub fn init_tracing() -> Result<(), LookupError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| LookupError::Other(format!("tracing init failed: {e}")))
}

/// Top-level lookup errors.
///
/// Every error surface in the cache/retry core maps to a variant here. The
/// enum is `Clone` (string payloads only) because a single failure must be
/// delivered verbatim to every caller coalesced onto one in-flight lookup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// The underlying lookup failed (network, API, or parsing error).
    #[error("lookup failed: {0}")]
    Upstream(String),

    /// The durable key-value store failed to read or write.
    ///
    /// The cache core treats reads that fail this way as misses and writes
    /// as non-fatal, so callers usually only see this from direct
    /// [`store::DurableStore`] use.
    #[error("store error: {0}")]
    Store(String),

    /// A cache record could not be serialized or deserialized.
    #[error("codec error: {0}")]
    Codec(String),

    /// An in-flight lookup settled without broadcasting an outcome.
    ///
    /// Only reachable when the owning call is torn down mid-flight;
    /// cancellation is otherwise unsupported.
    #[error("in-flight lookup channel closed")]
    ChannelClosed,

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}
