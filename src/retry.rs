//! Retry Wrapper
//!
//! Bounded retry of failed asynchronous lookups with a non-blocking delay
//! between attempts. The baseline policy waits a fixed interval per attempt;
//! exponential backoff is available as an explicit opt-in, never implicitly.
//!
//! ## Usage
//!
//! ```no_run
//! use lookup_memoize::{LookupError, RetryPolicy};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), LookupError> {
//! let policy = RetryPolicy::fixed(3, Duration::from_millis(250));
//!
//! let body = policy
//!     .retry("link-preview", || async {
//!         // ... fetch the page here ...
//!         Ok::<_, LookupError>("<html>...".to_string())
//!     })
//!     .await?;
//! # Ok(()) }
//! ```

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Default retry budget: five retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: usize = 5;

/// Default delay between attempts: ten seconds.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(10);

/// Retry policy configuration.
///
/// A policy is inert data; each call to [`RetryPolicy::retry`] runs with its
/// own attempt counter, so retry state is never shared across calls.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Retries granted after the initial attempt (total attempts = this + 1).
    pub max_retries: usize,
    /// How long to wait between attempts.
    pub strategy: RetryStrategy,
}

/// Retry backoff strategy.
#[derive(Clone, Debug)]
pub enum RetryStrategy {
    /// The same delay before every retry.
    Fixed(Duration),
    /// Delay grows by `multiplier` per attempt, capped at `max_delay`.
    Exponential {
        /// Delay before the first retry.
        initial_delay: Duration,
        /// Upper bound on any single delay.
        max_delay: Duration,
        /// Growth factor per attempt.
        multiplier: f64,
    },
}

impl RetryPolicy {
    /// Create a policy with a fixed delay between attempts.
    pub fn fixed(max_retries: usize, delay: Duration) -> Self {
        Self {
            max_retries,
            strategy: RetryStrategy::Fixed(delay),
        }
    }

    /// Create a policy with exponential backoff (doubling, capped at 60s).
    pub fn exponential(max_retries: usize, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            strategy: RetryStrategy::Exponential {
                initial_delay,
                max_delay: Duration::from_secs(60),
                multiplier: 2.0,
            },
        }
    }

    /// Execute `f`, retrying failures until the budget is exhausted.
    ///
    /// The wait between attempts suspends the calling task; no worker thread
    /// is occupied. Once the budget runs out the final error is returned
    /// unchanged — never swallowed or transformed.
    ///
    /// # Errors
    ///
    /// The last error produced by `f` once `max_retries` retries have been
    /// spent.
    pub async fn retry<F, Fut, T, E>(&self, name: &str, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut remaining = self.max_retries;
        let mut attempt = 1usize;

        loop {
            match f().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(op = name, attempt = attempt, "lookup succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if remaining == 0 {
                        warn!(op = name, attempts = attempt, error = %err, "retries exhausted");
                        return Err(err);
                    }
                    let delay = self.delay_for(attempt);
                    warn!(
                        op = name,
                        attempt = attempt,
                        remaining = remaining,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "lookup failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    remaining -= 1;
                    attempt += 1;
                }
            }
        }
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        match &self.strategy {
            RetryStrategy::Fixed(delay) => *delay,
            RetryStrategy::Exponential {
                initial_delay,
                max_delay,
                multiplier,
            } => {
                let millis =
                    initial_delay.as_millis() as f64 * multiplier.powi((attempt - 1) as i32);
                Duration::from_millis(millis as u64).min(*max_delay)
            }
        }
    }
}

impl Default for RetryPolicy {
    /// Five retries with a fixed ten-second delay.
    fn default() -> Self {
        Self::fixed(DEFAULT_MAX_RETRIES, DEFAULT_DELAY)
    }
}

/// Retry only while `should_retry` deems the error transient.
///
/// A permanent error short-circuits immediately, regardless of budget.
///
/// # Errors
///
/// The first non-retryable error, or the last error once the budget is spent.
pub async fn retry_if<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    name: &str,
    mut f: F,
    mut should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
    E: std::fmt::Display,
{
    let mut remaining = policy.max_retries;
    let mut attempt = 1usize;

    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !should_retry(&err) {
                    warn!(op = name, error = %err, "error is not retryable");
                    return Err(err);
                }
                if remaining == 0 {
                    return Err(err);
                }
                tokio::time::sleep(policy.delay_for(attempt)).await;
                remaining -= 1;
                attempt += 1;
            }
        }
    }
}

/// Add random jitter (up to a quarter of the duration) to a delay.
///
/// Spreads out retries when many keys fail at once.
pub fn with_jitter(duration: Duration) -> Duration {
    use rand::Rng;

    let quarter = duration.as_millis() / 4;
    if quarter == 0 {
        return duration;
    }
    let jitter = rand::thread_rng().gen_range(0..quarter);
    duration + Duration::from_millis(jitter as u64)
}
