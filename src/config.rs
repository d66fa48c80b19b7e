//! Lookup Tunables
//!
//! Declarative configuration for the cache and retry wrappers, deserialized
//! from TOML and validated before use. Every field has a documented default,
//! so an empty file (or no file at all) yields the stock behavior: one-day
//! TTL, five retries, fixed ten-second delay.
//!
//! ```toml
//! [cache]
//! ttl_secs = 3600
//!
//! [retry]
//! max_retries = 3
//! delay_ms = 250
//! backoff = "exponential"
//! max_delay_ms = 5000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::{RetryPolicy, RetryStrategy};

// ── Default value functions ──────────────────────────────────────────────

/// Default cache TTL: one day.
fn default_ttl_secs() -> u64 {
    86_400
}

/// Default retry budget: 5 retries after the initial attempt.
fn default_max_retries() -> usize {
    5
}

/// Default delay between attempts: 10 000 ms.
fn default_delay_ms() -> u64 {
    10_000
}

/// Default backoff cap for the exponential strategy: 60 000 ms.
fn default_max_delay_ms() -> u64 {
    60_000
}

/// Default exponential growth factor.
fn default_multiplier() -> f64 {
    2.0
}

// ── Config types ─────────────────────────────────────────────────────────

/// Root configuration for the lookup wrappers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LookupConfig {
    /// Cache tunables.
    #[serde(default)]
    pub cache: CacheSettings,
    /// Retry tunables.
    #[serde(default)]
    pub retry: RetrySettings,
}

/// Cache tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Seconds before a stored entry goes stale. Zero disables caching.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

impl CacheSettings {
    /// The configured TTL as a [`Duration`].
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Which backoff curve to use between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Constant delay per attempt (the baseline policy).
    #[default]
    Fixed,
    /// Delay grows per attempt, capped at `max_delay_ms`.
    Exponential,
}

/// Retry tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Retries granted after the initial attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// Backoff curve.
    #[serde(default)]
    pub backoff: BackoffKind,
    /// Cap on any single delay (exponential only), in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Growth factor per attempt (exponential only).
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delay_ms: default_delay_ms(),
            backoff: BackoffKind::default(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetrySettings {
    /// Build the runtime [`RetryPolicy`] these settings describe.
    pub fn policy(&self) -> RetryPolicy {
        let strategy = match self.backoff {
            BackoffKind::Fixed => RetryStrategy::Fixed(Duration::from_millis(self.delay_ms)),
            BackoffKind::Exponential => RetryStrategy::Exponential {
                initial_delay: Duration::from_millis(self.delay_ms),
                max_delay: Duration::from_millis(self.max_delay_ms),
                multiplier: self.multiplier,
            },
        };
        RetryPolicy {
            max_retries: self.max_retries,
            strategy,
        }
    }
}

// ── Errors and validation ────────────────────────────────────────────────

/// Errors arising from configuration parsing, validation, or I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// A specific field has an out-of-range or contradictory value.
    #[error("field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "retry.delay_ms").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("io error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl LookupConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns every violation found, not just the first.
    pub fn from_toml_str(raw: &str) -> Result<Self, Vec<ConfigError>> {
        let config: Self = toml::from_str(raw).map_err(|e| vec![ConfigError::from(e)])?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a TOML file.
    ///
    /// # Errors
    ///
    /// I/O failures, parse failures, or every validation violation found.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Vec<ConfigError>> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            vec![ConfigError::Io {
                file: path.display().to_string(),
                source: e,
            }]
        })?;
        Self::from_toml_str(&raw)
    }

    /// Validate all semantic constraints, collecting every violation before
    /// returning so the caller sees the full scope of issues at once.
    ///
    /// # Errors
    ///
    /// One [`ConfigError::InvalidField`] per violated constraint.
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();

        if self.retry.backoff == BackoffKind::Exponential {
            if self.retry.max_delay_ms < self.retry.delay_ms {
                errors.push(ConfigError::InvalidField {
                    field: "retry.max_delay_ms".into(),
                    value: self.retry.max_delay_ms.to_string(),
                    reason: "must be \u{2265} retry.delay_ms".into(),
                });
            }
            if self.retry.multiplier < 1.0 {
                errors.push(ConfigError::InvalidField {
                    field: "retry.multiplier".into(),
                    value: self.retry.multiplier.to_string(),
                    reason: "must be \u{2265} 1.0".into(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_yields_stock_defaults() {
        let config = LookupConfig::from_toml_str("").unwrap();
        assert_eq!(config.cache.ttl_secs, 86_400);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.delay_ms, 10_000);
        assert_eq!(config.retry.backoff, BackoffKind::Fixed);
    }

    #[test]
    fn test_full_toml_round_trip() {
        let raw = r#"
            [cache]
            ttl_secs = 3600

            [retry]
            max_retries = 3
            delay_ms = 250
            backoff = "exponential"
            max_delay_ms = 5000
        "#;
        let config = LookupConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.cache.ttl(), Duration::from_secs(3600));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.backoff, BackoffKind::Exponential);
    }

    #[test]
    fn test_validation_collects_all_violations() {
        let raw = r#"
            [retry]
            delay_ms = 1000
            backoff = "exponential"
            max_delay_ms = 10
            multiplier = 0.5
        "#;
        let errors = LookupConfig::from_toml_str(raw).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_fixed_backoff_skips_exponential_constraints() {
        let raw = r#"
            [retry]
            delay_ms = 1000
            max_delay_ms = 10
            multiplier = 0.5
        "#;
        assert!(LookupConfig::from_toml_str(raw).is_ok());
    }

    #[test]
    fn test_policy_conversion_fixed() {
        let settings = RetrySettings::default();
        let policy = settings.policy();
        assert_eq!(policy.max_retries, 5);
        assert!(matches!(
            policy.strategy,
            RetryStrategy::Fixed(d) if d == Duration::from_secs(10)
        ));
    }

    #[test]
    fn test_policy_conversion_exponential() {
        let settings = RetrySettings {
            backoff: BackoffKind::Exponential,
            delay_ms: 100,
            max_delay_ms: 800,
            ..RetrySettings::default()
        };
        let policy = settings.policy();
        assert!(matches!(
            policy.strategy,
            RetryStrategy::Exponential { initial_delay, max_delay, .. }
                if initial_delay == Duration::from_millis(100)
                    && max_delay == Duration::from_millis(800)
        ));
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let errors = LookupConfig::from_toml_str("cache = 3").unwrap_err();
        assert!(matches!(errors[0], ConfigError::Parse(_)));
    }
}
