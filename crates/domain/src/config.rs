//! Configuration management
//!
//! Every section has serde defaults, so a config file only needs to name the
//! upstream sources. Durations are stored as integer seconds or milliseconds,
//! as the field suffix says, and exposed as [`Duration`] through accessors.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::errors::{Result, TributaryError};
use crate::types::UpstreamSource;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheSettings,
    pub breaker: BreakerSettings,
    pub retry: RetrySettings,
    pub aggregator: AggregatorSettings,
    pub shared_store: SharedStoreSettings,
    pub logging: LoggingConfig,
    pub sources: Vec<UpstreamSource>,
}

impl Config {
    /// Check the configuration for values that cannot work.
    ///
    /// # Errors
    /// Returns `TributaryError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.breaker.validate()?;
        self.retry.validate()?;

        let mut seen = HashSet::new();
        for source in &self.sources {
            source.validate()?;
            if !seen.insert(source.id()) {
                return Err(TributaryError::Config(format!(
                    "duplicate source id '{}'",
                    source.id()
                )));
            }
        }
        Ok(())
    }

    pub fn source(&self, id: &str) -> Option<&UpstreamSource> {
        self.sources.iter().find(|s| s.id() == id)
    }
}

/// Tiered cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub l1_capacity: usize,
    pub l1_ttl_seconds: u64,
    pub l2_capacity: usize,
    pub l2_ttl_seconds: u64,
    pub l3_ttl_seconds: u64,
    pub l3_timeout_ms: u64,
    /// How long L2 keeps an expired entry around for stale fallback.
    pub stale_retention_seconds: u64,
    pub l3_namespace: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            l1_capacity: DEFAULT_L1_CAPACITY,
            l1_ttl_seconds: DEFAULT_L1_TTL_SECS,
            l2_capacity: DEFAULT_L2_CAPACITY,
            l2_ttl_seconds: DEFAULT_L2_TTL_SECS,
            l3_ttl_seconds: DEFAULT_L3_TTL_SECS,
            l3_timeout_ms: DEFAULT_L3_TIMEOUT_MS,
            stale_retention_seconds: DEFAULT_STALE_RETENTION_SECS,
            l3_namespace: DEFAULT_L3_NAMESPACE.to_string(),
        }
    }
}

impl CacheSettings {
    pub fn l1_ttl(&self) -> Duration {
        Duration::from_secs(self.l1_ttl_seconds)
    }

    pub fn l2_ttl(&self) -> Duration {
        Duration::from_secs(self.l2_ttl_seconds)
    }

    pub fn l3_ttl(&self) -> Duration {
        Duration::from_secs(self.l3_ttl_seconds)
    }

    pub fn l3_timeout(&self) -> Duration {
        Duration::from_millis(self.l3_timeout_ms)
    }

    pub fn stale_retention(&self) -> Duration {
        Duration::from_secs(self.stale_retention_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.l1_capacity == 0 || self.l2_capacity == 0 {
            return Err(TributaryError::Config("cache capacities must be greater than zero".into()));
        }
        if self.l1_ttl_seconds == 0 || self.l2_ttl_seconds == 0 || self.l3_ttl_seconds == 0 {
            return Err(TributaryError::Config("cache TTLs must be greater than zero".into()));
        }
        Ok(())
    }
}

/// Circuit breaker configuration, applied to every source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u64,
    pub failure_window_seconds: u64,
    pub recovery_timeout_seconds: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            failure_window_seconds: DEFAULT_FAILURE_WINDOW_SECS,
            recovery_timeout_seconds: DEFAULT_RECOVERY_TIMEOUT_SECS,
        }
    }
}

impl BreakerSettings {
    pub fn failure_window(&self) -> Duration {
        Duration::from_secs(self.failure_window_seconds)
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(TributaryError::Config(
                "breaker failure_threshold must be greater than zero".into(),
            ));
        }
        if self.failure_window_seconds == 0 {
            return Err(TributaryError::Config(
                "breaker failure_window_seconds must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Retry/backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total HTTP attempts per fetch, the first one included.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_seconds: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_seconds: DEFAULT_MAX_DELAY_SECS,
        }
    }
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(TributaryError::Config("retry max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// Aggregator behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorSettings {
    /// Serve an expired L2 copy immediately and refresh in the background.
    pub stale_while_revalidate: bool,
    /// Interval of the background expired-entry purge.
    pub purge_interval_seconds: u64,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self { stale_while_revalidate: false, purge_interval_seconds: DEFAULT_PURGE_INTERVAL_SECS }
    }
}

impl AggregatorSettings {
    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_seconds)
    }
}

/// Shared (L3) store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedStoreSettings {
    pub enabled: bool,
    /// Entry bound for the in-memory shared store.
    pub max_capacity: u64,
}

impl Default for SharedStoreSettings {
    fn default() -> Self {
        Self { enabled: false, max_capacity: 10_000 }
    }
}

/// Log output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}
