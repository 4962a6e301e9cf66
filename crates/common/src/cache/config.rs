//! Cache tier configuration types and builder

use std::time::Duration;

use tributary_domain::constants::{
    DEFAULT_L1_CAPACITY, DEFAULT_L1_TTL_SECS, DEFAULT_L2_CAPACITY, DEFAULT_L2_TTL_SECS,
    DEFAULT_STALE_RETENTION_SECS,
};

use crate::resilience::{ConfigError, ConfigResult};

/// Configuration for one in-process cache tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierConfig {
    /// Maximum number of entries across all shards
    pub capacity: usize,

    /// Upper bound on any entry's TTL in this tier
    pub max_ttl: Duration,

    /// Number of independently locked shards (LRU tier only)
    pub shards: usize,

    /// How long an expired entry stays readable as stale (TTL tier only)
    pub stale_retention: Duration,
}

impl TierConfig {
    /// Create a new configuration builder
    pub fn builder() -> TierConfigBuilder {
        TierConfigBuilder::default()
    }

    /// Defaults for the L1 (LRU) tier
    pub fn l1() -> Self {
        Self {
            capacity: DEFAULT_L1_CAPACITY,
            max_ttl: Duration::from_secs(DEFAULT_L1_TTL_SECS),
            shards: 16,
            stale_retention: Duration::ZERO,
        }
    }

    /// Defaults for the L2 (TTL) tier
    pub fn l2() -> Self {
        Self {
            capacity: DEFAULT_L2_CAPACITY,
            max_ttl: Duration::from_secs(DEFAULT_L2_TTL_SECS),
            shards: 1,
            stale_retention: Duration::from_secs(DEFAULT_STALE_RETENTION_SECS),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.capacity == 0 {
            return Err(ConfigError::invalid("capacity must be greater than 0"));
        }
        if self.shards == 0 {
            return Err(ConfigError::invalid("shards must be greater than 0"));
        }
        if self.max_ttl.is_zero() {
            return Err(ConfigError::invalid("max_ttl must be greater than zero"));
        }
        Ok(())
    }
}

/// Builder for TierConfig, starting from the L1 defaults
#[derive(Debug)]
pub struct TierConfigBuilder {
    config: TierConfig,
}

impl Default for TierConfigBuilder {
    fn default() -> Self {
        Self { config: TierConfig::l1() }
    }
}

impl TierConfigBuilder {
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    pub fn max_ttl(mut self, ttl: Duration) -> Self {
        self.config.max_ttl = ttl;
        self
    }

    pub fn shards(mut self, shards: usize) -> Self {
        self.config.shards = shards;
        self
    }

    pub fn stale_retention(mut self, retention: Duration) -> Self {
        self.config.stale_retention = retention;
        self
    }

    pub fn build(self) -> ConfigResult<TierConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates the tier presets.
    ///
    /// Assertions:
    /// - Confirms L1 is the small, short-lived tier.
    /// - Confirms only L2 retains stale entries.
    #[test]
    fn test_tier_presets() {
        let l1 = TierConfig::l1();
        let l2 = TierConfig::l2();
        assert_eq!(l1.capacity, 1_000);
        assert_eq!(l2.capacity, 2_000);
        assert!(l1.max_ttl < l2.max_ttl);
        assert_eq!(l1.stale_retention, Duration::ZERO);
        assert_eq!(l2.stale_retention, Duration::from_secs(3_600));
    }

    /// Validates builder validation.
    #[test]
    fn test_builder_rejects_zero_values() {
        assert!(TierConfig::builder().capacity(0).build().is_err());
        assert!(TierConfig::builder().shards(0).build().is_err());
        assert!(TierConfig::builder().max_ttl(Duration::ZERO).build().is_err());
        let config = TierConfig::builder().capacity(10).shards(2).build().unwrap();
        assert_eq!(config.capacity, 10);
    }
}
