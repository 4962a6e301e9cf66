//! Cache entries as stored in every tier

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tier a cached value was found in (or stored from).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    L1,
    L2,
    L3,
}

impl CacheTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::L1 => "l1",
            CacheTier::L2 => "l2",
            CacheTier::L3 => "l3",
        }
    }
}

/// An immutable cached value.
///
/// `stored_at_ms` is milliseconds since the UNIX epoch, so an entry read back
/// from a shared store in another process keeps its original expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub stored_at_ms: u64,
    #[serde(rename = "ttl_ms", with = "crate::utils::duration_millis")]
    pub ttl: Duration,
    pub source_tier: CacheTier,
}

impl<V> CacheEntry<V> {
    pub fn new(
        key: impl Into<String>,
        value: V,
        stored_at_ms: u64,
        ttl: Duration,
        source_tier: CacheTier,
    ) -> Self {
        Self { key: key.into(), value, stored_at_ms, ttl, source_tier }
    }

    pub fn expires_at_ms(&self) -> u64 {
        let ttl_ms = u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX);
        self.stored_at_ms.saturating_add(ttl_ms)
    }

    /// An entry is expired once `now_ms` reaches `stored_at + ttl`.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms()
    }

    /// Time left before expiry, zero if already expired.
    pub fn remaining_at(&self, now_ms: u64) -> Duration {
        Duration::from_millis(self.expires_at_ms().saturating_sub(now_ms))
    }

    /// Copy of this entry relabelled as living in `tier`.
    pub fn with_tier(mut self, tier: CacheTier) -> Self {
        self.source_tier = tier;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_stored_at_plus_ttl() {
        let entry = CacheEntry::new("k", 1, 1_000, Duration::from_secs(2), CacheTier::L1);
        assert_eq!(entry.expires_at_ms(), 3_000);
        assert!(!entry.is_expired_at(2_999));
        assert!(entry.is_expired_at(3_000));
        assert_eq!(entry.remaining_at(2_500), Duration::from_millis(500));
        assert_eq!(entry.remaining_at(9_000), Duration::ZERO);
    }

    #[test]
    fn with_tier_keeps_expiry() {
        let entry = CacheEntry::new("k", "v", 10, Duration::from_millis(5), CacheTier::L3);
        let promoted = entry.clone().with_tier(CacheTier::L1);
        assert_eq!(promoted.source_tier, CacheTier::L1);
        assert_eq!(promoted.expires_at_ms(), entry.expires_at_ms());
    }
}
