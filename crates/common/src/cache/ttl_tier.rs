//! L2: larger TTL tier with stale retention
//!
//! Entries expire after their own TTL but are kept for a further
//! `stale_retention` so an outage can still be answered with the last known
//! value through [`TtlTier::get_stale`]. [`TtlTier::purge_expired`] drops
//! entries once they are past retention too.
//!
//! When full, inserting a new key first purges dead entries and then evicts
//! the entry closest to (or furthest past) its expiry.

use dashmap::DashMap;
use tributary_domain::{CacheEntry, CacheTier};

use super::config::TierConfig;
use super::pattern::KeyPattern;
use super::stats::{CacheStats, MetricsCollector};
use crate::resilience::ConfigResult;

/// TTL cache tier backed by a `DashMap`
pub struct TtlTier<V> {
    config: TierConfig,
    entries: DashMap<String, CacheEntry<V>>,
    metrics: MetricsCollector,
}

impl<V> std::fmt::Debug for TtlTier<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlTier")
            .field("config", &self.config)
            .field("len", &self.entries.len())
            .finish()
    }
}

impl<V: Clone> TtlTier<V> {
    /// Create a tier from a validated configuration
    pub fn new(config: TierConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            entries: DashMap::with_capacity(config.capacity),
            config,
            metrics: MetricsCollector::default(),
        })
    }

    fn retention_ms(&self) -> u64 {
        u64::try_from(self.config.stale_retention.as_millis()).unwrap_or(u64::MAX)
    }

    fn is_dead(&self, entry: &CacheEntry<V>, now_ms: u64) -> bool {
        now_ms >= entry.expires_at_ms().saturating_add(self.retention_ms())
    }

    /// Look up an entry that is still within its TTL
    pub fn get(&self, key: &str, now_ms: u64) -> Option<CacheEntry<V>> {
        let hit = self
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired_at(now_ms))
            .map(|entry| entry.value().clone().with_tier(CacheTier::L2));

        match hit {
            Some(_) => self.metrics.record_hit(),
            None => self.metrics.record_miss(),
        }
        hit
    }

    /// Look up an entry regardless of TTL, as long as it is within retention.
    ///
    /// A live entry is returned as well; callers compare `expires_at_ms`
    /// themselves when they need to know which one they got.
    pub fn get_stale(&self, key: &str, now_ms: u64) -> Option<CacheEntry<V>> {
        let entry = self
            .entries
            .get(key)
            .filter(|entry| !self.is_dead(entry, now_ms))
            .map(|entry| entry.value().clone().with_tier(CacheTier::L2))?;

        if entry.is_expired_at(now_ms) {
            self.metrics.record_stale_hit();
        }
        Some(entry)
    }

    /// Store an entry, clamping its TTL to this tier's maximum.
    ///
    /// Returns `false` when the entry is already past retention.
    pub fn insert(&self, mut entry: CacheEntry<V>, now_ms: u64) -> bool {
        entry.ttl = entry.ttl.min(self.config.max_ttl);
        entry.source_tier = CacheTier::L2;
        if self.is_dead(&entry, now_ms) {
            return false;
        }

        if !self.entries.contains_key(&entry.key) && self.entries.len() >= self.config.capacity {
            self.make_room(now_ms);
        }
        self.entries.insert(entry.key.clone(), entry);
        self.metrics.record_insert();
        true
    }

    fn make_room(&self, now_ms: u64) {
        if self.purge_expired(now_ms) > 0 && self.entries.len() < self.config.capacity {
            return;
        }

        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().expires_at_ms())
            .map(|entry| entry.key().clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
            self.metrics.record_evictions(1);
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove every entry whose key matches `pattern`
    pub fn remove_matching(&self, pattern: &KeyPattern) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !pattern.is_match(key));
        before.saturating_sub(self.entries.len())
    }

    /// Drop entries that are past TTL and stale retention
    pub fn purge_expired(&self, now_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !self.is_dead(entry, now_ms));
        let removed = before.saturating_sub(self.entries.len());
        self.metrics.record_expirations(removed as u64);
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot(self.entries.len(), self.config.capacity)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn tier(capacity: usize) -> TtlTier<&'static str> {
        let config = TierConfig::builder()
            .capacity(capacity)
            .max_ttl(Duration::from_secs(300))
            .stale_retention(Duration::from_secs(3_600))
            .build()
            .unwrap();
        TtlTier::new(config).unwrap()
    }

    fn entry(key: &str, value: &'static str, ttl_secs: u64) -> CacheEntry<&'static str> {
        CacheEntry::new(key, value, 0, Duration::from_secs(ttl_secs), CacheTier::L1)
    }

    /// Validates the difference between `get` and `get_stale`.
    ///
    /// Assertions:
    /// - Confirms `get` misses once the TTL elapsed.
    /// - Confirms `get_stale` still returns the value within retention.
    /// - Confirms both miss after retention.
    #[test]
    fn test_stale_reads_within_retention() {
        let tier = tier(10);
        tier.insert(entry("k", "v", 10), 0);

        assert_eq!(tier.get("k", 9_000).map(|e| e.value), Some("v"));
        assert!(tier.get("k", 10_000).is_none());

        let stale = tier.get_stale("k", 10_000).unwrap();
        assert_eq!(stale.value, "v");
        assert!(stale.is_expired_at(10_000));
        assert_eq!(stale.source_tier, CacheTier::L2);

        assert!(tier.get_stale("k", 10_000 + 3_600_000).is_none());
        assert_eq!(tier.stats().stale_hits, 1);
    }

    /// Validates purge only removes entries past retention.
    #[test]
    fn test_purge_keeps_stale_entries() {
        let tier = tier(10);
        tier.insert(entry("short", "a", 1), 0);
        tier.insert(entry("long", "b", 300), 0);

        assert_eq!(tier.purge_expired(2_000), 0);
        assert_eq!(tier.len(), 2);
        assert_eq!(tier.purge_expired(1_000 + 3_600_000), 1);
        assert!(tier.get("long", 5_000).is_some());
    }

    /// Validates capacity eviction picks the soonest-expiring entry.
    #[test]
    fn test_capacity_eviction() {
        let tier = tier(2);
        tier.insert(entry("a", "a", 100), 0);
        tier.insert(entry("b", "b", 10), 0);
        tier.insert(entry("c", "c", 200), 0);

        assert_eq!(tier.len(), 2);
        assert!(tier.get("b", 0).is_none());
        assert!(tier.get("a", 0).is_some());
        assert_eq!(tier.stats().evictions, 1);
    }

    /// Validates pattern removal.
    #[test]
    fn test_remove_matching() {
        let tier = tier(10);
        tier.insert(entry("velo|a", "1", 60), 0);
        tier.insert(entry("velo|b", "2", 60), 0);
        tier.insert(entry("llama|a", "3", 60), 0);

        assert_eq!(tier.remove_matching(&KeyPattern::new("velo|*").unwrap()), 2);
        assert!(tier.remove("llama|a"));
        assert!(tier.is_empty());
    }
}
