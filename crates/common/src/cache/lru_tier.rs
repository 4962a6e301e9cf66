//! L1: sharded, bounded LRU tier
//!
//! Keys are spread over independently locked `lru::LruCache` shards, so
//! lookups for different keys rarely contend. Capacity is split evenly across
//! shards; eviction is least-recently-used within a shard.

use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use tributary_domain::{CacheEntry, CacheTier};

use super::config::TierConfig;
use super::pattern::KeyPattern;
use super::stats::{CacheStats, MetricsCollector};
use crate::resilience::ConfigResult;

type Shard<V> = Mutex<LruCache<String, CacheEntry<V>>>;

/// Bounded LRU cache tier
pub struct LruTier<V> {
    config: TierConfig,
    shards: Box<[Shard<V>]>,
    hasher: RandomState,
    metrics: MetricsCollector,
}

impl<V: Clone> std::fmt::Debug for LruTier<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruTier").field("config", &self.config).field("len", &self.len()).finish()
    }
}

impl<V: Clone> LruTier<V> {
    /// Create a tier from a validated configuration
    pub fn new(config: TierConfig) -> ConfigResult<Self> {
        config.validate()?;
        let shard_count = config.shards.min(config.capacity);
        let per_shard = config.capacity.div_ceil(shard_count);
        let per_shard = NonZeroUsize::new(per_shard).unwrap_or(NonZeroUsize::MIN);

        let shards = (0..shard_count).map(|_| Mutex::new(LruCache::new(per_shard))).collect();
        Ok(Self { config, shards, hasher: RandomState::new(), metrics: MetricsCollector::default() })
    }

    fn shard(&self, key: &str) -> &Shard<V> {
        let idx = (self.hasher.hash_one(key) as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// Look up a live entry; an expired entry is dropped and reported as a miss.
    pub fn get(&self, key: &str, now_ms: u64) -> Option<CacheEntry<V>> {
        let mut shard = self.shard(key).lock();
        match shard.get(key) {
            Some(entry) if !entry.is_expired_at(now_ms) => {
                let entry = entry.clone();
                drop(shard);
                self.metrics.record_hit();
                Some(entry.with_tier(CacheTier::L1))
            }
            Some(_) => {
                shard.pop(key);
                drop(shard);
                self.metrics.record_expirations(1);
                self.metrics.record_miss();
                None
            }
            None => {
                drop(shard);
                self.metrics.record_miss();
                None
            }
        }
    }

    /// Store an entry, clamping its TTL to this tier's maximum.
    ///
    /// Returns `false` when the entry is already expired and was not stored.
    pub fn insert(&self, mut entry: CacheEntry<V>, now_ms: u64) -> bool {
        entry.ttl = entry.ttl.min(self.config.max_ttl);
        entry.source_tier = CacheTier::L1;
        if entry.is_expired_at(now_ms) {
            return false;
        }

        let key = entry.key.clone();
        let evicted = self.shard(&key).lock().push(key.clone(), entry);
        self.metrics.record_insert();
        if matches!(evicted, Some((old_key, _)) if old_key != key) {
            self.metrics.record_evictions(1);
        }
        true
    }

    pub fn remove(&self, key: &str) -> bool {
        self.shard(key).lock().pop(key).is_some()
    }

    /// Remove every entry whose key matches `pattern`
    pub fn remove_matching(&self, pattern: &KeyPattern) -> usize {
        self.retain(|key, _| !pattern.is_match(key))
    }

    /// Drop entries past their TTL
    pub fn purge_expired(&self, now_ms: u64) -> usize {
        let removed = self.retain(|_, entry| !entry.is_expired_at(now_ms));
        self.metrics.record_expirations(removed as u64);
        removed
    }

    fn retain(&self, keep: impl Fn(&str, &CacheEntry<V>) -> bool) -> usize {
        let mut removed = 0;
        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            let doomed: Vec<String> = shard
                .iter()
                .filter(|(key, entry)| !keep(key.as_str(), entry))
                .map(|(key, _)| key.clone())
                .collect();
            for key in doomed {
                shard.pop(&key);
                removed += 1;
            }
        }
        removed
    }

    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.lock().clear();
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot(self.len(), self.config.capacity)
    }
}
