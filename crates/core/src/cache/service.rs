//! Tiered cache service
//!
//! Lookups walk L1 (sharded LRU), then L2 (TTL map with stale retention),
//! then the optional shared L3 store. A hit in a slower tier is copied into
//! every faster tier with its original `stored_at` and TTL, so promotion
//! never extends an entry's life. Writes go to every tier.
//!
//! L3 is best effort: every call is bounded by `l3_timeout`, and failures
//! are logged and counted but never surface to the caller.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use tributary_common::cache::{KeyPattern, LruTier, TierConfig, TtlTier};
use tributary_common::resilience::{Clock, ConfigResult, SystemClock};
use tributary_domain::{CacheEntry, CacheError, CacheSettings, CacheTier};

use super::ports::SharedStore;
use super::stats::{TierCounters, TieredCacheStats};

/// A value found in one of the tiers
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit<V> {
    pub value: V,
    pub tier: CacheTier,
    pub stored_at_ms: u64,
    pub expires_at_ms: u64,
}

impl<V> CacheHit<V> {
    fn from_entry(entry: CacheEntry<V>, tier: CacheTier) -> Self {
        let expires_at_ms = entry.expires_at_ms();
        Self { value: entry.value, tier, stored_at_ms: entry.stored_at_ms, expires_at_ms }
    }

    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

struct SharedTier {
    store: Arc<dyn SharedStore>,
    namespace: String,
    max_ttl: Duration,
    timeout: Duration,
}

/// Three-tier cache of `V` values
pub struct TieredCache<V, C: Clock = SystemClock> {
    l1: LruTier<V>,
    l2: TtlTier<V>,
    l3: Option<SharedTier>,
    settings: CacheSettings,
    clock: C,
    counters: TierCounters,
}

impl<V, C: Clock> std::fmt::Debug for TieredCache<V, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("settings", &self.settings)
            .field("l3_enabled", &self.l3.is_some())
            .finish_non_exhaustive()
    }
}

impl<V> TieredCache<V, SystemClock>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(settings: CacheSettings) -> ConfigResult<Self> {
        Self::with_clock(settings, SystemClock)
    }
}

impl<V, C> TieredCache<V, C>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    C: Clock,
{
    /// Build L1 and L2 from `settings`; L3 stays off until a store is attached
    pub fn with_clock(settings: CacheSettings, clock: C) -> ConfigResult<Self> {
        let l1 = LruTier::new(
            TierConfig::builder()
                .capacity(settings.l1_capacity)
                .max_ttl(settings.l1_ttl())
                .build()?,
        )?;
        let l2 = TtlTier::new(
            TierConfig::builder()
                .capacity(settings.l2_capacity)
                .max_ttl(settings.l2_ttl())
                .shards(1)
                .stale_retention(settings.stale_retention())
                .build()?,
        )?;

        Ok(Self { l1, l2, l3: None, settings, clock, counters: TierCounters::default() })
    }

    /// Attach a shared L3 store
    pub fn with_shared_store(mut self, store: Arc<dyn SharedStore>) -> Self {
        self.l3 = Some(SharedTier {
            store,
            namespace: self.settings.l3_namespace.clone(),
            max_ttl: self.settings.l3_ttl(),
            timeout: self.settings.l3_timeout(),
        });
        self
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn has_shared_store(&self) -> bool {
        self.l3.is_some()
    }

    fn now_ms(&self) -> u64 {
        self.clock.millis_since_epoch()
    }

    /// Look `key` up in L1, L2, then L3. A miss everywhere is `None`.
    pub async fn get(&self, key: &str) -> Option<CacheHit<V>> {
        let now = self.now_ms();

        if let Some(entry) = self.l1.get(key, now) {
            self.counters.record_hit(CacheTier::L1);
            return Some(CacheHit::from_entry(entry, CacheTier::L1));
        }

        if let Some(entry) = self.l2.get(key, now) {
            self.counters.record_hit(CacheTier::L2);
            if self.l1.insert(entry.clone(), now) {
                self.counters.record_promotion();
            }
            debug!(key, tier = "l2", "cache hit promoted");
            return Some(CacheHit::from_entry(entry, CacheTier::L2));
        }

        if let Some(entry) = self.l3_get(key, now).await {
            self.counters.record_hit(CacheTier::L3);
            let promoted_l2 = self.l2.insert(entry.clone(), now);
            let promoted_l1 = self.l1.insert(entry.clone(), now);
            if promoted_l1 || promoted_l2 {
                self.counters.record_promotion();
            }
            debug!(key, tier = "l3", "cache hit promoted");
            return Some(CacheHit::from_entry(entry, CacheTier::L3));
        }

        self.counters.record_miss();
        None
    }

    /// Expired L2 copy still inside stale retention.
    ///
    /// Only consulted after a failed or skipped fetch; a live entry is
    /// returned too, so callers can use this as "anything at all".
    pub fn get_stale(&self, key: &str) -> Option<CacheHit<V>> {
        let now = self.now_ms();
        let entry = self.l2.get_stale(key, now)?;
        if entry.is_expired_at(now) {
            self.counters.record_stale_served();
        }
        Some(CacheHit::from_entry(entry, CacheTier::L2))
    }

    /// Write `value` to every tier; each tier clamps `ttl` to its maximum
    pub async fn set(&self, key: &str, value: V, ttl: Duration) {
        let now = self.now_ms();
        let entry = CacheEntry::new(key, value, now, ttl, CacheTier::L1);

        self.l1.insert(entry.clone(), now);
        self.l2.insert(entry.clone(), now);
        self.l3_set(entry).await;
    }

    /// Remove `key` from every tier; `true` when any tier held it
    pub async fn delete(&self, key: &str) -> bool {
        let in_l1 = self.l1.remove(key);
        let in_l2 = self.l2.remove(key);

        let in_l3 = match &self.l3 {
            Some(shared) => {
                let namespaced = format!("{}{key}", shared.namespace);
                self.l3_call(shared, "delete", shared.store.delete(&namespaced)).await.unwrap_or(false)
            }
            None => false,
        };

        in_l1 || in_l2 || in_l3
    }

    /// Remove every key matching `pattern` from every tier.
    ///
    /// Returns the number of entries removed, summed over the tiers.
    pub async fn invalidate(&self, pattern: &KeyPattern) -> usize {
        let mut removed = self.l1.remove_matching(pattern) + self.l2.remove_matching(pattern);

        if let Some(shared) = &self.l3 {
            match KeyPattern::new(&format!("{}{}", shared.namespace, pattern.as_str())) {
                Ok(namespaced) => {
                    removed += self
                        .l3_call(shared, "invalidate", shared.store.invalidate_matching(&namespaced))
                        .await
                        .unwrap_or(0);
                }
                Err(e) => warn!(pattern = pattern.as_str(), error = %e, "invalid L3 pattern"),
            }
        }

        debug!(pattern = pattern.as_str(), removed, "cache invalidated");
        removed
    }

    /// Drop L1 entries past TTL and L2 entries past stale retention
    pub fn purge_expired(&self) -> usize {
        let now = self.now_ms();
        let removed = self.l1.purge_expired(now) + self.l2.purge_expired(now);
        if removed > 0 {
            debug!(removed, "purged expired cache entries");
        }
        removed
    }

    /// Empty the local tiers. The shared store is left alone.
    pub fn clear(&self) {
        self.l1.clear();
        self.l2.clear();
    }

    pub fn stats(&self) -> TieredCacheStats {
        self.counters.snapshot(self.l1.stats(), self.l2.stats(), self.l3.is_some())
    }

    async fn l3_get(&self, key: &str, now: u64) -> Option<CacheEntry<V>> {
        let shared = self.l3.as_ref()?;
        let namespaced = format!("{}{key}", shared.namespace);
        let bytes = self.l3_call(shared, "get", shared.store.get(&namespaced)).await??;

        match serde_json::from_slice::<CacheEntry<V>>(&bytes) {
            Ok(entry) if entry.key == key && !entry.is_expired_at(now) => Some(entry),
            Ok(_) => None,
            Err(e) => {
                self.counters.record_l3_error();
                warn!(key, error = %CacheError::Codec(e.to_string()), "undecodable L3 entry");
                None
            }
        }
    }

    async fn l3_set(&self, mut entry: CacheEntry<V>) {
        let Some(shared) = &self.l3 else { return };
        entry.ttl = entry.ttl.min(shared.max_ttl);
        entry.source_tier = CacheTier::L3;

        let bytes = match serde_json::to_vec(&entry) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.counters.record_l3_error();
                warn!(key = %entry.key, error = %CacheError::Codec(e.to_string()), "cannot encode L3 entry");
                return;
            }
        };

        let namespaced = format!("{}{}", shared.namespace, entry.key);
        self.l3_call(shared, "set", shared.store.set(&namespaced, bytes, entry.ttl)).await;
    }

    /// Run one shared-store call under the L3 timeout, swallowing failures
    async fn l3_call<T>(
        &self,
        shared: &SharedTier,
        operation: &'static str,
        call: impl Future<Output = Result<T, CacheError>>,
    ) -> Option<T> {
        match tokio::time::timeout(shared.timeout, call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                self.counters.record_l3_error();
                warn!(operation, error = %e, "shared cache call failed");
                None
            }
            Err(_) => {
                self.counters.record_l3_error();
                warn!(operation, timeout_ms = shared.timeout.as_millis() as u64, "shared cache call timed out");
                None
            }
        }
    }
}
