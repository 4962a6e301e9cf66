//! Per-tier statistics for the tiered cache

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tributary_common::cache::CacheStats;
use tributary_domain::CacheTier;

/// Point-in-time view of the whole cache hierarchy.
///
/// `l1` and `l2` are the tiers' own counters; the remaining fields count
/// lookups through the tiered `get`, where each lookup ends in exactly one
/// of `l1_hits`, `l2_hits`, `l3_hits` or `misses`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TieredCacheStats {
    pub l1: CacheStats,
    pub l2: CacheStats,
    pub l3_enabled: bool,
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub l3_hits: u64,
    pub misses: u64,
    /// Entries copied into faster tiers after an L2 or L3 hit
    pub promotions: u64,
    /// Expired L2 entries handed out as stale fallback
    pub stale_served: u64,
    /// Swallowed shared-store failures and timeouts
    pub l3_errors: u64,
}

impl TieredCacheStats {
    pub fn total_lookups(&self) -> u64 {
        self.l1_hits + self.l2_hits + self.l3_hits + self.misses
    }

    pub fn hits(&self) -> u64 {
        self.l1_hits + self.l2_hits + self.l3_hits
    }

    /// Overall hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        ratio(self.hits(), self.total_lookups())
    }

    /// Share of lookups answered by `tier`
    pub fn tier_hit_rate(&self, tier: CacheTier) -> f64 {
        let hits = match tier {
            CacheTier::L1 => self.l1_hits,
            CacheTier::L2 => self.l2_hits,
            CacheTier::L3 => self.l3_hits,
        };
        ratio(hits, self.total_lookups())
    }

    pub fn miss_rate(&self) -> f64 {
        ratio(self.misses, self.total_lookups())
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

#[derive(Debug, Default)]
pub(crate) struct TierCounters {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    l3_hits: AtomicU64,
    misses: AtomicU64,
    promotions: AtomicU64,
    stale_served: AtomicU64,
    l3_errors: AtomicU64,
}

impl TierCounters {
    pub(crate) fn record_hit(&self, tier: CacheTier) {
        let counter = match tier {
            CacheTier::L1 => &self.l1_hits,
            CacheTier::L2 => &self.l2_hits,
            CacheTier::L3 => &self.l3_hits,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stale_served(&self) {
        self.stale_served.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_l3_error(&self) {
        self.l3_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, l1: CacheStats, l2: CacheStats, l3_enabled: bool) -> TieredCacheStats {
        TieredCacheStats {
            l1,
            l2,
            l3_enabled,
            l1_hits: self.l1_hits.load(Ordering::Relaxed),
            l2_hits: self.l2_hits.load(Ordering::Relaxed),
            l3_hits: self.l3_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
            l3_errors: self.l3_errors.load(Ordering::Relaxed),
        }
    }
}
