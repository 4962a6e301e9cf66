//! Per-source breaker and rate limiter registries
//!
//! Each source gets its own breaker and limiter, created lazily on first use
//! and stored in a `DashMap` so sources never contend on a shared lock.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, warn};
use tributary_common::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState, Clock,
    ConfigResult, FixedWindowLimiter, SystemClock, TransitionObserver,
};

/// Circuit breakers keyed by source id
pub struct BreakerRegistry<C: Clock = SystemClock> {
    breakers: DashMap<String, CircuitBreaker<C>>,
    prototype: CircuitBreaker<C>,
}

impl<C: Clock> std::fmt::Debug for BreakerRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("breakers", &self.breakers.len())
            .field("config", self.prototype.config())
            .finish()
    }
}

impl<C: Clock> BreakerRegistry<C> {
    pub fn new(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        let prototype = CircuitBreaker::with_clock("prototype", config, clock)?;
        Ok(Self { breakers: DashMap::new(), prototype })
    }

    /// Attach an observer that every breaker created afterwards reports to
    pub fn with_observer(mut self, observer: Arc<dyn TransitionObserver>) -> Self {
        self.prototype = self.prototype.with_observer(observer);
        self
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        self.prototype.config()
    }

    /// Breaker for `source_id`, created on first use.
    ///
    /// Breakers share their state across clones, so the returned handle can
    /// be held across awaits without keeping a map shard locked.
    pub fn get_or_create(&self, source_id: &str) -> CircuitBreaker<C> {
        if let Some(existing) = self.breakers.get(source_id) {
            return existing.clone();
        }

        self.breakers
            .entry(source_id.to_string())
            .or_insert_with(|| self.prototype.sibling(source_id))
            .clone()
    }

    /// Current state, `None` for a source that has never been called
    pub fn state(&self, source_id: &str) -> Option<CircuitState> {
        self.breakers.get(source_id).map(|b| b.state())
    }

    pub fn metrics(&self, source_id: &str) -> Option<CircuitBreakerMetrics> {
        self.breakers.get(source_id).map(|b| b.metrics())
    }

    /// Metrics for every known source, ordered by id
    pub fn all_metrics(&self) -> BTreeMap<String, CircuitBreakerMetrics> {
        self.breakers.iter().map(|entry| (entry.key().clone(), entry.value().metrics())).collect()
    }

    /// Force every breaker back to Closed
    pub fn reset_all(&self) {
        for entry in &self.breakers {
            entry.value().reset();
        }
    }
}

/// Fixed-window limiters keyed by source id.
///
/// Fail-closed: a source that was never registered is always rejected.
pub struct SourceRateLimiter<C: Clock + Clone = SystemClock> {
    limiters: DashMap<String, FixedWindowLimiter<C>>,
    clock: C,
    rejections: AtomicU64,
}

impl<C: Clock + Clone> std::fmt::Debug for SourceRateLimiter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRateLimiter")
            .field("sources", &self.limiters.len())
            .field("rejections", &self.rejections())
            .finish_non_exhaustive()
    }
}

impl<C: Clock + Clone> SourceRateLimiter<C> {
    pub fn new(clock: C) -> Self {
        Self { limiters: DashMap::new(), clock, rejections: AtomicU64::new(0) }
    }

    /// Register `source_id` with a per-minute budget; `0` means unlimited.
    ///
    /// Re-registering keeps the current window count, even when the limit
    /// changes.
    pub fn register(&self, source_id: &str, limit_per_minute: u32) {
        let limit = u64::from(limit_per_minute);
        if self.limiters.get(source_id).is_some_and(|existing| existing.limit() == limit) {
            return;
        }

        match self.limiters.entry(source_id.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().limit() != limit {
                    debug!(source_id, from = entry.get().limit(), to = limit, "rate limit changed");
                    let updated = entry.get().with_limit(limit_per_minute);
                    entry.insert(updated);
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(FixedWindowLimiter::per_minute(limit_per_minute, self.clock.clone()));
            }
        }
    }

    pub fn is_registered(&self, source_id: &str) -> bool {
        self.limiters.contains_key(source_id)
    }

    /// Claim one call for `source_id` in the current window
    pub fn try_acquire(&self, source_id: &str) -> bool {
        let admitted = self.limiters.get(source_id).is_some_and(|limiter| limiter.try_acquire());
        if !admitted {
            self.rejections.fetch_add(1, Ordering::Relaxed);
            if !self.is_registered(source_id) {
                warn!(source_id, "rate limit check for unregistered source");
            }
        }
        admitted
    }

    /// Calls left in the current window; `None` when unlimited or unknown
    pub fn remaining(&self, source_id: &str) -> Option<u64> {
        self.limiters.get(source_id).and_then(|limiter| limiter.remaining())
    }

    /// Total rejections across all sources
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }
}
