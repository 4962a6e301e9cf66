//! Aggregator metrics
//!
//! Counters are lock-free atomics; per-source maps are `DashMap`s so sources
//! never contend. [`AggregatorMetrics::snapshot`] merges everything, plus the
//! cache and breaker views, into one serializable [`MetricsSnapshot`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;
use tributary_common::resilience::{
    CircuitBreakerMetrics, CircuitState, Histogram, LatencySummary, TransitionObserver,
};
use tributary_domain::FetchError;

use crate::cache::TieredCacheStats;

/// Transition counts across every breaker, keyed by the state entered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BreakerTransitions {
    pub opened: u64,
    pub half_opened: u64,
    pub closed: u64,
}

/// Serializable view of everything the aggregator has counted
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub cache: TieredCacheStats,
    pub breakers: BTreeMap<String, CircuitBreakerMetrics>,
    pub breaker_transitions: BreakerTransitions,
    pub rate_limit_rejections: BTreeMap<String, u64>,
    /// Fetch errors per source, keyed by [`FetchError::label`]
    pub errors: BTreeMap<String, BTreeMap<String, u64>>,
    pub latency: BTreeMap<String, LatencySummary>,
    pub stale_served: BTreeMap<String, u64>,
}

#[derive(Debug, Default)]
struct TransitionCounters {
    opened: AtomicU64,
    half_opened: AtomicU64,
    closed: AtomicU64,
}

/// Metrics shared by the fetcher and the aggregator
#[derive(Debug, Default)]
pub struct AggregatorMetrics {
    requests: AtomicU64,
    latency: DashMap<String, Histogram>,
    rate_limited: DashMap<String, u64>,
    errors: DashMap<(String, &'static str), u64>,
    stale_served: DashMap<String, u64>,
    transitions: TransitionCounters,
}

impl AggregatorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one aggregate request
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the wall time of a successful fetch, backoff included
    pub fn record_latency(&self, source_id: &str, elapsed: Duration) {
        if let Some(histogram) = self.latency.get(source_id) {
            histogram.record(elapsed);
            return;
        }
        self.latency.entry(source_id.to_string()).or_default().record(elapsed);
    }

    pub fn record_error(&self, error: &FetchError) {
        if let FetchError::RateLimited { source_id, .. } = error {
            *self.rate_limited.entry(source_id.clone()).or_insert(0) += 1;
        }
        *self.errors.entry((error.source_id().to_string(), error.label())).or_insert(0) += 1;
    }

    pub fn record_stale_served(&self, source_id: &str) {
        *self.stale_served.entry(source_id.to_string()).or_insert(0) += 1;
    }

    pub fn rate_limit_rejections(&self, source_id: &str) -> u64 {
        self.rate_limited.get(source_id).map_or(0, |count| *count)
    }

    pub fn error_count(&self, source_id: &str, label: &str) -> u64 {
        self.errors
            .iter()
            .filter(|entry| entry.key().0 == source_id && entry.key().1 == label)
            .map(|entry| *entry.value())
            .sum()
    }

    pub fn breaker_transitions(&self) -> BreakerTransitions {
        BreakerTransitions {
            opened: self.transitions.opened.load(Ordering::Relaxed),
            half_opened: self.transitions.half_opened.load(Ordering::Relaxed),
            closed: self.transitions.closed.load(Ordering::Relaxed),
        }
    }

    /// Merge own counters with the cache and breaker views
    pub fn snapshot(
        &self,
        cache: TieredCacheStats,
        breakers: BTreeMap<String, CircuitBreakerMetrics>,
    ) -> MetricsSnapshot {
        let mut errors: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::new();
        for entry in &self.errors {
            let (source_id, label) = entry.key();
            errors.entry(source_id.clone()).or_default().insert((*label).to_string(), *entry.value());
        }

        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            cache,
            breakers,
            breaker_transitions: self.breaker_transitions(),
            rate_limit_rejections: collect_counts(&self.rate_limited),
            errors,
            latency: self
                .latency
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().snapshot().summary()))
                .collect(),
            stale_served: collect_counts(&self.stale_served),
        }
    }
}

fn collect_counts(map: &DashMap<String, u64>) -> BTreeMap<String, u64> {
    map.iter().map(|entry| (entry.key().clone(), *entry.value())).collect()
}

impl TransitionObserver for AggregatorMetrics {
    fn on_transition(&self, breaker: &str, from: CircuitState, to: CircuitState) {
        let counter = match to {
            CircuitState::Open => &self.transitions.opened,
            CircuitState::HalfOpen => &self.transitions.half_opened,
            CircuitState::Closed => &self.transitions.closed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        debug!(breaker, %from, %to, "breaker transition recorded");
    }
}
