//! Aggregator - cache first, then a concurrent fan-out to every source
//!
//! For each source the aggregator answers, in order of preference, from:
//! a live cache entry; a stale L2 copy when stale-while-revalidate is on
//! (a background refresh is started); a fresh fetch; a stale copy standing
//! in for a failed fetch. Only when none of these exists does the source's
//! error appear in the result.
//!
//! Every configured source gets an outcome; the aggregator never picks a
//! "best" answer across sources. A source id listed twice is served once.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashSet;
use futures::future::join_all;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use tributary_common::resilience::{Clock, SystemClock};
use tributary_domain::{
    AggregateResult, AggregatorSettings, FetchError, FetchRequest, FetchedResponse,
    SourceOutcome, UpstreamSource,
};

use crate::cache::{cache_key, source_pattern, TieredCache};
use crate::fetch::ResilientFetcher;
use crate::observability::MetricsSnapshot;

/// Tiered cache holding fetched responses
pub type ResponseCache<C = SystemClock> = TieredCache<Arc<FetchedResponse>, C>;

/// Entry point for multi-source requests
pub struct Aggregator<C: Clock + Clone = SystemClock> {
    fetcher: Arc<ResilientFetcher<C>>,
    cache: Arc<ResponseCache<C>>,
    settings: AggregatorSettings,
    value_ttl: Duration,
    refreshing: Arc<DashSet<String>>,
    background: CancellationToken,
}

impl<C: Clock + Clone> std::fmt::Debug for Aggregator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("settings", &self.settings)
            .field("value_ttl", &self.value_ttl)
            .field("refreshing", &self.refreshing.len())
            .finish_non_exhaustive()
    }
}

impl<C: Clock + Clone> Aggregator<C> {
    /// Values are written with the longest tier TTL; each tier clamps it to
    /// its own maximum.
    pub fn new(
        fetcher: Arc<ResilientFetcher<C>>,
        cache: Arc<ResponseCache<C>>,
        settings: AggregatorSettings,
    ) -> Self {
        let cache_settings = cache.settings();
        let value_ttl =
            cache_settings.l1_ttl().max(cache_settings.l2_ttl()).max(cache_settings.l3_ttl());

        Self {
            fetcher,
            cache,
            settings,
            value_ttl,
            refreshing: Arc::new(DashSet::new()),
            background: CancellationToken::new(),
        }
    }

    /// Override the TTL fetched values are cached with
    pub fn with_value_ttl(mut self, ttl: Duration) -> Self {
        self.value_ttl = ttl;
        self
    }

    pub fn fetcher(&self) -> &Arc<ResilientFetcher<C>> {
        &self.fetcher
    }

    pub fn cache(&self) -> &Arc<ResponseCache<C>> {
        &self.cache
    }

    pub fn settings(&self) -> &AggregatorSettings {
        &self.settings
    }

    /// Number of stale-while-revalidate refreshes still running
    pub fn refreshes_in_flight(&self) -> usize {
        self.refreshing.len()
    }

    /// Answer `logical_key` from every source in `sources`
    pub async fn get(
        &self,
        logical_key: &str,
        sources: &[UpstreamSource],
        params: &BTreeMap<String, String>,
    ) -> AggregateResult {
        self.get_with_cancel(logical_key, sources, params, &CancellationToken::new()).await
    }

    /// Like [`get`](Self::get), abandoning outstanding fetches when `cancel` fires.
    ///
    /// Cancelled sources fall back to stale copies like any other failure.
    #[instrument(
        skip(self, sources, params, cancel),
        fields(key = logical_key, sources = sources.len())
    )]
    pub async fn get_with_cancel(
        &self,
        logical_key: &str,
        sources: &[UpstreamSource],
        params: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> AggregateResult {
        self.fetcher.metrics().record_request();
        let request = FetchRequest::new().with_params(params.clone());
        let mut per_source = BTreeMap::new();
        let mut to_fetch = Vec::new();

        let mut seen = HashSet::with_capacity(sources.len());
        let sources: Vec<&UpstreamSource> = sources
            .iter()
            .filter(|source| {
                let first = seen.insert(source.id());
                if !first {
                    warn!(source_id = source.id(), "duplicate source in request, ignored");
                }
                first
            })
            .collect();

        let lookups = join_all(sources.into_iter().map(|source| async move {
            let key = cache_key(source.id(), logical_key, params);
            let hit = self.cache.get(&key).await;
            (source, key, hit)
        }))
        .await;

        for (source, key, hit) in lookups {
            if let Some(hit) = hit {
                debug!(source_id = source.id(), tier = hit.tier.as_str(), "served from cache");
                per_source.insert(
                    source.id().to_string(),
                    SourceOutcome::Cached { value: hit.value, tier: hit.tier },
                );
                continue;
            }

            if self.settings.stale_while_revalidate {
                if let Some(stale) = self.cache.get_stale(&key) {
                    debug!(source_id = source.id(), "serving stale copy while revalidating");
                    self.fetcher.metrics().record_stale_served(source.id());
                    self.spawn_refresh(source.clone(), key, request.clone());
                    per_source.insert(
                        source.id().to_string(),
                        SourceOutcome::Stale { value: stale.value, error: None },
                    );
                    continue;
                }
            }

            to_fetch.push((source.clone(), key));
        }

        if !to_fetch.is_empty() {
            self.fan_out(to_fetch, &request, cancel, &mut per_source).await;
        }

        AggregateResult::new(logical_key, per_source, Utc::now())
    }

    async fn fan_out(
        &self,
        to_fetch: Vec<(UpstreamSource, String)>,
        request: &FetchRequest,
        cancel: &CancellationToken,
        per_source: &mut BTreeMap<String, SourceOutcome>,
    ) {
        let token = cancel.child_token();
        // Dropping the JoinSet aborts every task still running.
        let mut tasks = JoinSet::new();
        let mut keys = HashMap::with_capacity(to_fetch.len());

        for (source, key) in to_fetch {
            let fetcher = Arc::clone(&self.fetcher);
            let request = request.clone();
            let token = token.clone();
            let source_id = source.id().to_string();

            let handle = tasks.spawn(async move {
                let result = fetcher.fetch_with_cancel(&source, &request, &token).await;
                (source, result)
            });
            keys.insert(handle.id(), (source_id, key));
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, (source, Ok(response)))) => {
                    let Some((_, key)) = keys.remove(&id) else { continue };
                    let value = Arc::new(response);
                    self.cache.set(&key, Arc::clone(&value), self.value_ttl).await;
                    per_source.insert(source.id().to_string(), SourceOutcome::Fresh { value });
                }
                Ok((id, (source, Err(error)))) => {
                    let Some((_, key)) = keys.remove(&id) else { continue };
                    per_source.insert(source.id().to_string(), self.fallback(&key, error));
                }
                Err(join_error) => {
                    let Some((source_id, key)) = keys.remove(&join_error.id()) else { continue };
                    warn!(source_id, error = %join_error, "fetch task did not complete");
                    let error = FetchError::Cancelled { source_id: source_id.clone() };
                    per_source.insert(source_id, self.fallback(&key, error));
                }
            }
        }
    }

    /// Stale copy if one is retained, the error otherwise
    fn fallback(&self, key: &str, error: FetchError) -> SourceOutcome {
        match self.cache.get_stale(key) {
            Some(stale) => {
                warn!(source_id = error.source_id(), error = %error, "fetch failed, serving stale copy");
                self.fetcher.metrics().record_stale_served(error.source_id());
                SourceOutcome::Stale { value: stale.value, error: Some(error) }
            }
            None => SourceOutcome::Failed { error },
        }
    }

    /// Refresh `key` in the background; at most one refresh per key at a time
    fn spawn_refresh(&self, source: UpstreamSource, key: String, request: FetchRequest) {
        if !self.refreshing.insert(key.clone()) {
            return;
        }

        let fetcher = Arc::clone(&self.fetcher);
        let cache = Arc::clone(&self.cache);
        let refreshing = Arc::clone(&self.refreshing);
        let token = self.background.child_token();
        let ttl = self.value_ttl;

        tokio::spawn(async move {
            match fetcher.fetch_with_cancel(&source, &request, &token).await {
                Ok(response) => {
                    cache.set(&key, Arc::new(response), ttl).await;
                    debug!(source_id = source.id(), "background refresh stored");
                }
                Err(error) => debug!(source_id = source.id(), error = %error, "background refresh failed"),
            }
            refreshing.remove(&key);
        });
    }

    /// Drop every cached entry for `source_id` from all tiers
    pub async fn invalidate_source(&self, source_id: &str) -> usize {
        match source_pattern(source_id) {
            Ok(pattern) => self.cache.invalidate(&pattern).await,
            Err(e) => {
                warn!(source_id, error = %e, "cannot build invalidation pattern");
                0
            }
        }
    }

    /// Counters for the whole pipeline
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.fetcher.metrics().snapshot(self.cache.stats(), self.fetcher.breakers().all_metrics())
    }

    /// Cancel background refreshes
    pub fn shutdown(&self) {
        self.background.cancel();
    }
}

#[cfg(test)]
mod tests {
    use tributary_common::resilience::{BackoffPolicy, CircuitBreakerConfig, MockClock};
    use tributary_domain::{CacheSettings, CacheTier, DataAvailability};

    use super::*;
    use crate::cache::SharedStore;
    use crate::testing::{InMemorySharedStore, MockTransport};

    struct Harness {
        clock: MockClock,
        transport: Arc<MockTransport>,
        aggregator: Aggregator<MockClock>,
    }

    fn harness(transport: MockTransport, swr: bool) -> Harness {
        harness_with_store(transport, swr, None)
    }

    fn harness_with_store(
        transport: MockTransport,
        swr: bool,
        store: Option<Arc<dyn SharedStore>>,
    ) -> Harness {
        let clock = MockClock::starting_at(Duration::from_secs(1_700_000_000));
        let transport = Arc::new(transport);
        let fetcher = ResilientFetcher::with_clock(
            transport.clone(),
            CircuitBreakerConfig::default(),
            BackoffPolicy::new(2, Duration::from_millis(10), Duration::from_secs(1)).unwrap(),
            clock.clone(),
        )
        .unwrap();
        let cache_settings = CacheSettings { l1_ttl_seconds: 1, l2_ttl_seconds: 1, ..CacheSettings::default() };
        let mut cache = TieredCache::with_clock(cache_settings, clock.clone()).unwrap();
        if let Some(store) = store {
            cache = cache.with_shared_store(store);
        }
        let settings = AggregatorSettings { stale_while_revalidate: swr, ..AggregatorSettings::default() };
        let aggregator = Aggregator::new(Arc::new(fetcher), Arc::new(cache), settings);

        Harness { clock, transport, aggregator }
    }

    fn source(id: &str, rate_limit: u32) -> UpstreamSource {
        UpstreamSource::builder(id, format!("https://{id}.example.com"))
            .rate_limit_per_minute(rate_limit)
            .timeout(Duration::from_millis(500))
            .build()
            .unwrap()
    }

    fn no_params() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// Validates the cold path then the warm path.
    ///
    /// Assertions:
    /// - Ensures the first request fetches and caches.
    /// - Ensures the second request is answered from L1 without a fetch.
    #[tokio::test]
    async fn test_fetches_then_serves_from_cache() {
        let h = harness(MockTransport::always_json(r#"{"tvl": 1}"#), false);
        let sources = [source("llama", 0)];

        let first = h.aggregator.get("tvl", &sources, &no_params()).await;
        assert!(matches!(first.single(), Some(SourceOutcome::Fresh { .. })));
        assert!(!first.stale);

        let second = h.aggregator.get("tvl", &sources, &no_params()).await;
        assert!(matches!(second.single(), Some(SourceOutcome::Cached { tier: CacheTier::L1, .. })));
        assert_eq!(second.availability(), DataAvailability::Fresh);
        assert_eq!(h.transport.calls(), 1);
    }

    /// Validates stale fallback on a timed-out fetch.
    ///
    /// Assertions:
    /// - Ensures the expired value is returned with `stale = true`.
    /// - Ensures the timeout is kept alongside the stale value.
    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_back_to_stale_copy() {
        let transport = MockTransport::new();
        transport.push_json(200, r#"{"v": 1}"#);
        let h = harness(transport.with_fallback(Err(tributary_domain::TransportError::Timeout)), false);
        let sources = [source("velo", 0)];

        h.aggregator.get("rates", &sources, &no_params()).await;
        h.clock.advance(Duration::from_secs(2));

        let result = h.aggregator.get("rates", &sources, &no_params()).await;
        assert!(result.stale);
        assert_eq!(result.availability(), DataAvailability::Stale);
        let outcome = result.single().unwrap();
        assert_eq!(outcome.value().unwrap().body.as_json().unwrap()["v"], 1);
        assert!(matches!(outcome.error(), Some(FetchError::Timeout { .. })));
    }

    /// Validates the rate-limit scenario from a tight budget.
    ///
    /// Assertions:
    /// - Ensures two requests reach the transport.
    /// - Ensures the third is rate limited and served stale.
    #[tokio::test]
    async fn test_rate_limited_request_served_stale() {
        let h = harness(MockTransport::always_json("{}"), false);
        let sources = [source("coingecko", 2)];

        h.aggregator.get("price", &sources, &no_params()).await;
        h.clock.advance(Duration::from_secs(1));
        h.aggregator.get("price", &sources, &no_params()).await;
        h.clock.advance(Duration::from_secs(1));
        let third = h.aggregator.get("price", &sources, &no_params()).await;

        assert_eq!(h.transport.calls(), 2);
        assert!(third.stale);
        assert!(matches!(third.error("coingecko"), Some(FetchError::RateLimited { .. })));
    }

    /// Validates multi-source merging keeps every outcome.
    ///
    /// Assertions:
    /// - Ensures a failing source does not hide a healthy one.
    /// - Ensures availability reports a partial result.
    #[tokio::test]
    async fn test_partial_result_keeps_every_source() {
        let h = harness(MockTransport::always_json("{}"), false);
        let broken = UpstreamSource::builder("broken", "https://broken.example.com")
            .rate_limit_per_minute(1)
            .build()
            .unwrap();
        let sources = [source("healthy", 0), broken];

        // Spend the broken source's only token so it fails fast.
        h.aggregator.fetcher().register_source(&sources[1]);
        assert!(h.aggregator.fetcher().limiter().try_acquire("broken"));

        let result = h.aggregator.get("k", &sources, &no_params()).await;
        assert_eq!(result.per_source.len(), 2);
        assert!(result.value("healthy").is_some());
        assert!(matches!(result.error("broken"), Some(FetchError::RateLimited { .. })));
        assert_eq!(result.availability(), DataAvailability::Partial);
        assert!(result.single().is_none());
    }

    /// Validates stale-while-revalidate.
    ///
    /// Assertions:
    /// - Ensures the stale copy is returned immediately with no error.
    /// - Ensures the background refresh repopulates the cache.
    #[tokio::test]
    async fn test_stale_while_revalidate_refreshes_in_background() {
        let transport = MockTransport::new();
        transport.push_json(200, r#"{"v": 1}"#);
        transport.push_json(200, r#"{"v": 2}"#);
        let h = harness(transport, true);
        let sources = [source("llama", 0)];

        h.aggregator.get("tvl", &sources, &no_params()).await;
        h.clock.advance(Duration::from_secs(2));

        let result = h.aggregator.get("tvl", &sources, &no_params()).await;
        let outcome = result.single().unwrap();
        assert!(matches!(outcome, SourceOutcome::Stale { error: None, .. }));
        assert_eq!(outcome.value().unwrap().body.as_json().unwrap()["v"], 1);

        while h.aggregator.refreshes_in_flight() > 0 {
            tokio::task::yield_now().await;
        }
        let refreshed = h.aggregator.get("tvl", &sources, &no_params()).await;
        assert!(matches!(refreshed.single(), Some(SourceOutcome::Cached { .. })));
        assert_eq!(refreshed.value("llama").unwrap().body.as_json().unwrap()["v"], 2);
        assert_eq!(h.transport.calls(), 2);
    }

    /// Validates cancellation of the fan-out.
    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_outstanding_fetches() {
        let h = harness(MockTransport::always_json("{}").with_delay(Duration::from_secs(10)), false);
        let sources = [source("a", 0), source("b", 0)];
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = h.aggregator.get_with_cancel("k", &sources, &no_params(), &cancel).await;
        assert_eq!(result.availability(), DataAvailability::Unavailable);
        assert!(matches!(result.error("a"), Some(FetchError::Cancelled { .. })));
        assert!(matches!(result.error("b"), Some(FetchError::Cancelled { .. })));
    }

    /// Validates concurrent cold requests never exceed one call per request.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cold_gets_bound_upstream_calls() {
        let h = harness(MockTransport::always_json("{}"), false);
        let aggregator = Arc::new(h.aggregator);
        let sources = Arc::new([source("s", 0)]);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let aggregator = Arc::clone(&aggregator);
            let sources = Arc::clone(&sources);
            handles.push(tokio::spawn(async move {
                aggregator.get("k", sources.as_slice(), &BTreeMap::new()).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().value("s").is_some());
        }

        assert!(h.transport.calls() <= 8);
        assert!(h.transport.calls() >= 1);
    }

    /// Validates that shared-tier lookups for several sources overlap.
    ///
    /// Assertions:
    /// - Ensures every source is answered from L3 after the local tiers are
    ///   cleared.
    /// - Ensures the request waits roughly one L3 round trip, not one per
    ///   source.
    #[tokio::test(start_paused = true)]
    async fn test_shared_tier_lookups_run_concurrently() {
        let store = Arc::new(InMemorySharedStore::default().with_delay(Duration::from_millis(100)));
        let h = harness_with_store(MockTransport::always_json("{}"), false, Some(store));
        let sources = [source("a", 0), source("b", 0), source("c", 0), source("d", 0)];

        h.aggregator.get("k", &sources, &no_params()).await;
        h.aggregator.cache().clear();

        let started = tokio::time::Instant::now();
        let result = h.aggregator.get("k", &sources, &no_params()).await;
        let elapsed = started.elapsed();

        assert!(result
            .per_source
            .values()
            .all(|outcome| matches!(outcome, SourceOutcome::Cached { tier: CacheTier::L3, .. })));
        assert!(elapsed < Duration::from_millis(200), "lookups took {elapsed:?}");
        assert_eq!(h.transport.calls(), 4);
    }

    /// Validates that a source listed twice is fetched once.
    #[tokio::test]
    async fn test_duplicate_source_is_fetched_once() {
        let h = harness(MockTransport::always_json("{}"), false);
        let sources = [source("dup", 0), source("dup", 0), source("other", 0)];

        let result = h.aggregator.get("k", &sources, &no_params()).await;

        assert_eq!(result.per_source.len(), 2);
        assert!(result.value("dup").is_some());
        assert_eq!(h.transport.calls(), 2);
    }

    /// Validates source invalidation and the metrics snapshot.
    #[tokio::test]
    async fn test_invalidate_source_forces_refetch() {
        let h = harness(MockTransport::always_json("{}"), false);
        let sources = [source("a", 0)];

        h.aggregator.get("k", &sources, &no_params()).await;
        assert_eq!(h.aggregator.invalidate_source("a").await, 2);
        h.aggregator.get("k", &sources, &no_params()).await;

        assert_eq!(h.transport.calls(), 2);
        let snapshot = h.aggregator.metrics_snapshot();
        assert_eq!(snapshot.requests, 2);
        assert_eq!(snapshot.latency["a"].count, 2);
        assert_eq!(snapshot.cache.misses, 2);
        assert!(snapshot.breakers.contains_key("a"));
    }
}
