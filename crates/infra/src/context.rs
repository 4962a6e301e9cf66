//! Runtime wiring
//!
//! [`TributaryContext`] turns a validated [`Config`] into a ready pipeline:
//! HTTP transport, resilient fetcher, tiered cache (with the shared store
//! when enabled) and aggregator. It also owns the periodic purge task.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use tributary_common::resilience::{ConfigError, SystemClock};
use tributary_core::{Aggregator, MetricsSnapshot, ResilientFetcher, ResponseCache, Transport};
use tributary_domain::{AggregateResult, Config, Result, TributaryError, UpstreamSource};

use crate::http::HttpTransport;
use crate::store::MemorySharedStore;

fn config_error(err: ConfigError) -> TributaryError {
    TributaryError::Config(err.to_string())
}

/// Everything needed to serve aggregate requests
pub struct TributaryContext {
    config: Config,
    aggregator: Arc<Aggregator>,
    maintenance: CancellationToken,
}

impl std::fmt::Debug for TributaryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TributaryContext")
            .field("sources", &self.config.sources.len())
            .field("aggregator", &self.aggregator)
            .finish_non_exhaustive()
    }
}

impl TributaryContext {
    /// Build the pipeline over a reqwest transport
    ///
    /// # Errors
    /// Returns `TributaryError::Config` when the configuration is invalid and
    /// `TributaryError::Internal` when the HTTP client cannot be built.
    pub fn from_config(config: Config) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new()?);
        Self::with_transport(config, transport)
    }

    /// Build the pipeline over any [`Transport`]
    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        let fetcher = ResilientFetcher::from_config(transport, &config, SystemClock)
            .map_err(config_error)?;

        let mut cache = ResponseCache::new(config.cache.clone()).map_err(config_error)?;
        if config.shared_store.enabled {
            let store = MemorySharedStore::new(config.shared_store.max_capacity);
            cache = cache.with_shared_store(Arc::new(store));
        }

        let aggregator =
            Aggregator::new(Arc::new(fetcher), Arc::new(cache), config.aggregator.clone());

        info!(
            sources = config.sources.len(),
            shared_store = config.shared_store.enabled,
            stale_while_revalidate = config.aggregator.stale_while_revalidate,
            "tributary context ready"
        );

        Ok(Self { config, aggregator: Arc::new(aggregator), maintenance: CancellationToken::new() })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    /// Answer `logical_key` from every configured source
    pub async fn get(
        &self,
        logical_key: &str,
        params: &BTreeMap<String, String>,
    ) -> AggregateResult {
        self.aggregator.get(logical_key, &self.config.sources, params).await
    }

    /// Answer `logical_key` from the named sources only.
    ///
    /// # Errors
    /// Returns `TributaryError::InvalidInput` for an id that is not configured.
    #[instrument(skip(self, params), fields(key = logical_key))]
    pub async fn get_from(
        &self,
        logical_key: &str,
        source_ids: &[&str],
        params: &BTreeMap<String, String>,
    ) -> Result<AggregateResult> {
        let sources = source_ids
            .iter()
            .map(|id| {
                self.config.source(id).cloned().ok_or_else(|| {
                    TributaryError::InvalidInput(format!("unknown source '{id}'"))
                })
            })
            .collect::<Result<Vec<UpstreamSource>>>()?;

        Ok(self.aggregator.get(logical_key, &sources, params).await)
    }

    /// Drop every cached entry for `source_id`
    pub async fn invalidate_source(&self, source_id: &str) -> usize {
        self.aggregator.invalidate_source(source_id).await
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.aggregator.metrics_snapshot()
    }

    /// Purge expired cache entries on the configured interval until
    /// [`shutdown`](Self::shutdown). Must be called inside a Tokio runtime.
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        let cache = Arc::clone(self.aggregator.cache());
        let token = self.maintenance.clone();
        let period = self.config.aggregator.purge_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        debug!("cache maintenance stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        let purged = cache.purge_expired();
                        if purged > 0 {
                            debug!(purged, "purged expired cache entries");
                        }
                    }
                }
            }
        })
    }

    /// Stop background work and drop the in-process cache tiers
    pub fn shutdown(&self) {
        self.maintenance.cancel();
        self.aggregator.shutdown();
        self.aggregator.cache().clear();
        info!("tributary context shut down");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tributary_core::testing::MockTransport;
    use tributary_domain::{CacheTier, DataAvailability, SourceOutcome};

    use super::*;

    fn source(id: &str) -> UpstreamSource {
        UpstreamSource::builder(id, format!("https://{id}.example.com")).build().unwrap()
    }

    fn config(sources: Vec<UpstreamSource>) -> Config {
        let mut config = Config { sources, ..Config::default() };
        config.retry.base_delay_ms = 1;
        config
    }

    #[tokio::test]
    async fn test_get_queries_every_configured_source() {
        let transport = Arc::new(MockTransport::always_json(r#"{"ok":true}"#));
        let context =
            TributaryContext::with_transport(config(vec![source("a"), source("b")]), transport.clone())
                .unwrap();

        let result = context.get("prices", &BTreeMap::new()).await;
        assert_eq!(result.availability(), DataAvailability::Fresh);
        assert!(result.value("a").is_some());
        assert!(result.value("b").is_some());
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_get_from_rejects_unknown_source() {
        let transport = Arc::new(MockTransport::always_json("{}"));
        let context = TributaryContext::with_transport(config(vec![source("a")]), transport).unwrap();

        let err = context.get_from("prices", &["a", "zzz"], &BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, TributaryError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_shared_store_enabled_serves_after_local_clear() {
        let transport = Arc::new(MockTransport::always_json(r#"{"v":1}"#));
        let mut config = config(vec![source("a")]);
        config.shared_store.enabled = true;
        let context = TributaryContext::with_transport(config, transport.clone()).unwrap();

        context.get("prices", &BTreeMap::new()).await;
        context.aggregator().cache().clear();

        let result = context.get_from("prices", &["a"], &BTreeMap::new()).await.unwrap();
        assert!(matches!(
            result.per_source.get("a"),
            Some(SourceOutcome::Cached { tier: CacheTier::L3, .. })
        ));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let transport = Arc::new(MockTransport::always_json("{}"));
        let err = TributaryContext::with_transport(config(vec![source("a"), source("a")]), transport)
            .unwrap_err();
        assert!(matches!(err, TributaryError::Config(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_stops_on_shutdown() {
        let transport = Arc::new(MockTransport::always_json("{}"));
        let context = TributaryContext::with_transport(config(vec![source("a")]), transport).unwrap();

        let handle = context.spawn_maintenance();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!handle.is_finished());

        context.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("maintenance task should stop")
            .unwrap();
    }
}
