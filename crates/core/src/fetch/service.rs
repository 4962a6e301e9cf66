//! Resilient fetcher - one source, one request, typed outcome
//!
//! Every fetch passes the same gates in the same order:
//!
//! 1. the source's circuit breaker (open ⇒ `CircuitOpen`, nothing sent)
//! 2. the source's rate limiter (over budget ⇒ `RateLimited`, nothing sent)
//! 3. up to `max_attempts` HTTP attempts, each bounded by the source timeout,
//!    with exponential backoff between retryable failures
//!
//! The terminal outcome is then recorded into the breaker. No caching
//! decisions are made here.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use tributary_common::resilience::{
    classify_status, classify_transport_error, BackoffPolicy, CircuitBreakerConfig, Clock,
    ConfigResult, SystemClock,
};
use tributary_domain::{
    Config, FetchAttempt, FetchError, FetchOutcome, FetchRequest, FetchedResponse, HttpRequest,
    HttpResponse, UpstreamSource,
};

use super::parse::parse_body;
use super::ports::Transport;
use super::registry::{BreakerRegistry, SourceRateLimiter};
use crate::observability::AggregatorMetrics;

const ERROR_BODY_PREVIEW: usize = 200;

/// Fetches from upstream sources behind a breaker, a limiter and retries
pub struct ResilientFetcher<C: Clock + Clone = SystemClock> {
    transport: Arc<dyn Transport>,
    breakers: BreakerRegistry<C>,
    limiter: SourceRateLimiter<C>,
    backoff: BackoffPolicy,
    metrics: Arc<AggregatorMetrics>,
}

impl<C: Clock + Clone> std::fmt::Debug for ResilientFetcher<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientFetcher")
            .field("breakers", &self.breakers)
            .field("limiter", &self.limiter)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl ResilientFetcher<SystemClock> {
    pub fn new(
        transport: Arc<dyn Transport>,
        breaker: CircuitBreakerConfig,
        backoff: BackoffPolicy,
    ) -> ConfigResult<Self> {
        Self::with_clock(transport, breaker, backoff, SystemClock)
    }
}

impl<C: Clock + Clone> ResilientFetcher<C> {
    pub fn with_clock(
        transport: Arc<dyn Transport>,
        breaker: CircuitBreakerConfig,
        backoff: BackoffPolicy,
        clock: C,
    ) -> ConfigResult<Self> {
        backoff.validate()?;
        let metrics = Arc::new(AggregatorMetrics::new());
        let breakers = BreakerRegistry::new(breaker, clock.clone())?.with_observer(metrics.clone());

        Ok(Self {
            transport,
            breakers,
            limiter: SourceRateLimiter::new(clock),
            backoff,
            metrics,
        })
    }

    /// Build from loaded configuration, registering every configured source
    pub fn from_config(transport: Arc<dyn Transport>, config: &Config, clock: C) -> ConfigResult<Self> {
        let fetcher = Self::with_clock(
            transport,
            CircuitBreakerConfig::from_settings(&config.breaker)?,
            BackoffPolicy::from_settings(&config.retry)?,
            clock,
        )?;
        for source in &config.sources {
            fetcher.register_source(source);
        }
        Ok(fetcher)
    }

    /// Report into `metrics` instead of a private instance.
    ///
    /// Call before the first fetch; breakers created earlier keep reporting
    /// to the previous observer.
    pub fn with_metrics(mut self, metrics: Arc<AggregatorMetrics>) -> Self {
        self.breakers = self.breakers.with_observer(metrics.clone());
        self.metrics = metrics;
        self
    }

    pub fn breakers(&self) -> &BreakerRegistry<C> {
        &self.breakers
    }

    pub fn limiter(&self) -> &SourceRateLimiter<C> {
        &self.limiter
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    pub fn metrics(&self) -> &Arc<AggregatorMetrics> {
        &self.metrics
    }

    /// Make the limiter aware of `source`'s budget
    pub fn register_source(&self, source: &UpstreamSource) {
        self.limiter.register(source.id(), source.rate_limit_per_minute());
    }

    /// Fetch `request` from `source`
    pub async fn fetch(
        &self,
        source: &UpstreamSource,
        request: &FetchRequest,
    ) -> Result<FetchedResponse, FetchError> {
        self.fetch_with_cancel(source, request, &CancellationToken::new()).await
    }

    /// Fetch, abandoning the request as soon as `cancel` fires.
    ///
    /// A cancelled fetch records nothing into the breaker; if it held the
    /// half-open probe, the probe slot is released.
    #[instrument(skip(self, source, request, cancel), fields(source_id = %source.id()))]
    pub async fn fetch_with_cancel(
        &self,
        source: &UpstreamSource,
        request: &FetchRequest,
        cancel: &CancellationToken,
    ) -> Result<FetchedResponse, FetchError> {
        let source_id = source.id();

        let breaker = self.breakers.get_or_create(source_id);
        let Some(permit) = breaker.try_acquire() else {
            debug!("circuit open, skipping upstream");
            return Err(self.fail(FetchError::CircuitOpen { source_id: source_id.to_string() }));
        };

        self.register_source(source);
        if !self.limiter.try_acquire(source_id) {
            warn!(limit_per_minute = source.rate_limit_per_minute(), "rate limit exceeded");
            return Err(self.fail(FetchError::RateLimited {
                source_id: source_id.to_string(),
                limit_per_minute: source.rate_limit_per_minute(),
            }));
        }

        let http_request = HttpRequest::from_source(source, request).map_err(|e| {
            self.fail(FetchError::Fatal {
                source_id: source_id.to_string(),
                status: None,
                message: e.to_string(),
            })
        })?;

        let started = Instant::now();
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = self.run_attempts(source, http_request, started) => Some(result),
        };

        match result {
            Some(Ok(response)) => {
                permit.success();
                self.metrics.record_latency(source_id, started.elapsed());
                Ok(response)
            }
            Some(Err(error)) => {
                permit.failure();
                Err(self.fail(error))
            }
            None => {
                drop(permit);
                debug!("fetch cancelled");
                Err(self.fail(FetchError::Cancelled { source_id: source_id.to_string() }))
            }
        }
    }

    fn fail(&self, error: FetchError) -> FetchError {
        self.metrics.record_error(&error);
        error
    }

    async fn run_attempts(
        &self,
        source: &UpstreamSource,
        request: HttpRequest,
        started: Instant,
    ) -> Result<FetchedResponse, FetchError> {
        let source_id = source.id();
        let timeout = source.timeout();
        let mut attempt_number = 0;

        loop {
            attempt_number += 1;
            let attempt_started = Instant::now();
            let started_at_ms = Utc::now().timestamp_millis().max(0) as u64;

            let sent = tokio::time::timeout(timeout, self.transport.send(request.clone())).await;
            let (outcome, detail) = match sent {
                Ok(Ok(response)) => match classify_status(response.status) {
                    FetchOutcome::Success => {
                        debug!(attempt = attempt_number, status = response.status, "upstream answered");
                        return Ok(self.finish(source_id, response, attempt_number, started));
                    }
                    FetchOutcome::FatalError => {
                        return Err(FetchError::Fatal {
                            source_id: source_id.to_string(),
                            status: Some(response.status),
                            message: error_preview(&response),
                        });
                    }
                    outcome => (outcome, format!("HTTP {}", response.status)),
                },
                Ok(Err(error)) => match classify_transport_error(&error) {
                    FetchOutcome::FatalError => {
                        return Err(FetchError::Fatal {
                            source_id: source_id.to_string(),
                            status: None,
                            message: error.to_string(),
                        });
                    }
                    outcome => (outcome, error.to_string()),
                },
                Err(_) => (FetchOutcome::Timeout, format!("no response within {} ms", millis(timeout))),
            };

            let attempt = FetchAttempt {
                attempt_number,
                started_at_ms,
                duration_ms: millis(attempt_started.elapsed()),
                outcome,
            };

            if !self.backoff.should_retry(attempt.attempt_number, attempt.outcome) {
                warn!(
                    attempts = attempt.attempt_number,
                    outcome = ?attempt.outcome,
                    error = %detail,
                    "upstream still failing, giving up"
                );
                return Err(match attempt.outcome {
                    FetchOutcome::Timeout => FetchError::Timeout {
                        source_id: source_id.to_string(),
                        timeout_ms: millis(timeout),
                    },
                    _ => FetchError::RetryableExhausted {
                        source_id: source_id.to_string(),
                        attempts: attempt.attempt_number,
                        last_error: detail,
                    },
                });
            }

            let delay = self.backoff.delay_after(attempt.attempt_number);
            debug!(
                attempt = attempt.attempt_number,
                outcome = ?attempt.outcome,
                duration_ms = attempt.duration_ms,
                delay_ms = millis(delay),
                error = %detail,
                "retrying after backoff"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn finish(
        &self,
        source_id: &str,
        response: HttpResponse,
        attempts: u32,
        started: Instant,
    ) -> FetchedResponse {
        FetchedResponse {
            source_id: source_id.to_string(),
            status: response.status,
            attempts,
            elapsed_ms: millis(started.elapsed()),
            fetched_at: Utc::now(),
            body: parse_body(response.content_type.as_deref(), &response.body),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn error_preview(response: &HttpResponse) -> String {
    let text = response.body_text();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return format!("HTTP {}", response.status);
    }
    match trimmed.char_indices().nth(ERROR_BODY_PREVIEW) {
        Some((cut, _)) => format!("HTTP {}: {}...", response.status, &trimmed[..cut]),
        None => format!("HTTP {}: {trimmed}", response.status),
    }
}
