//! Circuit breaker with a rolling failure window and a single half-open probe
//!
//! State machine:
//!
//! ```text
//! Closed --(threshold failures within window)--> Open
//! Open --(recovery_timeout elapsed, next call)--> HalfOpen
//! HalfOpen --(probe succeeds)--> Closed
//! HalfOpen --(probe fails)--> Open (fresh opened_at)
//! ```
//!
//! Callers obtain a [`BreakerPermit`] before calling the protected upstream
//! and settle it with [`BreakerPermit::success`] or [`BreakerPermit::failure`].
//! A permit dropped unsettled records nothing; if it was the half-open probe,
//! the probe slot is released so the next call can probe instead. Only the
//! probe permit settles a half-open circuit; permits issued before the last
//! transition update counters only.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use tributary_domain::constants::{
    DEFAULT_FAILURE_THRESHOLD, DEFAULT_FAILURE_WINDOW_SECS, DEFAULT_RECOVERY_TIMEOUT_SECS,
};
use tributary_domain::BreakerSettings;

use super::{Clock, ConfigError, ConfigResult, SystemClock};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Recovery timeout elapsed; one probe request is allowed through
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Hook notified on every state transition.
pub trait TransitionObserver: Send + Sync {
    fn on_transition(&self, breaker: &str, from: CircuitState, to: CircuitState);
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Failures within `failure_window` that open the circuit
    pub failure_threshold: u64,
    /// Rolling window failures are counted in
    pub failure_window: Duration,
    /// Time to wait in Open before letting a probe through
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            failure_window: Duration::from_secs(DEFAULT_FAILURE_WINDOW_SECS),
            recovery_timeout: Duration::from_secs(DEFAULT_RECOVERY_TIMEOUT_SECS),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }

    /// Build a configuration from the `breaker` configuration section
    pub fn from_settings(settings: &BreakerSettings) -> ConfigResult<Self> {
        Self::builder()
            .failure_threshold(settings.failure_threshold)
            .failure_window(settings.failure_window())
            .recovery_timeout(settings.recovery_timeout())
            .build()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be greater than 0"));
        }
        if self.failure_window.is_zero() {
            return Err(ConfigError::invalid("failure_window must be greater than zero"));
        }
        Ok(())
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn failure_window(mut self, window: Duration) -> Self {
        self.config.failure_window = window;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Circuit breaker metrics for monitoring
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    /// Failures currently inside the rolling window
    pub failure_count: u64,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub times_opened: u64,
    pub times_closed: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: VecDeque<Instant>,
    last_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    /// Bumped on every transition; permits from an earlier state only count
    generation: u64,
}

impl BreakerInner {
    fn closed() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            last_failure_at: None,
            opened_at: None,
            probe_in_flight: false,
            generation: 0,
        }))
    }
}

/// State a permit was issued under
#[derive(Debug, Clone, Copy)]
struct Ticket {
    generation: u64,
    probe: bool,
}

#[derive(Debug, Default)]
struct BreakerCounters {
    total_calls: AtomicU64,
    rejected_calls: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    times_opened: AtomicU64,
    times_closed: AtomicU64,
}

/// Circuit breaker for one upstream.
///
/// Cheap to clone; clones share state.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<BreakerInner>>,
    counters: Arc<BreakerCounters>,
    observer: Option<Arc<dyn TransitionObserver>>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            config: self.config.clone(),
            inner: Arc::clone(&self.inner),
            counters: Arc::clone(&self.counters),
            observer: self.observer.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a new circuit breaker using the system clock
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(name, config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a new circuit breaker with a custom clock
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: C,
    ) -> ConfigResult<Self> {
        config.validate()?;
        let name: String = name.into();

        Ok(Self {
            name: Arc::from(name),
            config,
            inner: BreakerInner::closed(),
            counters: Arc::new(BreakerCounters::default()),
            observer: None,
            clock: Arc::new(clock),
        })
    }

    /// Independent breaker with the same config, clock and observer.
    ///
    /// State and counters start fresh; only the wiring is shared.
    pub fn sibling(&self, name: impl Into<String>) -> Self {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            config: self.config.clone(),
            inner: BreakerInner::closed(),
            counters: Arc::new(BreakerCounters::default()),
            observer: self.observer.clone(),
            clock: Arc::clone(&self.clock),
        }
    }

    /// Attach a transition observer
    pub fn with_observer(mut self, observer: Arc<dyn TransitionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether a call made now would be let through, without claiming it.
    pub fn can_execute(&self) -> bool {
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => !inner.probe_in_flight,
            CircuitState::Open => self.recovery_elapsed(&inner, self.clock.now()),
        }
    }

    /// Claim permission for one call.
    ///
    /// Returns `None` while the circuit is open, or while another half-open
    /// probe is in flight. May move an Open circuit to HalfOpen.
    pub fn try_acquire(&self) -> Option<BreakerPermit<C>> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let probe = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open if self.recovery_elapsed(&inner, now) => {
                self.transition(&mut inner, CircuitState::HalfOpen);
                inner.probe_in_flight = true;
                true
            }
            CircuitState::HalfOpen if !inner.probe_in_flight => {
                inner.probe_in_flight = true;
                true
            }
            CircuitState::Open | CircuitState::HalfOpen => {
                drop(inner);
                self.counters.rejected_calls.fetch_add(1, Ordering::Relaxed);
                debug!(breaker = %self.name, "circuit breaker rejecting call");
                return None;
            }
        };
        let ticket = Ticket { generation: inner.generation, probe };
        drop(inner);

        self.counters.total_calls.fetch_add(1, Ordering::Relaxed);
        Some(BreakerPermit { breaker: self.clone(), ticket, settled: false })
    }

    /// Record a success observed without a permit.
    ///
    /// Only a Closed circuit is affected; a half-open circuit is settled by
    /// its probe alone.
    pub fn record_success(&self) {
        self.settle(true, None);
    }

    /// Record a failure observed without a permit.
    ///
    /// Only a Closed circuit is affected; a half-open circuit is settled by
    /// its probe alone.
    pub fn record_failure(&self) {
        self.settle(false, None);
    }

    fn settle(&self, success: bool, ticket: Option<Ticket>) {
        let counter = if success { &self.counters.successes } else { &self.counters.failures };
        counter.fetch_add(1, Ordering::Relaxed);

        let now = self.clock.now();
        let mut inner = self.inner.lock();
        if !success {
            inner.last_failure_at = Some(now);
        }

        let ticket = ticket.unwrap_or(Ticket { generation: inner.generation, probe: false });
        if ticket.generation != inner.generation {
            debug!(breaker = %self.name, success, "outcome from an earlier circuit state, counted only");
            return;
        }

        match (inner.state, ticket.probe) {
            (CircuitState::Closed, false) if success => inner.failures.clear(),
            (CircuitState::Closed, false) => {
                inner.failures.push_back(now);
                self.prune_window(&mut inner, now);
                let in_window = inner.failures.len() as u64;
                if in_window >= self.config.failure_threshold {
                    inner.opened_at = Some(now);
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            (CircuitState::HalfOpen, true) if success => {
                inner.failures.clear();
                inner.opened_at = None;
                inner.probe_in_flight = false;
                self.transition(&mut inner, CircuitState::Closed);
            }
            (CircuitState::HalfOpen, true) => {
                inner.opened_at = Some(now);
                inner.probe_in_flight = false;
                self.transition(&mut inner, CircuitState::Open);
            }
            (state, probe) => {
                debug!(breaker = %self.name, %state, probe, success, "outcome does not settle the circuit");
            }
        }
    }

    /// Current state, without applying the recovery timeout
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Get circuit breaker metrics
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let (state, failure_count) = {
            let inner = self.inner.lock();
            (inner.state, inner.failures.len() as u64)
        };
        CircuitBreakerMetrics {
            state,
            failure_count,
            total_calls: self.counters.total_calls.load(Ordering::Relaxed),
            rejected_calls: self.counters.rejected_calls.load(Ordering::Relaxed),
            successes: self.counters.successes.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            times_opened: self.counters.times_opened.load(Ordering::Relaxed),
            times_closed: self.counters.times_closed.load(Ordering::Relaxed),
        }
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.failures.clear();
        inner.last_failure_at = None;
        inner.opened_at = None;
        inner.probe_in_flight = false;
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed);
        }
        info!(breaker = %self.name, "circuit breaker manually reset");
    }

    fn release_probe(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen && inner.generation == generation {
            inner.probe_in_flight = false;
            debug!(breaker = %self.name, "half-open probe abandoned, slot released");
        }
    }

    fn recovery_elapsed(&self, inner: &BreakerInner, now: Instant) -> bool {
        inner
            .opened_at
            .map_or(true, |opened| now.duration_since(opened) >= self.config.recovery_timeout)
    }

    fn prune_window(&self, inner: &mut BreakerInner, now: Instant) {
        while let Some(oldest) = inner.failures.front() {
            if now.duration_since(*oldest) > self.config.failure_window {
                inner.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        inner.generation += 1;

        match to {
            CircuitState::Open => {
                self.counters.times_opened.fetch_add(1, Ordering::Relaxed);
                warn!(breaker = %self.name, %from, failures = inner.failures.len(), "circuit breaker opened");
            }
            CircuitState::Closed => {
                self.counters.times_closed.fetch_add(1, Ordering::Relaxed);
                info!(breaker = %self.name, %from, "circuit breaker closed");
            }
            CircuitState::HalfOpen => {
                info!(breaker = %self.name, "circuit breaker half-open, allowing one probe");
            }
        }

        if let Some(observer) = &self.observer {
            observer.on_transition(&self.name, from, to);
        }
    }
}

/// Permission for one call through a [`CircuitBreaker`].
#[must_use = "a permit records nothing unless settled with success() or failure()"]
pub struct BreakerPermit<C: Clock = SystemClock> {
    breaker: CircuitBreaker<C>,
    ticket: Ticket,
    settled: bool,
}

impl<C: Clock> BreakerPermit<C> {
    /// Whether this call is the half-open probe
    pub fn is_probe(&self) -> bool {
        self.ticket.probe
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.settle(true, Some(self.ticket));
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.settle(false, Some(self.ticket));
    }
}

impl<C: Clock> fmt::Debug for BreakerPermit<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerPermit")
            .field("breaker", &self.breaker.name())
            .field("probe", &self.ticket.probe)
            .finish()
    }
}

impl<C: Clock> Drop for BreakerPermit<C> {
    fn drop(&mut self) {
        if !self.settled && self.ticket.probe {
            self.breaker.release_probe(self.ticket.generation);
        }
    }
}
