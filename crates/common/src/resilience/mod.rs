//! Resilience patterns for calling unreliable upstreams
//!
//! - **Backoff**: pure retry delay and retry/give-up decisions
//! - **Circuit Breaker**: stops calling an upstream that keeps failing
//! - **Rate Limiter**: fixed, wall-clock aligned request budgets
//! - **Histogram**: lock-free latency distribution
//!
//! All time-dependent types are generic over [`Clock`] and default to
//! [`SystemClock`].

pub mod backoff;
pub mod circuit_breaker;
pub mod clock;
pub mod histogram;
pub mod rate_limiter;

use thiserror::Error;

pub use backoff::{classify_status, classify_transport_error, next_delay, should_retry, BackoffPolicy};
pub use circuit_breaker::{
    BreakerPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder,
    CircuitBreakerMetrics, CircuitState, TransitionObserver,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use histogram::{Histogram, HistogramSnapshot, LatencySummary};
pub use rate_limiter::FixedWindowLimiter;

/// Configuration validation error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid { message: message.into() }
    }
}

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;
