//! Reusable building blocks shared across Tributary crates.
//!
//! # Modules
//!
//! - [`resilience`]: clock abstraction, backoff policy, circuit breaker,
//!   fixed-window rate limiter and latency histogram
//! - [`cache`]: the in-process cache tiers (sharded LRU and TTL map with stale
//!   retention), cache statistics and key patterns
//!
//! Nothing here performs I/O. Time always comes from an injected [`Clock`],
//! so every component can be driven deterministically with [`MockClock`].

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod cache;
pub mod resilience;

// Re-export commonly used types and traits for convenience
pub use cache::{CacheStats, KeyPattern, LruTier, TtlTier};
pub use resilience::{
    BackoffPolicy, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState,
    Clock, ConfigError, ConfigResult, FixedWindowLimiter, Histogram, HistogramSnapshot,
    MockClock, SystemClock, TransitionObserver,
};
