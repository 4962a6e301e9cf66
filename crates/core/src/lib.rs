//! # Tributary Core
//!
//! The aggregation pipeline, with no infrastructure dependencies.
//!
//! This crate contains:
//! - The resilient fetcher (breaker, rate limiter, retries per source)
//! - The tiered cache service built on the `tributary-common` tiers
//! - The aggregator that fans requests out and merges per-source outcomes
//! - Port interfaces ([`Transport`], [`SharedStore`]) for the outside world
//!
//! ## Architecture Principles
//! - Only depends on `tributary-common` and `tributary-domain`
//! - No HTTP client, shared store or subscriber setup here
//! - All external dependencies via traits

pub mod aggregate;
pub mod cache;
pub mod fetch;
pub mod observability;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use aggregate::{Aggregator, ResponseCache};
pub use cache::{cache_key, CacheHit, SharedStore, TieredCache, TieredCacheStats};
pub use fetch::{BreakerRegistry, ResilientFetcher, SourceRateLimiter, Transport};
pub use observability::{AggregatorMetrics, MetricsSnapshot};
