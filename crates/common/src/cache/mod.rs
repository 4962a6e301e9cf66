//! In-process cache tiers
//!
//! - [`LruTier`]: small, sharded, least-recently-used tier (L1)
//! - [`TtlTier`]: larger TTL tier that keeps expired entries around for stale
//!   fallback (L2)
//!
//! Both store [`tributary_domain::CacheEntry`] values and take the current
//! time in milliseconds as an argument, so the owner decides which clock
//! drives expiry. Each tier clamps incoming TTLs to its own `max_ttl` and
//! relabels entries with its own tier on the way in and out.
//!
//! ```
//! use std::time::Duration;
//!
//! use tributary_common::cache::{LruTier, TierConfig};
//! use tributary_domain::{CacheEntry, CacheTier};
//!
//! let l1: LruTier<String> = LruTier::new(TierConfig::l1()).unwrap();
//! let entry = CacheEntry::new("k", "v".to_string(), 0, Duration::from_secs(30), CacheTier::L2);
//! l1.insert(entry, 0);
//! assert_eq!(l1.get("k", 1_000).map(|e| e.value), Some("v".to_string()));
//! ```

pub mod config;
pub mod lru_tier;
pub mod pattern;
pub mod stats;
pub mod ttl_tier;

pub use config::{TierConfig, TierConfigBuilder};
pub use lru_tier::LruTier;
pub use pattern::KeyPattern;
pub use stats::CacheStats;
pub use ttl_tier::TtlTier;
