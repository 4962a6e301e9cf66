//! Tiered caching of fetched responses

pub mod key;
pub mod ports;
pub mod service;
pub mod stats;

pub use key::{cache_key, source_pattern};
pub use ports::SharedStore;
pub use service::{CacheHit, TieredCache};
pub use stats::TieredCacheStats;
