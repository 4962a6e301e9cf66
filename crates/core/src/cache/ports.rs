//! Port interface for the shared (L3) cache tier

use std::time::Duration;

use async_trait::async_trait;
use tributary_common::cache::KeyPattern;
use tributary_domain::CacheError;

/// Byte-oriented key/value store shared between processes
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Fetch the raw bytes stored under `key`
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `value` under `key`, expiring after `ttl`
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Remove `key`; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Remove every key matching `pattern`.
    ///
    /// Stores that cannot enumerate keys keep the default, which removes
    /// nothing; their entries age out through TTL instead.
    async fn invalidate_matching(&self, pattern: &KeyPattern) -> Result<usize, CacheError> {
        let _ = pattern;
        Ok(0)
    }
}
