//! Shared cache store backed by moka
//!
//! Holds raw bytes with a per-entry TTL. Sharing one instance between several
//! tiered caches in a process gives them a common L3; a networked store would
//! implement the same [`SharedStore`] port.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use tracing::debug;
use tributary_common::cache::KeyPattern;
use tributary_core::SharedStore;
use tributary_domain::CacheError;

/// Default max capacity for the shared store (10k entries)
pub const DEFAULT_SHARED_STORE_CAPACITY: u64 = 10_000;

#[derive(Debug, Clone)]
struct StoredBytes {
    bytes: Arc<[u8]>,
    ttl: Duration,
}

/// Expires each entry after the TTL it was written with
struct PerEntryTtl;

impl Expiry<String, StoredBytes> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredBytes,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredBytes,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process [`SharedStore`].
///
/// Never fails; TTLs are enforced by moka against the real clock, so tests
/// that pause tokio time cannot expire entries here.
#[derive(Clone)]
pub struct MemorySharedStore {
    cache: Cache<String, StoredBytes>,
}

impl std::fmt::Debug for MemorySharedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySharedStore")
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}

impl Default for MemorySharedStore {
    fn default() -> Self {
        Self::new(DEFAULT_SHARED_STORE_CAPACITY)
    }
}

impl MemorySharedStore {
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder().max_capacity(max_capacity).expire_after(PerEntryTtl).build();
        Self { cache }
    }

    /// Entry count after pending evictions have been applied
    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}

#[async_trait]
impl SharedStore for MemorySharedStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.cache.get(key).await.map(|stored| stored.bytes.to_vec()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            self.cache.invalidate(key).await;
            return Ok(());
        }
        self.cache.insert(key.to_string(), StoredBytes { bytes: value.into(), ttl }).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.cache.remove(key).await.is_some())
    }

    async fn invalidate_matching(&self, pattern: &KeyPattern) -> Result<usize, CacheError> {
        let prefix = pattern.literal_prefix();
        let matching: Vec<Arc<String>> = self
            .cache
            .iter()
            .filter(|(key, _)| key.starts_with(prefix) && pattern.is_match(key))
            .map(|(key, _)| key)
            .collect();

        let mut removed = 0;
        for key in matching {
            if self.cache.remove(key.as_str()).await.is_some() {
                removed += 1;
            }
        }
        debug!(pattern = pattern.as_str(), removed, "invalidated shared store keys");
        Ok(removed)
    }
}
