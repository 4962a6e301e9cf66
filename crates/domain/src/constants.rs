//! Application constants
//!
//! Centralized location for the defaults used throughout Tributary.

// Tiered cache
pub const DEFAULT_L1_CAPACITY: usize = 1_000;
pub const DEFAULT_L1_TTL_SECS: u64 = 60;
pub const DEFAULT_L2_CAPACITY: usize = 2_000;
pub const DEFAULT_L2_TTL_SECS: u64 = 300;
pub const DEFAULT_L3_TTL_SECS: u64 = 900;
pub const DEFAULT_L3_TIMEOUT_MS: u64 = 250;
pub const DEFAULT_STALE_RETENTION_SECS: u64 = 3_600;
pub const DEFAULT_L3_NAMESPACE: &str = "tributary:";

// Circuit breaker
pub const DEFAULT_FAILURE_THRESHOLD: u64 = 5;
pub const DEFAULT_FAILURE_WINDOW_SECS: u64 = 60;
pub const DEFAULT_RECOVERY_TIMEOUT_SECS: u64 = 30;

// Retry / backoff
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 100;
pub const DEFAULT_MAX_DELAY_SECS: u64 = 30;

// Upstream sources
pub const DEFAULT_SOURCE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 60;

/// HTTP status codes that are worth retrying.
pub const RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

// Background maintenance
pub const DEFAULT_PURGE_INTERVAL_SECS: u64 = 60;
