//! Error types used throughout Tributary
//!
//! Fetch failures are classified exactly once, at the fetcher boundary, into
//! [`FetchError`]. Callers match on the variant to decide whether a stale
//! cached value is worth serving; nothing downstream re-classifies them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Typed failure of a single upstream fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FetchError {
    /// Upstream rejected the request and retrying cannot help (4xx other than
    /// 429, malformed request).
    #[error("upstream '{source_id}' rejected the request (status {status:?}): {message}")]
    Fatal { source_id: String, status: Option<u16>, message: String },

    /// Every permitted attempt ended in a retryable failure.
    #[error("upstream '{source_id}' still failing after {attempts} attempts: {last_error}")]
    RetryableExhausted { source_id: String, attempts: u32, last_error: String },

    /// The final attempt exceeded the source timeout.
    #[error("upstream '{source_id}' timed out after {timeout_ms} ms")]
    Timeout { source_id: String, timeout_ms: u64 },

    /// The circuit breaker for this source is open; no request was sent.
    #[error("circuit open for upstream '{source_id}'")]
    CircuitOpen { source_id: String },

    /// The local request budget for this source is spent; no request was sent.
    #[error("rate limit of {limit_per_minute}/min exceeded for upstream '{source_id}'")]
    RateLimited { source_id: String, limit_per_minute: u32 },

    /// The caller cancelled the fetch before it completed.
    #[error("fetch from upstream '{source_id}' was cancelled")]
    Cancelled { source_id: String },
}

impl FetchError {
    /// Identifier of the upstream source the error belongs to.
    pub fn source_id(&self) -> &str {
        match self {
            FetchError::Fatal { source_id, .. }
            | FetchError::RetryableExhausted { source_id, .. }
            | FetchError::Timeout { source_id, .. }
            | FetchError::CircuitOpen { source_id }
            | FetchError::RateLimited { source_id, .. }
            | FetchError::Cancelled { source_id } => source_id,
        }
    }

    /// Stable label suitable for metrics and structured logs.
    pub fn label(&self) -> &'static str {
        match self {
            FetchError::Fatal { .. } => "fatal",
            FetchError::RetryableExhausted { .. } => "retryable_exhausted",
            FetchError::Timeout { .. } => "timeout",
            FetchError::CircuitOpen { .. } => "circuit_open",
            FetchError::RateLimited { .. } => "rate_limited",
            FetchError::Cancelled { .. } => "cancelled",
        }
    }

    /// Whether the request was refused locally, before any network call.
    pub fn is_short_circuit(&self) -> bool {
        matches!(self, FetchError::CircuitOpen { .. } | FetchError::RateLimited { .. })
    }
}

/// Errors raised by the shared (L3) cache tier.
///
/// These never fail a fetch: the tiered cache logs them and degrades to the
/// in-process tiers.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message", rename_all = "snake_case")]
pub enum CacheError {
    #[error("shared cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache entry could not be encoded or decoded: {0}")]
    Codec(String),
}

/// Low-level failure reported by a transport before any HTTP status exists.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message", rename_all = "snake_case")]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("connection reset: {0}")]
    Reset(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("transport error: {0}")]
    Other(String),
}

/// Top-level error type for Tributary
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum TributaryError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Tributary operations
pub type Result<T> = std::result::Result<T, TributaryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_exposes_source_and_label() {
        let err = FetchError::RateLimited { source_id: "coingecko".into(), limit_per_minute: 2 };
        assert_eq!(err.source_id(), "coingecko");
        assert_eq!(err.label(), "rate_limited");
        assert!(err.is_short_circuit());

        let err = FetchError::Timeout { source_id: "llama".into(), timeout_ms: 500 };
        assert_eq!(err.label(), "timeout");
        assert!(!err.is_short_circuit());
        assert_eq!(err.to_string(), "upstream 'llama' timed out after 500 ms");
    }

    #[test]
    fn fetch_error_serializes_with_type_tag() {
        let err = FetchError::CircuitOpen { source_id: "velo".into() };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "circuit_open");
        assert_eq!(json["source_id"], "velo");
    }

    #[test]
    fn tributary_error_wraps_fetch_error_transparently() {
        let inner = FetchError::Cancelled { source_id: "a".into() };
        let err: TributaryError = inner.clone().into();
        assert_eq!(err.to_string(), inner.to_string());
    }
}
