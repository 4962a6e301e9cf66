//! Per-attempt fetch bookkeeping

use serde::{Deserialize, Serialize};

/// Classification of a single HTTP attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchOutcome {
    Success,
    RetryableError,
    FatalError,
    Timeout,
}

impl FetchOutcome {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchOutcome::RetryableError | FetchOutcome::Timeout)
    }
}

/// Record of one HTTP attempt. Used for logging and backoff only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchAttempt {
    /// Zero-based attempt index.
    pub attempt_number: u32,
    pub started_at_ms: u64,
    pub duration_ms: u64,
    pub outcome: FetchOutcome,
}
