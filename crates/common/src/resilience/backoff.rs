//! Exponential backoff and outcome classification
//!
//! Everything here is a pure function of its inputs. The fetcher asks
//! [`classify_status`] / [`classify_transport_error`] once per attempt and
//! [`BackoffPolicy`] whether and how long to wait before the next one.
//!
//! Attempts are counted from one: `attempts_made = 1` after the first HTTP
//! call. The delay before the n-th retry is `base_delay * 2^(n-1)`.

use std::time::Duration;

use tributary_domain::constants::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_SECS, RETRYABLE_STATUS_CODES,
};
use tributary_domain::{FetchOutcome, RetrySettings, TransportError};

use super::{ConfigError, ConfigResult};

/// Delay before retry number `retry` (zero-based), capped at `max_delay`.
///
/// `next_delay(0, 100ms, ..)` is 100ms, `next_delay(3, 100ms, ..)` is 800ms.
pub fn next_delay(retry: u32, base_delay: Duration, max_delay: Duration) -> Duration {
    2u32.checked_pow(retry)
        .and_then(|factor| base_delay.checked_mul(factor))
        .map_or(max_delay, |delay| delay.min(max_delay))
}

/// Whether another attempt is allowed after `attempts_made` attempts ended in
/// `outcome`.
pub fn should_retry(attempts_made: u32, max_attempts: u32, outcome: FetchOutcome) -> bool {
    outcome.is_retryable() && attempts_made < max_attempts
}

/// Classify an HTTP status code.
pub fn classify_status(status: u16) -> FetchOutcome {
    match status {
        200..=399 => FetchOutcome::Success,
        s if RETRYABLE_STATUS_CODES.contains(&s) => FetchOutcome::RetryableError,
        _ => FetchOutcome::FatalError,
    }
}

/// Classify a failure that happened before any status code was received.
pub fn classify_transport_error(error: &TransportError) -> FetchOutcome {
    match error {
        TransportError::Timeout => FetchOutcome::Timeout,
        TransportError::Connect(_) | TransportError::Reset(_) => FetchOutcome::RetryableError,
        TransportError::InvalidRequest(_) | TransportError::Other(_) => FetchOutcome::FatalError,
    }
}

/// Retry limits and delays for one fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
        }
    }
}

impl BackoffPolicy {
    /// Create a validated policy
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> ConfigResult<Self> {
        let policy = Self { max_attempts, base_delay, max_delay };
        policy.validate()?;
        Ok(policy)
    }

    /// Build a policy from the `retry` configuration section
    pub fn from_settings(settings: &RetrySettings) -> ConfigResult<Self> {
        Self::new(settings.max_attempts, settings.base_delay(), settings.max_delay())
    }

    /// Validate the policy
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts must be at least 1"));
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::invalid("max_delay must not be shorter than base_delay"));
        }
        Ok(())
    }

    /// Delay to wait after `attempts_made` failed attempts.
    pub fn delay_after(&self, attempts_made: u32) -> Duration {
        next_delay(attempts_made.saturating_sub(1), self.base_delay, self.max_delay)
    }

    /// See [`should_retry`].
    pub fn should_retry(&self, attempts_made: u32, outcome: FetchOutcome) -> bool {
        should_retry(attempts_made, self.max_attempts, outcome)
    }
}
