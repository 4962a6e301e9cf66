//! Fixed-window rate limiting
//!
//! Windows are aligned to wall-clock boundaries (`now_ms / window_ms`), so
//! every limiter with the same window length rolls over at the same instant.
//! A burst straddling a boundary can see up to twice the nominal rate.
//!
//! The window index and the count are packed into one `AtomicU64` and
//! updated with a CAS loop, so [`FixedWindowLimiter::try_acquire`] never
//! blocks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::{Clock, SystemClock};

const COUNT_BITS: u32 = 32;
const COUNT_MASK: u64 = (1 << COUNT_BITS) - 1;

fn pack(window: u64, count: u64) -> u64 {
    (window << COUNT_BITS) | (count & COUNT_MASK)
}

fn unpack(state: u64) -> (u64, u64) {
    (state >> COUNT_BITS, state & COUNT_MASK)
}

/// Non-blocking fixed-window limiter for a single budget.
///
/// A limit of `0` means unlimited.
///
/// # Examples
///
/// ```rust
/// use tributary_common::resilience::{FixedWindowLimiter, MockClock};
///
/// let limiter = FixedWindowLimiter::per_minute(2, MockClock::new());
/// assert!(limiter.try_acquire());
/// assert!(limiter.try_acquire());
/// assert!(!limiter.try_acquire());
/// ```
pub struct FixedWindowLimiter<C: Clock = SystemClock> {
    limit: u64,
    window_ms: u64,
    state: AtomicU64,
    clock: Arc<C>,
}

impl<C: Clock> std::fmt::Debug for FixedWindowLimiter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (window, count) = unpack(self.state.load(Ordering::Acquire));
        f.debug_struct("FixedWindowLimiter")
            .field("limit", &self.limit)
            .field("window_ms", &self.window_ms)
            .field("window", &window)
            .field("count", &count)
            .finish()
    }
}

impl<C: Clock> FixedWindowLimiter<C> {
    /// Limiter with `limit` requests per wall-clock minute.
    pub fn per_minute(limit: u32, clock: C) -> Self {
        Self {
            limit: u64::from(limit),
            window_ms: 60_000,
            state: AtomicU64::new(0),
            clock: Arc::new(clock),
        }
    }

    /// Limiter under a new `limit` that keeps this one's window and count.
    pub fn with_limit(&self, limit: u32) -> Self {
        Self {
            limit: u64::from(limit),
            window_ms: self.window_ms,
            state: AtomicU64::new(self.state.load(Ordering::Acquire)),
            clock: Arc::clone(&self.clock),
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn is_unlimited(&self) -> bool {
        self.limit == 0
    }

    fn current_window(&self) -> u64 {
        (self.clock.millis_since_epoch() / self.window_ms) & (u64::MAX >> COUNT_BITS)
    }

    /// Take one slot from the current window.
    ///
    /// Returns `false` when the window's budget is spent.
    pub fn try_acquire(&self) -> bool {
        if self.is_unlimited() {
            return true;
        }

        let window = self.current_window();
        let mut current = self.state.load(Ordering::Acquire);

        loop {
            let (stored_window, count) = unpack(current);
            let count = if stored_window == window { count } else { 0 };

            if count >= self.limit {
                debug!(limit = self.limit, window, "rate limit: window budget exhausted");
                return false;
            }

            match self.state.compare_exchange_weak(
                current,
                pack(window, count + 1),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Slots left in the current window; `None` when unlimited.
    pub fn remaining(&self) -> Option<u64> {
        if self.is_unlimited() {
            return None;
        }
        let (stored_window, count) = unpack(self.state.load(Ordering::Acquire));
        let used = if stored_window == self.current_window() { count } else { 0 };
        Some(self.limit.saturating_sub(used))
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::resilience::MockClock;

    /// Validates that the budget is enforced within one window.
    ///
    /// Assertions:
    /// - Confirms `limit` acquisitions succeed and the next one fails.
    /// - Confirms `remaining` tracks consumption.
    #[test]
    fn test_limit_plus_one_is_rejected() {
        let limiter = FixedWindowLimiter::per_minute(3, MockClock::new());
        assert_eq!(limiter.remaining(), Some(3));

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.remaining(), Some(0));
    }

    /// Validates window rollover at the wall-clock minute boundary.
    ///
    /// Assertions:
    /// - Confirms the budget refills exactly at the next minute, not 60s after
    ///   the first request.
    #[test]
    fn test_window_aligned_to_minute_boundary() {
        let clock = MockClock::starting_at(Duration::from_secs(50));
        let limiter = FixedWindowLimiter::per_minute(1, clock.clone());

        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        clock.advance(Duration::from_secs(9));
        assert!(!limiter.try_acquire());

        clock.advance(Duration::from_secs(1));
        assert!(limiter.try_acquire());
    }

    /// Validates that a zero limit disables limiting.
    #[test]
    fn test_zero_limit_is_unlimited() {
        let limiter = FixedWindowLimiter::per_minute(0, MockClock::new());
        assert!((0..1_000).all(|_| limiter.try_acquire()));
        assert_eq!(limiter.remaining(), None);
    }

    /// Validates that changing the limit keeps the window's count.
    #[test]
    fn test_with_limit_keeps_count() {
        let limiter = FixedWindowLimiter::per_minute(2, MockClock::new());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());

        let raised = limiter.with_limit(3);
        assert_eq!(raised.remaining(), Some(1));
        assert!(raised.try_acquire());
        assert!(!raised.try_acquire());
    }

    /// Validates concurrent acquisition never over-admits.
    ///
    /// Assertions:
    /// - Confirms exactly `limit` of many concurrent attempts succeed.
    #[test]
    fn test_concurrent_acquire_respects_limit() {
        let limiter = Arc::new(FixedWindowLimiter::per_minute(50, MockClock::new()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                thread::spawn(move || (0..20).filter(|_| limiter.try_acquire()).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 50);
    }
}
