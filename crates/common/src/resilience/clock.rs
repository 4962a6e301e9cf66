//! Time abstraction for testability
//!
//! Breakers and rate limiters read time through [`Clock`] so tests can move
//! time forward with [`MockClock`] instead of sleeping.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Source of monotonic and wall-clock time
pub trait Clock: Send + Sync + 'static {
    /// Get current instant (monotonic time)
    fn now(&self) -> Instant;

    /// Get current system time (wall clock)
    fn system_time(&self) -> SystemTime;

    /// Get milliseconds since UNIX epoch
    fn millis_since_epoch(&self) -> u64 {
        let millis = self.system_time().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        u64::try_from(millis).unwrap_or(u64::MAX)
    }
}

/// Real system clock implementation for production use
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }
}

/// Mock clock for deterministic testing
///
/// Clones share the same elapsed time, so a clock handed to a breaker can
/// still be advanced from the test body. Wall-clock time starts at
/// `UNIX_EPOCH + epoch_offset` and moves with [`MockClock::advance`].
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    epoch_offset: Duration,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a new mock clock whose wall time starts at the UNIX epoch
    pub fn new() -> Self {
        Self::starting_at(Duration::ZERO)
    }

    /// Create a mock clock whose wall time starts at `UNIX_EPOCH + offset`
    pub fn starting_at(epoch_offset: Duration) -> Self {
        Self { start: Instant::now(), epoch_offset, elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Advance the mock clock by a duration
    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }

    /// Advance the mock clock by milliseconds
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Set the mock clock to a specific elapsed time
    pub fn set_elapsed(&self, duration: Duration) {
        *self.elapsed.lock() = duration;
    }

    /// Get the current elapsed time
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        UNIX_EPOCH + self.epoch_offset + self.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates the system clock now scenario.
    ///
    /// Assertions:
    /// - Ensures successive readings never go backwards.
    /// - Ensures wall time is after the UNIX epoch.
    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock;
        let now1 = clock.now();
        let now2 = clock.now();
        assert!(now2 >= now1);
        assert!(clock.millis_since_epoch() > 0);
    }

    /// Validates that clones of a mock clock share elapsed time.
    ///
    /// Assertions:
    /// - Confirms an advance on one clone is visible on the other.
    /// - Confirms wall time follows the configured epoch offset.
    #[test]
    fn test_mock_clock_clones_share_time() {
        let clock = MockClock::starting_at(Duration::from_secs(120));
        let shared = clock.clone();
        let start = shared.now();

        clock.advance_millis(1_500);

        assert_eq!(shared.now().duration_since(start), Duration::from_millis(1_500));
        assert_eq!(shared.millis_since_epoch(), 121_500);
    }

    /// Validates `MockClock::set_elapsed`.
    ///
    /// Assertions:
    /// - Confirms the elapsed value is replaced, not accumulated.
    #[test]
    fn test_mock_clock_set_elapsed() {
        let clock = MockClock::new();
        clock.advance(Duration::from_secs(5));
        clock.set_elapsed(Duration::from_secs(2));
        assert_eq!(clock.elapsed(), Duration::from_secs(2));
        assert_eq!(clock.millis_since_epoch(), 2_000);
    }
}
