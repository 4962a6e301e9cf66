//! Integration tests for resilience patterns
//!
//! Drives the breaker, limiter and backoff policy together with a shared
//! `MockClock`, the way the resilient fetcher composes them.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tributary_common::resilience::{
    BackoffPolicy, CircuitBreaker, CircuitBreakerConfig, CircuitState, FixedWindowLimiter,
    MockClock,
};
use tributary_domain::FetchOutcome;

/// Verifies the full breaker lifecycle against a scripted upstream.
///
/// # Test Steps
/// 1. Five failures open the breaker
/// 2. Calls during the recovery timeout are rejected without reaching the
///    upstream
/// 3. After the timeout exactly one probe passes and its success closes the
///    breaker
#[test]
fn test_breaker_lifecycle_counts_upstream_calls() {
    let clock = MockClock::new();
    let breaker =
        CircuitBreaker::with_clock("upstream", CircuitBreakerConfig::default(), clock.clone())
            .unwrap();
    let mut upstream_calls = 0;

    for _ in 0..5 {
        let permit = breaker.try_acquire().unwrap();
        upstream_calls += 1;
        permit.failure();
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    for _ in 0..10 {
        if let Some(permit) = breaker.try_acquire() {
            upstream_calls += 1;
            permit.failure();
        }
    }
    assert_eq!(upstream_calls, 5, "open breaker must not let calls through");

    clock.advance(Duration::from_secs(30));
    let probe = breaker.try_acquire().unwrap();
    assert!(breaker.try_acquire().is_none());
    probe.success();

    assert_eq!(breaker.state(), CircuitState::Closed);
    let metrics = breaker.metrics();
    assert_eq!(metrics.rejected_calls, 11);
    assert_eq!(metrics.times_opened, 1);
}

/// Verifies only one thread wins the half-open probe.
#[test]
fn test_single_probe_under_contention() {
    let clock = MockClock::new();
    let config = CircuitBreakerConfig::builder().failure_threshold(1).build().unwrap();
    let breaker = Arc::new(CircuitBreaker::with_clock("contended", config, clock.clone()).unwrap());
    breaker.record_failure();
    clock.advance(Duration::from_secs(30));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let breaker = Arc::clone(&breaker);
            // Leak the permit so the probe slot stays taken.
            thread::spawn(move || breaker.try_acquire().map(std::mem::forget).is_some())
        })
        .collect();

    let winners = handles.into_iter().map(|h| h.join().unwrap()).filter(|won| *won).count();
    assert_eq!(winners, 1);
}

/// Verifies a limiter admits `limit` calls and rejects the rest of the window.
#[test]
fn test_limiter_rejects_over_budget() {
    let limiter = FixedWindowLimiter::per_minute(60, MockClock::new());
    let admitted = (0..61).filter(|_| limiter.try_acquire()).count();
    assert_eq!(admitted, 60);
}

/// Verifies the backoff schedule used for a flaky upstream: four 503s at a
/// 10ms base delay wait 150ms before the fifth attempt.
#[test]
fn test_backoff_schedule_for_flaky_upstream() {
    let policy = BackoffPolicy::new(5, Duration::from_millis(10), Duration::from_secs(30)).unwrap();
    let mut waited = Duration::ZERO;
    let mut attempts = 0;

    loop {
        attempts += 1;
        let outcome =
            if attempts <= 4 { FetchOutcome::RetryableError } else { FetchOutcome::Success };
        if !policy.should_retry(attempts, outcome) {
            assert_eq!(outcome, FetchOutcome::Success);
            break;
        }
        waited += policy.delay_after(attempts);
    }

    assert_eq!(attempts, 5);
    assert_eq!(waited, Duration::from_millis(150));
}
