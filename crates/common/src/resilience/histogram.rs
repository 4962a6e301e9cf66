//! Lock-free latency histogram
//!
//! Bucket `i` counts samples in `[2^i, 2^(i+1))` microseconds; bucket 0 also
//! holds zero-length samples. Percentiles are reported as the upper edge of
//! the bucket they fall into, clamped to the observed maximum.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

const NUM_BUCKETS: usize = 40;

/// Histogram for tracking latency measurements
///
/// Clones share the same buckets.
///
/// ```rust
/// use std::time::Duration;
///
/// use tributary_common::resilience::Histogram;
///
/// let histogram = Histogram::new();
/// histogram.record(Duration::from_millis(12));
/// assert_eq!(histogram.snapshot().count(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct Histogram {
    inner: Arc<HistogramInner>,
}

#[derive(Debug)]
struct HistogramInner {
    buckets: [AtomicU64; NUM_BUCKETS],
    count: AtomicU64,
    sum_micros: AtomicU64,
    max_micros: AtomicU64,
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HistogramInner {
                buckets: std::array::from_fn(|_| AtomicU64::new(0)),
                count: AtomicU64::new(0),
                sum_micros: AtomicU64::new(0),
                max_micros: AtomicU64::new(0),
            }),
        }
    }

    /// Record a duration measurement
    pub fn record(&self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        let inner = &self.inner;

        inner.buckets[bucket_for(micros)].fetch_add(1, Ordering::Relaxed);
        inner.count.fetch_add(1, Ordering::Relaxed);
        inner.sum_micros.fetch_add(micros, Ordering::Relaxed);
        inner.max_micros.fetch_max(micros, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.inner.count.load(Ordering::Relaxed)
    }

    /// Get a snapshot of current statistics
    pub fn snapshot(&self) -> HistogramSnapshot {
        let inner = &self.inner;
        HistogramSnapshot {
            buckets: std::array::from_fn(|i| inner.buckets[i].load(Ordering::Relaxed)),
            count: inner.count.load(Ordering::Relaxed),
            sum_micros: inner.sum_micros.load(Ordering::Relaxed),
            max_micros: inner.max_micros.load(Ordering::Relaxed),
        }
    }

    /// Reset all measurements
    pub fn reset(&self) {
        let inner = &self.inner;
        for bucket in &inner.buckets {
            bucket.store(0, Ordering::Relaxed);
        }
        inner.count.store(0, Ordering::Relaxed);
        inner.sum_micros.store(0, Ordering::Relaxed);
        inner.max_micros.store(0, Ordering::Relaxed);
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

fn bucket_for(micros: u64) -> usize {
    if micros == 0 {
        return 0;
    }
    (micros.ilog2() as usize).min(NUM_BUCKETS - 1)
}

fn bucket_upper_micros(bucket: usize) -> u64 {
    1u64.checked_shl(bucket as u32 + 1).unwrap_or(u64::MAX)
}

/// Immutable snapshot of histogram statistics
#[derive(Debug, Clone)]
pub struct HistogramSnapshot {
    buckets: [u64; NUM_BUCKETS],
    count: u64,
    sum_micros: u64,
    max_micros: u64,
}

impl HistogramSnapshot {
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> Option<Duration> {
        (self.count > 0).then(|| Duration::from_micros(self.sum_micros / self.count))
    }

    pub fn max(&self) -> Option<Duration> {
        (self.count > 0).then(|| Duration::from_micros(self.max_micros))
    }

    /// Latency below which fraction `p` (0.0 to 1.0) of samples fall
    pub fn percentile(&self, p: f64) -> Option<Duration> {
        if self.count == 0 || !(0.0..=1.0).contains(&p) {
            return None;
        }

        let rank = ((self.count as f64) * p).ceil().max(1.0) as u64;
        let mut seen = 0u64;
        for (idx, &n) in self.buckets.iter().enumerate() {
            seen += n;
            if seen >= rank {
                let micros = bucket_upper_micros(idx).min(self.max_micros);
                return Some(Duration::from_micros(micros));
            }
        }
        self.max()
    }

    /// Serializable summary in milliseconds
    pub fn summary(&self) -> LatencySummary {
        let ms = |d: Option<Duration>| d.map_or(0.0, |d| d.as_secs_f64() * 1_000.0);
        LatencySummary {
            count: self.count,
            mean_ms: ms(self.mean()),
            p50_ms: ms(self.percentile(0.50)),
            p95_ms: ms(self.percentile(0.95)),
            p99_ms: ms(self.percentile(0.99)),
            max_ms: ms(self.max()),
        }
    }
}

/// Latency percentiles for reporting
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencySummary {
    pub count: u64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates empty histograms report nothing.
    #[test]
    fn test_empty_snapshot() {
        let snapshot = Histogram::new().snapshot();
        assert_eq!(snapshot.count(), 0);
        assert!(snapshot.mean().is_none());
        assert!(snapshot.percentile(0.5).is_none());
        assert_eq!(snapshot.summary().p99_ms, 0.0);
    }

    /// Validates percentile ordering and bounds.
    ///
    /// Assertions:
    /// - Ensures p50 <= p95 <= p99 <= max.
    /// - Ensures p50 lands within a factor of two of the true median.
    #[test]
    fn test_percentiles_are_ordered() {
        let histogram = Histogram::new();
        for ms in 1..=100 {
            histogram.record(Duration::from_millis(ms));
        }
        let snapshot = histogram.snapshot();
        let p50 = snapshot.percentile(0.5).unwrap();
        let p95 = snapshot.percentile(0.95).unwrap();
        let p99 = snapshot.percentile(0.99).unwrap();

        assert!(p50 <= p95 && p95 <= p99);
        assert!(p99 <= snapshot.max().unwrap());
        assert!(p50 >= Duration::from_millis(25) && p50 <= Duration::from_millis(100));
        assert_eq!(snapshot.max(), Some(Duration::from_millis(100)));
    }

    /// Validates that clones share data and reset clears it.
    #[test]
    fn test_clone_shares_and_reset_clears() {
        let histogram = Histogram::new();
        let clone = histogram.clone();
        clone.record(Duration::from_micros(0));
        clone.record(Duration::from_secs(2));
        assert_eq!(histogram.count(), 2);

        histogram.reset();
        assert_eq!(clone.count(), 0);
    }
}
