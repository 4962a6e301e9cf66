//! Counters and latency histograms for the aggregation pipeline

pub mod metrics;

pub use metrics::{AggregatorMetrics, BreakerTransitions, MetricsSnapshot};
