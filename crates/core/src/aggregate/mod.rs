//! Multi-source aggregation

pub mod service;

pub use service::{Aggregator, ResponseCache};
