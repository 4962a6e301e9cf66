//! Resilient fetching from upstream sources

pub mod parse;
pub mod ports;
pub mod registry;
pub mod service;

pub use parse::parse_body;
pub use ports::Transport;
pub use registry::{BreakerRegistry, SourceRateLimiter};
pub use service::ResilientFetcher;
