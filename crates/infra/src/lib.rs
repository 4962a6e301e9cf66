//! # Tributary Infrastructure
//!
//! Infrastructure implementations of the core ports, plus runtime wiring.
//!
//! This crate contains:
//! - HTTP transport over reqwest
//! - In-process shared (L3) cache store over moka
//! - Configuration loading from environment variables and files
//! - Tracing subscriber setup
//! - [`TributaryContext`], which assembles the whole pipeline from a config
//!
//! ## Architecture
//! - Implements traits defined in `tributary-core`
//! - Depends on `tributary-common`, `tributary-domain` and `tributary-core`
//! - Contains all "impure" code (network, global subscriber, filesystem)

pub mod config;
pub mod context;
pub mod http;
pub mod observability;
pub mod store;

// Re-export commonly used items
pub use context::TributaryContext;
pub use http::{HttpTransport, HttpTransportBuilder};
pub use observability::init_tracing;
pub use store::MemorySharedStore;
