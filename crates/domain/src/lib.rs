//! # Tributary Domain
//!
//! Data model shared by every Tributary crate.
//!
//! This crate contains:
//! - Upstream source descriptions and fetch requests
//! - Parsed response payloads and aggregate results
//! - The fetch/cache error taxonomy and `Result` alias
//! - Configuration structures and defaults
//!
//! ## Architecture
//! - No dependencies on other Tributary crates
//! - Only external dependencies allowed
//! - Pure data structures, no I/O

pub mod config;
pub mod constants;
pub mod errors;
pub mod types;
pub mod utils;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
