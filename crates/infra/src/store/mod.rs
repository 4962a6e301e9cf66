//! Shared (L3) cache store implementations

pub mod memory;

pub use memory::{MemorySharedStore, DEFAULT_SHARED_STORE_CAPACITY};
