//! Small helpers shared by the domain types.

pub mod serde;

pub use self::serde::{duration_millis, duration_secs};
