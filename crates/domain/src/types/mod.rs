//! Data types shared across the aggregation pipeline

pub mod aggregate;
pub mod cache;
pub mod fetch;
pub mod http;
pub mod response;
pub mod source;

pub use aggregate::{AggregateResult, DataAvailability, SourceOutcome};
pub use cache::{CacheEntry, CacheTier};
pub use fetch::{FetchAttempt, FetchOutcome};
pub use http::{HttpRequest, HttpResponse};
pub use response::{CsvTable, FetchedResponse, ParsedResponse, ResponseFormat};
pub use source::{FetchRequest, HttpMethod, UpstreamSource, UpstreamSourceBuilder};
