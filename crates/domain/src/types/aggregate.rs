//! Aggregated multi-source results

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::FetchError;
use crate::types::cache::CacheTier;
use crate::types::response::FetchedResponse;

/// What happened for one source inside an aggregate request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceOutcome {
    /// Fetched from upstream during this request.
    Fresh { value: Arc<FetchedResponse> },
    /// Served from a cache tier before its TTL ran out.
    Cached { value: Arc<FetchedResponse>, tier: CacheTier },
    /// An expired cached copy served in place of a fresh value.
    ///
    /// `error` is the fetch failure that forced the fallback; it is `None`
    /// when the copy was served while a background refresh runs.
    Stale { value: Arc<FetchedResponse>, error: Option<FetchError> },
    /// No value could be produced.
    Failed { error: FetchError },
}

impl SourceOutcome {
    pub fn value(&self) -> Option<&Arc<FetchedResponse>> {
        match self {
            SourceOutcome::Fresh { value }
            | SourceOutcome::Cached { value, .. }
            | SourceOutcome::Stale { value, .. } => Some(value),
            SourceOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&FetchError> {
        match self {
            SourceOutcome::Stale { error, .. } => error.as_ref(),
            SourceOutcome::Failed { error } => Some(error),
            _ => None,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, SourceOutcome::Stale { .. })
    }

    /// Collapse into a plain result, treating a stale copy as success.
    pub fn into_result(self) -> Result<Arc<FetchedResponse>, FetchError> {
        match self {
            SourceOutcome::Fresh { value }
            | SourceOutcome::Cached { value, .. }
            | SourceOutcome::Stale { value, .. } => Ok(value),
            SourceOutcome::Failed { error } => Err(error),
        }
    }
}

/// Coarse health of an aggregate result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataAvailability {
    /// Every source produced a value within its TTL.
    Fresh,
    /// At least one value is a stale fallback; none is missing.
    Stale,
    /// Some sources produced values, others failed without a fallback.
    Partial,
    /// No source produced anything.
    Unavailable,
}

/// Result of one logical request across one or more sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub key: String,
    pub per_source: BTreeMap<String, SourceOutcome>,
    pub merged_at: DateTime<Utc>,
    /// True when any source outcome is a stale fallback.
    pub stale: bool,
}

impl AggregateResult {
    pub fn new(
        key: impl Into<String>,
        per_source: BTreeMap<String, SourceOutcome>,
        merged_at: DateTime<Utc>,
    ) -> Self {
        let stale = per_source.values().any(SourceOutcome::is_stale);
        Self { key: key.into(), per_source, merged_at, stale }
    }

    pub fn value(&self, source_id: &str) -> Option<&Arc<FetchedResponse>> {
        self.per_source.get(source_id).and_then(SourceOutcome::value)
    }

    pub fn error(&self, source_id: &str) -> Option<&FetchError> {
        self.per_source.get(source_id).and_then(SourceOutcome::error)
    }

    /// The only outcome, when the request named exactly one source.
    pub fn single(&self) -> Option<&SourceOutcome> {
        match self.per_source.len() {
            1 => self.per_source.values().next(),
            _ => None,
        }
    }

    pub fn availability(&self) -> DataAvailability {
        let total = self.per_source.len();
        let with_value = self.per_source.values().filter(|o| o.value().is_some()).count();

        if with_value == 0 {
            DataAvailability::Unavailable
        } else if with_value < total {
            DataAvailability::Partial
        } else if self.stale {
            DataAvailability::Stale
        } else {
            DataAvailability::Fresh
        }
    }
}
