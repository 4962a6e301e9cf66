//! Upstream source descriptions and logical fetch requests

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_RATE_LIMIT_PER_MINUTE, DEFAULT_SOURCE_TIMEOUT_MS};
use crate::errors::{Result, TributaryError};
use crate::utils::duration_millis;

/// HTTP method used to reach an upstream source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// An external HTTP data provider.
///
/// Identity is the `id`. Fields are private so a source cannot change after
/// construction; use [`UpstreamSource::builder`] or deserialize one from
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamSource {
    id: String,
    base_url: String,
    #[serde(default = "default_rate_limit")]
    rate_limit_per_minute: u32,
    #[serde(rename = "timeout_ms", with = "duration_millis", default = "default_timeout")]
    timeout: Duration,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    method: HttpMethod,
}

fn default_rate_limit() -> u32 {
    DEFAULT_RATE_LIMIT_PER_MINUTE
}

fn default_timeout() -> Duration {
    Duration::from_millis(DEFAULT_SOURCE_TIMEOUT_MS)
}

impl UpstreamSource {
    /// Start building a source with the given id and base URL.
    pub fn builder(id: impl Into<String>, base_url: impl Into<String>) -> UpstreamSourceBuilder {
        UpstreamSourceBuilder {
            source: UpstreamSource {
                id: id.into(),
                base_url: base_url.into(),
                rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
                timeout: default_timeout(),
                headers: BTreeMap::new(),
                method: HttpMethod::Get,
            },
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Request budget per minute; `0` disables local rate limiting.
    pub fn rate_limit_per_minute(&self) -> u32 {
        self.rate_limit_per_minute
    }

    /// Upper bound for a single HTTP attempt.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// Resolve the URL for an optional path relative to `base_url`.
    pub fn url_for(&self, path: Option<&str>) -> String {
        match path.map(str::trim).filter(|p| !p.is_empty()) {
            None => self.base_url.clone(),
            Some(path) => format!(
                "{}/{}",
                self.base_url.trim_end_matches('/'),
                path.trim_start_matches('/')
            ),
        }
    }

    /// Validate the source description.
    ///
    /// # Errors
    /// Returns `TributaryError::Config` for an empty id, a base URL that is not
    /// http(s), or a zero timeout.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(TributaryError::Config("source id must not be empty".into()));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(TributaryError::Config(format!(
                "source '{}' base_url must start with http:// or https://",
                self.id
            )));
        }
        if self.timeout.is_zero() {
            return Err(TributaryError::Config(format!(
                "source '{}' timeout must be greater than zero",
                self.id
            )));
        }
        Ok(())
    }
}

/// Builder for [`UpstreamSource`]
#[derive(Debug, Clone)]
pub struct UpstreamSourceBuilder {
    source: UpstreamSource,
}

impl UpstreamSourceBuilder {
    pub fn rate_limit_per_minute(mut self, limit: u32) -> Self {
        self.source.rate_limit_per_minute = limit;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.source.timeout = timeout;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.source.headers.insert(name.into(), value.into());
        self
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.source.method = method;
        self
    }

    /// Validate and build the source.
    ///
    /// # Errors
    /// See [`UpstreamSource::validate`].
    pub fn build(self) -> Result<UpstreamSource> {
        self.source.validate()?;
        Ok(self.source)
    }
}

/// The logical request sent to one source.
///
/// Parameters are kept in a `BTreeMap`, so iteration order (and therefore
/// the query string and the cache key) never depends on insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub path: Option<String>,
    pub params: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
}

impl FetchRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params = params;
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}
