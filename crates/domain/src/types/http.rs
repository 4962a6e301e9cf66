//! Transport-level request and response values

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::TransportError;
use crate::types::source::{FetchRequest, HttpMethod, UpstreamSource};

/// A fully resolved HTTP request, ready to hand to a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
    #[serde(with = "crate::utils::duration_millis")]
    pub timeout: Duration,
}

impl HttpRequest {
    /// Resolve a logical request against its source.
    ///
    /// A JSON body is only encoded for `POST` sources and adds a
    /// `content-type: application/json` header unless the source already set
    /// one.
    ///
    /// # Errors
    /// Returns `TransportError::InvalidRequest` when the body cannot be encoded.
    pub fn from_source(
        source: &UpstreamSource,
        request: &FetchRequest,
    ) -> Result<Self, TransportError> {
        let mut headers = source.headers().clone();
        let body = match (source.method(), &request.body) {
            (HttpMethod::Post, Some(body)) => {
                let bytes = serde_json::to_vec(body)
                    .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
                if !headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
                    headers.insert("content-type".into(), "application/json".into());
                }
                Some(bytes)
            }
            _ => None,
        };

        Ok(Self {
            method: source.method(),
            url: source.url_for(request.path.as_deref()),
            headers,
            query: request.params.clone(),
            body,
            timeout: source.timeout(),
        })
    }
}

/// Raw response returned by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self { status, content_type: None, body: body.into() }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded lossily as UTF-8, for error messages and text payloads.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn get_requests_carry_params_but_no_body() {
        let source = UpstreamSource::builder("a", "https://api.example.com")
            .header("x-api-key", "k")
            .build()
            .unwrap();
        let request =
            FetchRequest::new().with_path("prices").param("ids", "btc").with_body(json!({"a": 1}));

        let http = HttpRequest::from_source(&source, &request).unwrap();
        assert_eq!(http.method, HttpMethod::Get);
        assert_eq!(http.url, "https://api.example.com/prices");
        assert_eq!(http.query.get("ids").map(String::as_str), Some("btc"));
        assert!(http.body.is_none());
        assert_eq!(http.headers.get("x-api-key").map(String::as_str), Some("k"));
        assert_eq!(http.timeout, source.timeout());
    }

    #[test]
    fn post_requests_encode_json_body() {
        let source = UpstreamSource::builder("a", "https://api.example.com")
            .method(HttpMethod::Post)
            .build()
            .unwrap();
        let request = FetchRequest::new().with_body(json!({"query": "{ pools }"}));

        let http = HttpRequest::from_source(&source, &request).unwrap();
        assert_eq!(http.method, HttpMethod::Post);
        assert_eq!(http.body.as_deref(), Some(br#"{"query":"{ pools }"}"#.as_slice()));
        assert_eq!(http.headers.get("content-type").map(String::as_str), Some("application/json"));
    }

    #[test]
    fn response_success_range() {
        assert!(HttpResponse::new(200, "ok").is_success());
        assert!(HttpResponse::new(204, "").is_success());
        assert!(!HttpResponse::new(301, "").is_success());
        assert!(!HttpResponse::new(503, "").is_success());
    }
}
