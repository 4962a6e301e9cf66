use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Client as ReqwestClient, Method};
use tracing::debug;
use tributary_core::Transport;
use tributary_domain::{HttpMethod, HttpRequest, HttpResponse, TransportError, TributaryError};

const DEFAULT_USER_AGENT: &str = concat!("tributary/", env!("CARGO_PKG_VERSION"));

/// [`Transport`] backed by a pooled reqwest client.
///
/// Sends exactly one request per call. Retries, backoff and breaking belong
/// to the fetcher; the per-request timeout comes from the source.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: ReqwestClient,
}

impl HttpTransport {
    /// Start building a new HTTP transport.
    pub fn builder() -> HttpTransportBuilder {
        HttpTransportBuilder::default()
    }

    /// Convenience constructor with default configuration.
    pub fn new() -> Result<Self, TributaryError> {
        Self::builder().build()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = match request.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        };

        let mut builder = self.client.request(method, &request.url).timeout(request.timeout);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        debug!(method = request.method.as_str(), url = %request.url, "sending HTTP request");
        let response = builder.send().await.map_err(map_error)?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(map_error)?;
        debug!(url = %request.url, status, bytes = body.len(), "received HTTP response");

        Ok(HttpResponse { status, content_type, body: body.to_vec() })
    }
}

/// Builder for [`HttpTransport`].
#[derive(Debug)]
pub struct HttpTransportBuilder {
    connect_timeout: Duration,
    pool_idle_timeout: Duration,
    user_agent: String,
    default_headers: Option<HeaderMap>,
}

impl Default for HttpTransportBuilder {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            pool_idle_timeout: Duration::from_secs(90),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            default_headers: None,
        }
    }
}

impl HttpTransportBuilder {
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = timeout;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    /// Headers sent with every request, beneath each source's own headers
    pub fn default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = Some(headers);
        self
    }

    pub fn build(self) -> Result<HttpTransport, TributaryError> {
        let mut builder = ReqwestClient::builder()
            .connect_timeout(self.connect_timeout)
            .pool_idle_timeout(self.pool_idle_timeout)
            .user_agent(self.user_agent)
            .no_proxy();

        if let Some(headers) = self.default_headers {
            builder = builder.default_headers(headers);
        }

        let client = builder
            .build()
            .map_err(|e| TributaryError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(HttpTransport { client })
    }
}

fn map_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout;
    }
    if err.is_builder() {
        return TransportError::InvalidRequest(err.to_string());
    }
    if err.is_connect() {
        return TransportError::Connect(err.to_string());
    }
    if err.is_request() || err.is_body() {
        return TransportError::Reset(err.to_string());
    }
    TransportError::Other(err.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::net::TcpListener;

    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn request(method: HttpMethod, url: String) -> HttpRequest {
        HttpRequest {
            method,
            url,
            headers: BTreeMap::new(),
            query: BTreeMap::new(),
            body: None,
            timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn sends_query_and_headers_and_reads_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/simple/price"))
            .and(query_param("ids", "bitcoin"))
            .and(header("x-api-key", "secret"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_string(r#"{"bitcoin":{"usd":1}}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new().expect("transport");
        let mut req = request(HttpMethod::Get, format!("{}/simple/price", server.uri()));
        req.query.insert("ids".into(), "bitcoin".into());
        req.headers.insert("x-api-key".into(), "secret".into());

        let response = transport.send(req).await.expect("response");
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type.as_deref(), Some("application/json"));
        assert_eq!(response.body_text(), r#"{"bitcoin":{"usd":1}}"#);
    }

    #[tokio::test]
    async fn posts_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string(r#"{"query":"{ pools }"}"#))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new().expect("transport");
        let mut req = request(HttpMethod::Post, server.uri());
        req.body = Some(br#"{"query":"{ pools }"}"#.to_vec());

        let response = transport.send(req).await.expect("response");
        assert_eq!(response.status, 200);
        assert_eq!(response.body_text(), "ok");
    }

    #[tokio::test]
    async fn error_statuses_are_returned_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new().expect("transport");
        let response = transport.send(request(HttpMethod::Get, server.uri())).await.expect("response");

        assert_eq!(response.status, 503);
        assert_eq!(response.body_text(), "maintenance");
    }

    #[tokio::test]
    async fn slow_responses_map_to_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let transport = HttpTransport::new().expect("transport");
        let mut req = request(HttpMethod::Get, server.uri());
        req.timeout = Duration::from_millis(50);

        let err = transport.send(req).await.unwrap_err();
        assert_eq!(err, TransportError::Timeout);
    }

    #[tokio::test]
    async fn refused_connections_map_to_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new().expect("transport");
        let err = transport.send(request(HttpMethod::Get, format!("http://{addr}"))).await.unwrap_err();

        assert!(matches!(err, TransportError::Connect(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn invalid_headers_map_to_invalid_request() {
        let transport = HttpTransport::new().expect("transport");
        let mut req = request(HttpMethod::Get, "http://127.0.0.1:9".into());
        req.headers.insert("bad header".into(), "v".into());

        let err = transport.send(req).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidRequest(_)), "got {err:?}");
    }
}
