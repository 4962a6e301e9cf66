//! Port interface for outbound HTTP
//!
//! The fetcher never talks to the network directly; infrastructure supplies
//! a [`Transport`] and tests supply a scripted one.

use async_trait::async_trait;
use tributary_domain::{HttpRequest, HttpResponse, TransportError};

/// Sends one fully resolved HTTP request
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the request and return whatever status came back.
    ///
    /// Non-2xx statuses are responses, not errors. Errors are reserved for
    /// failures where no status exists (connect, reset, timeout, bad request).
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}
