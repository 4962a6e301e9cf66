//! Test doubles for the core ports
//!
//! Available to this crate's tests and, with the `test-utils` feature, to
//! downstream crates.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tributary_common::cache::KeyPattern;
use tributary_domain::{CacheError, HttpRequest, HttpResponse, TransportError};

use crate::cache::ports::SharedStore;
use crate::fetch::ports::Transport;

type Scripted = Result<HttpResponse, TransportError>;

/// Transport that replays scripted responses in order.
///
/// Once the script runs out, the fallback (if any) answers every call;
/// without one, calls fail with `TransportError::Other`.
#[derive(Debug, Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Option<Scripted>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport that always answers `200` with `body` as JSON
    pub fn always_json(body: &str) -> Self {
        Self::new().with_fallback(Ok(json_response(200, body)))
    }

    /// Transport that always answers with `status`
    pub fn always_status(status: u16) -> Self {
        Self::new().with_fallback(Ok(HttpResponse::new(status, Vec::new())))
    }

    pub fn with_fallback(mut self, response: Scripted) -> Self {
        self.fallback = Some(response);
        self
    }

    /// Sleep for `delay` before answering each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, response: Scripted) -> &Self {
        self.script.lock().push_back(response);
        self
    }

    pub fn push_status(&self, status: u16) -> &Self {
        self.push(Ok(HttpResponse::new(status, Vec::new())))
    }

    pub fn push_json(&self, status: u16, body: &str) -> &Self {
        self.push(Ok(json_response(status, body)))
    }

    pub fn push_error(&self, error: TransportError) -> &Self {
        self.push(Err(error))
    }

    /// Number of calls that reached the transport
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.script.lock().pop_front();
        match scripted.or_else(|| self.fallback.clone()) {
            Some(response) => response,
            None => Err(TransportError::Other("no scripted response left".into())),
        }
    }
}

pub fn json_response(status: u16, body: &str) -> HttpResponse {
    HttpResponse::new(status, body.as_bytes().to_vec()).with_content_type("application/json")
}

/// Shared store backed by a plain map, with optional artificial latency.
///
/// Entries are kept until deleted; TTLs are recorded but not enforced.
#[derive(Debug, Default)]
pub struct InMemorySharedStore {
    entries: Mutex<HashMap<String, (Vec<u8>, Duration)>>,
    delay: Option<Duration>,
}

impl InMemorySharedStore {
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        self.entries.lock().get(key).map(|(_, ttl)| *ttl)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl SharedStore for InMemorySharedStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.pause().await;
        Ok(self.entries.lock().get(key).map(|(bytes, _)| bytes.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.pause().await;
        self.entries.lock().insert(key.to_string(), (value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.pause().await;
        Ok(self.entries.lock().remove(key).is_some())
    }

    async fn invalidate_matching(&self, pattern: &KeyPattern) -> Result<usize, CacheError> {
        self.pause().await;
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| !pattern.is_match(key));
        Ok(before - entries.len())
    }
}

/// Shared store whose every call fails with `CacheError::Unavailable`
#[derive(Debug, Default)]
pub struct FailingSharedStore {
    pub calls: AtomicUsize,
}

impl FailingSharedStore {
    fn fail<T>(&self) -> Result<T, CacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Unavailable("connection refused".into()))
    }
}

#[async_trait]
impl SharedStore for FailingSharedStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.fail()
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
        self.fail()
    }

    async fn delete(&self, _key: &str) -> Result<bool, CacheError> {
        self.fail()
    }

    async fn invalidate_matching(&self, _pattern: &KeyPattern) -> Result<usize, CacheError> {
        self.fail()
    }
}
