//! Pluggable HTTP transport and bearer-token provider.
//!
//! The delivery core never talks to the network directly; it hands a fully
//! formed request to a [`Transport`] and inspects the returned status code.
//! Timeouts, connection pooling, and TLS are the transport's concern.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::TransportError;

/// An outbound HTTP request assembled by the delivery core.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: String,
    pub uri: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl TransportRequest {
    pub fn post<U: Into<String>, B: Into<String>>(uri: U, body: B) -> Self {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Self { method: "POST".to_string(), uri: uri.into(), headers, body: body.into() }
    }

    pub fn bearer<T: AsRef<str>>(mut self, token: T) -> Self {
        self.headers
            .insert("Authorization".to_string(), format!("Bearer {}", token.as_ref()));
        self
    }
}

/// The transport's view of the server reply.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status_code: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status_code: u16, body: impl Into<String>) -> Self {
        Self { status_code, body: body.into() }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Sends one request and returns the response.
///
/// Returning `Err` means the request never produced an HTTP status (network
/// failure, timeout). Non-2xx statuses come back as `Ok` responses.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// Supplies the bearer token set on each outbound request. Caching and
/// refresh are the provider's concern; the core calls it per request.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String, TransportError>;
}

/// Token provider holding a fixed token.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> Result<String, TransportError> {
        Ok(self.token.clone())
    }
}

/// In-memory transport for tests and examples.
///
/// Records every request and answers with a scripted sequence of status
/// codes, falling back to 200 once the script is exhausted. Clones share
/// state.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    script: Arc<Mutex<VecDeque<u16>>>,
    requests: Arc<Mutex<Vec<TransportRequest>>>,
}

impl MemoryTransport {
    /// A transport that always answers 200.
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that answers the given statuses in order, then 200.
    pub fn with_script<I: IntoIterator<Item = u16>>(statuses: I) -> Self {
        Self {
            script: Arc::new(Mutex::new(statuses.into_iter().collect())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(request);
        let status = self
            .script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or(200);
        Ok(TransportResponse::new(status, ""))
    }
}
