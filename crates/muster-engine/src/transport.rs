//! Outbound transport seam for talking to targets.
//!
//! The registry and proxy are written against the `TargetTransport`
//! trait so they can be exercised in tests without sockets; the shipped
//! implementation is `HttpTransport` over reqwest with a bounded
//! per-request timeout.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Errors from one outbound exchange with a target.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Connection failure or timeout. Transient: callers assume the
    /// target is unavailable, never that it is retired.
    #[error("Target unreachable: {0}")]
    Unreachable(String),

    /// The target answered with a non-success status.
    #[error("Target refused the request (HTTP {status})")]
    Rejected { status: u16 },

    /// The target answered with a body that could not be decoded.
    #[error("Invalid response from target: {0}")]
    InvalidResponse(String),

    /// The proxy refused to contact a locally retired target.
    #[error("Target is retired")]
    Retired,
}

/// HTTP method for a transport request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

/// One outbound request to a target.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl TransportRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Status and decoded body of a target's answer.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Value,
}

impl TransportResponse {
    /// True for any 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One-call-at-a-time transport to a single target.
#[async_trait]
pub trait TargetTransport: Send + Sync {
    /// Execute a request against the target this transport points at.
    ///
    /// Returns `Ok` for any answered request regardless of status code;
    /// `Err(Unreachable)` only for connection failures and timeouts.
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, ProxyError>;
}

/// reqwest-backed transport with a bounded timeout on every call.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport for one target base url.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl TargetTransport for HttpTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, ProxyError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };
        let url = format!("{}{}", self.base_url, request.path);

        debug!(method = ?request.method, url = %url, "Outbound target request");

        let mut builder = self.client.request(method, &url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProxyError::Unreachable(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ProxyError::InvalidResponse(e.to_string()))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        Ok(TransportResponse { status, body })
    }
}
