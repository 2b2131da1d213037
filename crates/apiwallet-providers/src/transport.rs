//! The HTTP seam.
//!
//! Provider clients never touch `reqwest` directly; they hand a fully
//! signed [`HttpRequest`] to an [`HttpTransport`]. [`ReqwestTransport`] is
//! the real implementation, and tests substitute a recording fake.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::signer::Headers;

/// Timeout applied to every outbound request unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP method of a provider request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// A signed request ready to send.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: Headers,
    pub body: Option<Value>,
}

impl HttpRequest {
    /// Value of the first header named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status and raw body of a provider response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The body parsed as JSON, if it is JSON.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// A request that produced no HTTP response (connect failure, timeout,
/// unreadable body).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{reason}")]
pub struct TransportFailure {
    pub reason: String,
    pub timed_out: bool,
}

/// Sends one request and returns whatever status came back.
///
/// Implementations must not retry; callers own retry policy.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportFailure>;
}

// ---------------------------------------------------------------------------
// reqwest
// ---------------------------------------------------------------------------

/// [`HttpTransport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a client whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, TransportFailure> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("apiwallet/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportFailure {
                reason: format!("failed to build HTTP client: {e}"),
                timed_out: false,
            })?;
        Ok(Self { http })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportFailure> {
        let mut builder = match request.method {
            HttpMethod::Get => self.http.get(request.url.clone()),
            HttpMethod::Post => self.http.post(request.url.clone()),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = builder.header(reqwest::header::ACCEPT, "application/json");
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        tracing::debug!(method = request.method.as_str(), url = %request.url, "sending provider request");

        let response = builder.send().await.map_err(|e| TransportFailure {
            timed_out: e.is_timeout(),
            reason: e.to_string(),
        })?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| TransportFailure {
            timed_out: e.is_timeout(),
            reason: format!("failed to read response body: {e}"),
        })?;

        tracing::debug!(status, bytes = body.len(), "provider response received");
        Ok(HttpResponse { status, body })
    }
}
