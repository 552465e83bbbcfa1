//! The HTTP seam: one physical request in, one response out.
//!
//! [`Transport`] is deliberately narrow so the retry, envelope, and cache
//! layers can be exercised against a scripted implementation. The production
//! implementation is [`ReqwestTransport`].

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Method;
use tracing::trace;

use crate::error::{ApiError, Error};

/// Header names and values, names lowercased.
pub type Headers = BTreeMap<String, String>;

/// A fully prepared request, after default headers and encoding.
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    pub body: Option<serde_json::Value>,
    pub bearer: Option<String>,
    pub timeout: Duration,
}

impl WireRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// A response as received, body not yet interpreted.
#[derive(Debug, Clone)]
pub struct WireResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: String,
}

impl WireResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: body.into(),
        }
    }

    /// A response whose body is the serialized JSON value.
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self::new(status, body.to_string())
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Dispatches a single request. Implementations must report a timeout as
/// [`ApiError::Timeout`] and any failure without a response as
/// [`ApiError::Transport`]; error statuses are returned as responses.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: WireRequest) -> Result<WireResponse, ApiError>;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
///
/// Proxy settings come from the environment (reqwest's system proxy
/// support), responses are transparently gunzipped, and TLS certificates are
/// always verified.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a client identifying itself with the given user agent.
    pub fn new(user_agent: &str) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .gzip(true)
            .build()
            .map_err(|e| Error::Client(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: WireRequest) -> Result<WireResponse, ApiError> {
        let timeout = request.timeout;
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .timeout(timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let start = Instant::now();
        let resp = builder
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = resp
            .text()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        trace!(
            status,
            bytes = body.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "transport response"
        );

        Ok(WireResponse {
            status,
            headers,
            body,
        })
    }
}

fn map_reqwest_error(err: reqwest::Error, timeout: Duration) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout { timeout }
    } else {
        ApiError::transport(err.to_string())
    }
}
