//! HTTP client abstraction for testability.
//!
//! The resilient caller depends on this trait rather than on reqwest
//! directly, so retry, breaker, and bulkhead behavior can be tested against
//! scripted responses without a network.

use super::error::CallError;
use super::OperationClass;
use async_trait::async_trait;
use std::time::Duration;

/// HTTP method subset the pipeline uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Put,
}

/// An outbound request, fully assembled by the provider layer.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self {
            method: Method::Patch,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self {
            method: Method::Put,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {}", token))
    }

    pub fn json_body(mut self, body: &impl serde::Serialize) -> Self {
        self.body = serde_json::to_vec(body).ok();
        self.header("Content-Type", "application/json")
    }
}

/// A response with enough structure for classification.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
    /// Parsed `Retry-After` header, if the provider sent one.
    pub retry_after: Option<Duration>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, CallError> {
        serde_json::from_slice(&self.body).map_err(|e| CallError::Unexpected {
            message: format!("malformed response body: {}", e),
        })
    }
}

/// Async HTTP transport.
///
/// Implementations return transport-level failures as [`CallError`] variants
/// (`Timeout` / `Transient`); HTTP status classification happens in the
/// caller, which sees the status on the response.
#[async_trait]
pub trait AsyncHttpClient: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, CallError>;
}

/// Production transport backed by reqwest.
///
/// One instance exists per operation class because the connection timeout is
/// fixed at client construction.
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Builds a client with the class's connection timeout. The overall
    /// deadline is enforced by the resilient caller, not here.
    pub fn for_class(class: OperationClass) -> Result<Self, CallError> {
        let client = reqwest::Client::builder()
            .connect_timeout(class.connect_timeout())
            .user_agent(concat!("reelforge/", env!("CARGO_PKG_VERSION")))
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| CallError::Unexpected {
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AsyncHttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, CallError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
            Method::Patch => self.client.patch(&request.url),
            Method::Put => self.client.put(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                CallError::Timeout {
                    elapsed: Duration::ZERO,
                }
            } else {
                CallError::Transient {
                    message: format!("request failed: {}", e),
                }
            }
        })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response
            .bytes()
            .await
            .map_err(|e| CallError::Transient {
                message: format!("failed to read response body: {}", e),
            })?
            .to_vec();

        Ok(HttpResponse {
            status,
            body,
            retry_after,
        })
    }
}
