//! HTTP transport abstraction for testability.
//!
//! Catalog paging, payload transfers and preview fetches all go through the
//! [`HttpTransport`] trait so tests can script responses without a server.

use std::fmt;
use std::io::Read;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};

use super::error::TransportError;

/// Default timeout for HTTP requests in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300; // 5 minutes

const CLIENT_USER_AGENT: &str = concat!("civitai-fetch/", env!("CARGO_PKG_VERSION"));

/// A response whose body has not been read yet.
pub struct HttpResponse {
    /// HTTP status code of the final (post-redirect) response.
    pub status: u16,
    /// Value of the `Content-Length` header, if the server sent one.
    pub content_length: Option<u64>,
    body: Box<dyn Read + Send>,
}

impl HttpResponse {
    pub fn new(status: u16, content_length: Option<u64>, body: impl Read + Send + 'static) -> Self {
        Self {
            status,
            content_length,
            body: Box::new(body),
        }
    }

    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Mutable access to the body stream.
    pub fn body(&mut self) -> &mut (dyn Read + Send) {
        self.body.as_mut()
    }

    /// Read the whole body into memory.
    pub fn into_bytes(mut self) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.content_length.unwrap_or(0).min(1 << 20) as usize);
        self.body.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Trait for HTTP GET operations.
///
/// Implementations must follow redirects and report the final response.
pub trait HttpTransport: Send + Sync {
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;
}

/// Real transport implementation using reqwest.
///
/// Sends the API key as a bearer token on every request when one is set.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Create a transport with the default timeout.
    pub fn new(api_key: Option<&str>) -> Result<Self, TransportError> {
        Self::with_timeout(api_key, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a transport with a custom per-request timeout.
    pub fn with_timeout(api_key: Option<&str>, timeout: Duration) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| TransportError::Client(format!("invalid API key: {}", e)))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Client(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let response = self.client.get(url).send().map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    url: url.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                }
            } else {
                TransportError::Request {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        let content_length = response.content_length();
        Ok(HttpResponse::new(status, content_length, response))
    }
}
