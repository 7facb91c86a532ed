//! HTTP fetcher capability
//!
//! The SDK never opens sockets itself. The host supplies a fetcher
//! implementing this trait; the API service layers headers, retries, and
//! circuit breaking on top of it. Fetch errors carry only the coarse
//! classification the retry matrix needs.

use crate::abort::AbortSignal;
use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;
use std::time::Duration;

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

impl HttpMethod {
    /// Canonical method name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

/// One HTTP request handed to the fetcher.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Request method.
    pub method: HttpMethod,
    /// Absolute URL.
    pub url: String,
    /// Header name/value pairs, in send order.
    pub headers: Vec<(String, String)>,
    /// Request body, when any.
    pub body: Option<Vec<u8>>,
    /// Per-request timeout the fetcher must enforce.
    pub timeout: Duration,
    /// Whether ambient credentials (cookies, auth headers managed by the
    /// host) may be attached. Block transfers set this to `false`.
    pub with_credentials: bool,
}

impl HttpRequest {
    /// Create a request with no headers and no body.
    pub fn new(method: HttpMethod, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout,
            with_credentials: true,
        }
    }

    /// Append a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach a body.
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }
}

/// A buffered HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Full response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Whether the status is in the 2xx class.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport-level failure, classified for the retry matrix.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The device is offline.
    #[error("offline")]
    Offline,
    /// The request exceeded its timeout.
    #[error("timed out")]
    Timeout,
    /// The abort token fired.
    #[error("aborted")]
    Aborted,
    /// Any other fetch exception.
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Streamed body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, FetchError>> + Send>>;

/// Response whose body is consumed as a stream.
pub struct StreamingResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Body chunks.
    pub body: ByteStream,
}

impl StreamingResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Host-supplied HTTP transport.
///
/// Implementations must propagate the abort signal to in-flight requests
/// and surface it as [`FetchError::Aborted`].
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    /// Perform a request and buffer the full response.
    async fn fetch(
        &self,
        request: HttpRequest,
        abort: &AbortSignal,
    ) -> Result<HttpResponse, FetchError>;

    /// Perform a request and expose the response body as a stream. Used for
    /// block downloads.
    async fn fetch_stream(
        &self,
        request: HttpRequest,
        abort: &AbortSignal,
    ) -> Result<StreamingResponse, FetchError>;
}
