//! Query API fetching
//!
//! Layers, innermost first:
//! - [`QueryTransport`]: sends one query with a bearer token and reports status, body
//!   and `Retry-After` ([`http::HttpQueryTransport`] in production)
//! - [`resilient::ResilientFetcher`]: retries, backoff, escalating timeouts, 429 waits,
//!   401 token refresh and the shared [`circuit_breaker::CircuitBreaker`]
//! - [`pagination::PaginationWalker`]: walks one chunk page by page into rows

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

pub mod api_config;
pub mod circuit_breaker;
pub mod http;
pub mod pagination;
pub mod resilient;
pub mod retry_formatter;
pub mod shared_resources;

/// Fetcher errors
#[derive(Debug, thiserror::Error)]
pub enum FetcherError {
    /// Non-success HTTP status
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Response body was not the expected JSON document
    #[error("parse error: {0}")]
    ParseError(String),

    /// Connection-level failure
    #[error("network error: {0}")]
    NetworkError(String),

    /// Request exceeded its timeout
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Credentials rejected and could not be refreshed
    #[error("authorization failed: {0}")]
    AuthError(String),

    /// Too many consecutive 429 responses inside one attempt
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    /// Circuit breaker is open; no request was sent
    #[error("circuit breaker open, {0:?} of cool-down remaining")]
    CircuitOpen(Duration),

    /// Every attempt failed
    #[error("all {attempts} attempts failed, last error: {last_error}")]
    RetriesExhausted {
        /// Attempts spent
        attempts: u32,
        /// Message of the final failure
        last_error: String,
    },

    /// Page request cannot be built from the configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Pagination loop hit its safety cap
    #[error("max pagination iterations ({0}) exceeded")]
    MaxIterations(usize),
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetcherError>;

/// Raw outcome of one HTTP exchange with the query endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code
    pub status: u16,
    /// Parsed `Retry-After` header, if any
    pub retry_after: Option<Duration>,
    /// Response body as text
    pub body: String,
}

impl TransportResponse {
    /// Convenience constructor for a response without `Retry-After`
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one query to the remote API.
///
/// Connection failures and timeouts are returned as `Err`; every HTTP status,
/// including errors, comes back as `Ok(TransportResponse)` so the caller decides.
#[async_trait]
pub trait QueryTransport: Send + Sync {
    /// Send `query` with the given bearer token, giving up after `timeout`
    async fn send(
        &self,
        query: &str,
        access_token: &str,
        timeout: Duration,
    ) -> FetcherResult<TransportResponse>;

    /// Endpoint the transport talks to, for log context
    fn endpoint(&self) -> String;
}

/// Something that can produce one page document for a paginated query
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch the page starting at `start_position` (1-based) of `query`
    async fn fetch_page(
        &self,
        query: &str,
        start_position: u32,
        max_results: u32,
    ) -> FetcherResult<Value>;
}
