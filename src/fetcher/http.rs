//! reqwest-backed [`QueryTransport`]
//!
//! Sends `GET {base}/v3/company/{realm}/query?query=...&minorversion=N` with the
//! bearer token and reports the raw status, body and `Retry-After`. Retrying is
//! left to [`ResilientFetcher`](super::resilient::ResilientFetcher).

use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE, RETRY_AFTER};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::api_config::ApiConfig;
use super::{FetcherError, FetcherResult, QueryTransport, TransportResponse};

/// HTTP transport for the query endpoint
pub struct HttpQueryTransport {
    client: Arc<Client>,
    api: ApiConfig,
}

impl HttpQueryTransport {
    /// Create new transport
    ///
    /// # Arguments
    /// * `client` - Shared HTTP client (Arc for cheap cloning)
    /// * `api` - Endpoint, realm and minor version
    pub fn new(client: Arc<Client>, api: ApiConfig) -> Self {
        Self { client, api }
    }
}

#[async_trait]
impl QueryTransport for HttpQueryTransport {
    async fn send(
        &self,
        query: &str,
        access_token: &str,
        timeout: Duration,
    ) -> FetcherResult<TransportResponse> {
        let url = self.api.query_url();
        let minor_version = self.api.minor_version.to_string();

        debug!(url = %url, timeout_secs = timeout.as_secs(), "Sending query request");

        let response = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "text/plain")
            .query(&[("query", query), ("minorversion", minor_version.as_str())])
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_request_error(e, timeout))?;

        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers());
        let body = response
            .text()
            .await
            .map_err(|e| classify_request_error(e, timeout))?;

        Ok(TransportResponse {
            status,
            retry_after,
            body,
        })
    }

    fn endpoint(&self) -> String {
        self.api.query_url()
    }
}

fn classify_request_error(err: reqwest::Error, timeout: Duration) -> FetcherError {
    if err.is_timeout() {
        FetcherError::Timeout(timeout)
    } else {
        FetcherError::NetworkError(err.to_string())
    }
}

/// Parse a `Retry-After` header given in whole seconds
///
/// HTTP-date values are not used by the API and are ignored.
pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;

    match value.trim().parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(e) => {
            warn!("Failed to parse Retry-After header '{}': {}", value, e);
            None
        }
    }
}
