//! Retrying page fetcher
//!
//! One [`ResilientFetcher::fetch`] call spends up to `max_attempts` attempts on a
//! single page:
//! - a 429 waits `Retry-After` (default 60 s) and resends inside the same attempt
//! - a 401 refreshes the token once and resends inside the same attempt
//! - every other failure counts against the attempt budget and the circuit breaker
//!
//! Attempts after the first wait 1 s, 2 s, 4 s, 8 s... and get a longer timeout.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use super::api_config::paginated_query;
use super::circuit_breaker::CircuitBreaker;
use super::retry_formatter::{RetryContext, RetryErrorType};
use super::{FetcherError, FetcherResult, PageSource, QueryTransport};
use crate::auth::TokenRefresher;
use crate::ingest::config::{
    attempt_timeout, calculate_backoff, BASE_TIMEOUT_SECS, DEFAULT_RETRY_AFTER_SECS,
    MAX_ATTEMPTS, MAX_BREAKER_WAIT, MAX_RATE_LIMIT_WAITS,
};

/// Longest error body quoted in an error message
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Page fetcher with retries, backoff, token refresh and circuit breaking
pub struct ResilientFetcher {
    transport: Arc<dyn QueryTransport>,
    tokens: Arc<dyn TokenRefresher>,
    breaker: Arc<CircuitBreaker>,
    max_attempts: u32,
    base_timeout: Duration,
}

impl ResilientFetcher {
    /// Create a fetcher with the default attempt budget and timeout
    pub fn new(
        transport: Arc<dyn QueryTransport>,
        tokens: Arc<dyn TokenRefresher>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            transport,
            tokens,
            breaker,
            max_attempts: MAX_ATTEMPTS,
            base_timeout: Duration::from_secs(BASE_TIMEOUT_SECS),
        }
    }

    /// Override the attempt budget (at least one attempt is always made)
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Breaker shared with this fetcher
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Fetch one page document
    ///
    /// # Errors
    /// - [`FetcherError::CircuitOpen`] when the breaker refused the request
    /// - [`FetcherError::RetriesExhausted`] when every attempt failed
    pub async fn fetch(
        &self,
        query: &str,
        start_position: u32,
        max_results: u32,
    ) -> FetcherResult<Value> {
        if let Some(remaining) = self.breaker.remaining(Instant::now()) {
            let wait = remaining.min(MAX_BREAKER_WAIT);
            warn!(
                remaining_secs = remaining.as_secs(),
                wait_secs = wait.as_secs(),
                start_position,
                "[CIRCUIT BREAKER] Circuit open, request refused"
            );
            sleep(wait).await;
            return Err(FetcherError::CircuitOpen(remaining));
        }

        let paginated = paginated_query(query, start_position, max_results);
        let endpoint = self.transport.endpoint();
        let mut last_error: Option<FetcherError> = None;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                let backoff = calculate_backoff(attempt - 2);
                if let Some(err) = &last_error {
                    let ctx = RetryContext::new(attempt, self.max_attempts, err, start_position, &endpoint)
                        .with_backoff(backoff);
                    info!("{}", ctx.format_retry());
                }
                sleep(backoff).await;
            }

            let timeout = attempt_timeout(self.base_timeout, attempt);
            debug!(
                attempt,
                max_attempts = self.max_attempts,
                timeout_secs = timeout.as_secs(),
                start_position,
                max_results,
                consecutive_failures = self.breaker.consecutive_failures(),
                "Requesting page"
            );

            match self.attempt(&paginated, timeout).await {
                Ok(document) => {
                    if attempt > 1 {
                        if let Some(err) = &last_error {
                            let ctx = RetryContext::new(
                                attempt,
                                self.max_attempts,
                                err,
                                start_position,
                                &endpoint,
                            );
                            info!("{}", ctx.format_success());
                        }
                    }
                    self.breaker.record_success();
                    return Ok(document);
                }
                Err(err) => {
                    let consecutive_failures = self.breaker.record_failure();
                    let error_type = RetryErrorType::from_error(&err);
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        consecutive_failures,
                        error_type = error_type.description(),
                        retryable = error_type.is_retryable(),
                        error = %err,
                        "Page request failed"
                    );
                    last_error = Some(err);
                }
            }
        }

        let consecutive_failures = self.breaker.consecutive_failures();
        self.breaker.maybe_open(consecutive_failures);

        let last_error = last_error
            .unwrap_or_else(|| FetcherError::NetworkError("no attempt was made".to_string()));
        let ctx = RetryContext::new(
            self.max_attempts,
            self.max_attempts,
            &last_error,
            start_position,
            &endpoint,
        );
        error!("{}", ctx.format_failure());

        Err(FetcherError::RetriesExhausted {
            attempts: self.max_attempts,
            last_error: last_error.to_string(),
        })
    }

    /// One attempt: rate-limit waits and the single 401 refresh stay inside it
    async fn attempt(&self, query: &str, timeout: Duration) -> FetcherResult<Value> {
        let mut token = self.tokens.access_token();
        let mut refreshed = false;
        let mut rate_limit_waits = 0u32;

        loop {
            let response = self.transport.send(query, &token, timeout).await?;

            match response.status {
                429 => {
                    rate_limit_waits += 1;
                    if rate_limit_waits > MAX_RATE_LIMIT_WAITS {
                        return Err(FetcherError::RateLimitExceeded);
                    }
                    let wait = response
                        .retry_after
                        .unwrap_or(Duration::from_secs(DEFAULT_RETRY_AFTER_SECS));
                    warn!(
                        wait_secs = wait.as_secs(),
                        rate_limit_waits,
                        "Rate limited (429), waiting before resending"
                    );
                    sleep(wait).await;
                }
                401 if !refreshed => {
                    warn!("Access token rejected (401), refreshing");
                    refreshed = true;
                    token = self.tokens.refresh().await.ok_or_else(|| {
                        FetcherError::AuthError("token refresh failed after 401".to_string())
                    })?;
                }
                401 => {
                    return Err(FetcherError::AuthError(
                        "access token rejected after refresh".to_string(),
                    ));
                }
                status if !response.is_success() => {
                    return Err(FetcherError::HttpError(format!(
                        "status {}: {}",
                        status,
                        truncate(&response.body, MAX_ERROR_BODY_CHARS)
                    )));
                }
                _ => {
                    return serde_json::from_str(&response.body).map_err(|e| {
                        FetcherError::ParseError(format!("Failed to decode page document: {}", e))
                    });
                }
            }
        }
    }
}

#[async_trait]
impl PageSource for ResilientFetcher {
    async fn fetch_page(
        &self,
        query: &str,
        start_position: u32,
        max_results: u32,
    ) -> FetcherResult<Value> {
        self.fetch(query, start_position, max_results).await
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
