//! Retry message formatting
//!
//! Classifies request failures and renders the retry, recovery and final-failure
//! log lines emitted by [`ResilientFetcher`](super::resilient::ResilientFetcher).

use std::time::Duration;

use super::FetcherError;

/// Classification of retry errors for user messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryErrorType {
    /// Request exceeded its timeout
    NetworkTimeout,
    /// Connection refused, DNS failure, or other offline scenarios
    NetworkOffline,
    /// HTTP 429 persisted past the in-attempt wait budget
    RateLimit,
    /// HTTP 5xx server error
    ServerError(u16),
    /// HTTP 400, usually a malformed query
    InvalidQuery,
    /// 401 that could not be healed by a refresh, or 403
    AuthFailed(u16),
    /// Other client errors (4xx)
    ClientError(u16),
    /// Body was not a JSON document
    MalformedBody,
    /// Breaker refused the request
    CircuitOpen,
    /// Generic fallback when no better classification fits
    NetworkGeneric,
}

impl RetryErrorType {
    /// Classify an HTTP status
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => Self::InvalidQuery,
            401 | 403 => Self::AuthFailed(status),
            429 => Self::RateLimit,
            500..=599 => Self::ServerError(status),
            400..=499 => Self::ClientError(status),
            _ => Self::NetworkGeneric,
        }
    }

    /// Classify a fetcher error
    pub fn from_error(err: &FetcherError) -> Self {
        match err {
            FetcherError::Timeout(_) => Self::NetworkTimeout,
            FetcherError::NetworkError(_) => Self::NetworkOffline,
            FetcherError::RateLimitExceeded => Self::RateLimit,
            FetcherError::AuthError(_) => Self::AuthFailed(401),
            FetcherError::ParseError(_) => Self::MalformedBody,
            FetcherError::InvalidConfig(_) => Self::InvalidQuery,
            FetcherError::CircuitOpen(_) => Self::CircuitOpen,
            FetcherError::HttpError(message) => parse_status(message)
                .map(Self::from_status)
                .unwrap_or(Self::NetworkGeneric),
            FetcherError::RetriesExhausted { .. } | FetcherError::MaxIterations(_) => {
                Self::NetworkGeneric
            }
        }
    }

    /// User-friendly description string used inside retry log messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "request timeout",
            Self::NetworkOffline => "connection failed",
            Self::RateLimit => "rate limit exceeded",
            Self::ServerError(code) => match code {
                500 => "internal server error",
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::InvalidQuery => "invalid query",
            Self::AuthFailed(code) => match code {
                401 => "authentication failed (401)",
                403 => "forbidden (403)",
                _ => "authentication failed",
            },
            Self::ClientError(code) => match code {
                404 => "resource not found",
                _ => "client error",
            },
            Self::MalformedBody => "malformed response body",
            Self::CircuitOpen => "circuit breaker open",
            Self::NetworkGeneric => "network error",
        }
    }

    /// Suggested remediation presented with actionable guidance after failures.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Large pages may need longer timeouts; try a smaller --page-size",
            Self::NetworkOffline => "Verify internet connectivity and DNS resolution",
            Self::RateLimit => "The API is throttling this realm; retry later or narrow --chunk-days",
            Self::ServerError(_) => "The API may be experiencing issues, try again later",
            Self::InvalidQuery => "Check the entity name and date range arguments",
            Self::AuthFailed(_) => "Verify client id, client secret and refresh token",
            Self::ClientError(_) => "Review the realm id and base URL",
            Self::MalformedBody => "Check that the base URL points at the query API",
            Self::CircuitOpen => "Too many consecutive failures; wait for the cool-down",
            Self::NetworkGeneric => "Check network connectivity and try again",
        }
    }

    /// Determine whether the error type is typically retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidQuery | Self::AuthFailed(_) | Self::ClientError(_)
        )
    }
}

/// Context for formatting retry messages.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Current attempt number (1-based)
    pub attempt: u32,
    /// Maximum number of attempts configured
    pub max_attempts: u32,
    /// Type of error that triggered retry
    pub error_type: RetryErrorType,
    /// Backoff duration until next attempt
    pub backoff_duration: Duration,
    /// Offset cursor of the page being fetched
    pub start_position: u32,
    /// Original error message for details
    pub error_message: String,
    /// URL or endpoint that failed
    pub endpoint: String,
}

impl RetryContext {
    /// Context for a failed attempt
    pub fn new(
        attempt: u32,
        max_attempts: u32,
        err: &FetcherError,
        start_position: u32,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            attempt,
            max_attempts,
            error_type: RetryErrorType::from_error(err),
            backoff_duration: Duration::ZERO,
            start_position,
            error_message: err.to_string(),
            endpoint: endpoint.into(),
        }
    }

    /// Set the wait before the next attempt
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff_duration = backoff;
        self
    }

    /// Format standardized retry message with attempt counters and context.
    pub fn format_retry(&self) -> String {
        format!(
            "Retrying (attempt {}/{}) after {} - waiting {:.1} seconds... (STARTPOSITION {})",
            self.attempt,
            self.max_attempts,
            self.error_type.description(),
            self.backoff_duration.as_secs_f64(),
            self.start_position
        )
    }

    /// Format retry success message when a previous attempt eventually works.
    pub fn format_success(&self) -> String {
        format!(
            "Retry attempt {}/{} succeeded (STARTPOSITION {})",
            self.attempt, self.max_attempts, self.start_position
        )
    }

    /// Format final failure summary with actionable suggestions.
    pub fn format_failure(&self) -> String {
        let mut lines = vec![
            format!("[FAILED] Page request failed after {} attempts", self.max_attempts),
            format!("  Last error: {}", self.error_message),
            format!("  Start position: {}", self.start_position),
            format!("  Endpoint: {}", self.endpoint),
            "  Suggestions:".to_string(),
        ];

        for suggestion in self.format_suggestions() {
            lines.push(format!("    - {suggestion}"));
        }

        lines.join("\n")
    }

    /// Derive suggestions tailored to the current retry context.
    pub fn format_suggestions(&self) -> Vec<String> {
        vec![
            self.error_type.suggestion().to_string(),
            format!(
                "Try increasing --max-attempts (current: {})",
                self.max_attempts
            ),
            "Re-run with --retry-failed-chunks or --force-chunks once the API recovers".to_string(),
        ]
    }
}

fn parse_status(message: &str) -> Option<u16> {
    message
        .split(|c: char| !c.is_ascii_digit())
        .find(|part| part.len() == 3)
        .and_then(|part| part.parse().ok())
}
