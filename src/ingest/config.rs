//! Ingestion tunables: retry budget, timeouts, backoff and circuit breaker thresholds

use std::time::Duration;

/// Attempts per page request before the page is given up on.
pub const MAX_ATTEMPTS: u32 = 5;

/// Request timeout for the first attempt, in seconds.
pub const BASE_TIMEOUT_SECS: u64 = 60;

/// Extra timeout granted to every further attempt, in seconds.
pub const TIMEOUT_STEP_SECS: u64 = 30;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000; // 1 second

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30000; // 30 seconds

/// Wait applied to a 429 response that carries no usable `Retry-After`.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Consecutive 429 responses tolerated inside one attempt before it counts as failed.
pub const MAX_RATE_LIMIT_WAITS: u32 = 20;

/// Consecutive failures that open the circuit breaker.
pub const BREAKER_OPEN_THRESHOLD: u32 = 5;

/// Consecutive failures that open the circuit breaker for the critical cool-down.
pub const BREAKER_CRITICAL_THRESHOLD: u32 = 10;

/// Cool-down once [`BREAKER_OPEN_THRESHOLD`] is reached.
pub const BREAKER_COOLDOWN: Duration = Duration::from_secs(60);

/// Cool-down once [`BREAKER_CRITICAL_THRESHOLD`] is reached.
pub const BREAKER_CRITICAL_COOLDOWN: Duration = Duration::from_secs(300);

/// Longest single wait a request spends on an open breaker.
pub const MAX_BREAKER_WAIT: Duration = Duration::from_secs(30);

/// Default chunk width in days.
pub const DEFAULT_CHUNK_DAYS: u32 = 7;

/// Exporter logs progress every N rows.
pub const EXPORT_PROGRESS_INTERVAL: usize = 100;

/// Calculate exponential backoff delay
pub fn calculate_backoff(retry_count: u32) -> Duration {
    let factor = 2u64.checked_pow(retry_count).unwrap_or(u64::MAX);
    let delay_ms = INITIAL_BACKOFF_MS.saturating_mul(factor);
    let delay_ms = delay_ms.min(MAX_BACKOFF_MS);
    Duration::from_millis(delay_ms)
}

/// Timeout for a 1-based attempt: the base timeout plus one step per retry
pub fn attempt_timeout(base: Duration, attempt: u32) -> Duration {
    base + Duration::from_secs(TIMEOUT_STEP_SECS) * attempt.saturating_sub(1)
}
