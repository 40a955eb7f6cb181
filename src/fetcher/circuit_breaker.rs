//! Consecutive-failure circuit breaker
//!
//! One breaker is shared (through an `Arc`) by every request of a run, so failures
//! accumulate across pages and chunks. Reaching [`BREAKER_OPEN_THRESHOLD`] opens it
//! for [`BREAKER_COOLDOWN`]; reaching [`BREAKER_CRITICAL_THRESHOLD`] opens it for
//! [`BREAKER_CRITICAL_COOLDOWN`]. Any success closes it and resets the counter.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, warn};

use crate::ingest::config::{
    BREAKER_COOLDOWN, BREAKER_CRITICAL_COOLDOWN, BREAKER_CRITICAL_THRESHOLD,
    BREAKER_OPEN_THRESHOLD,
};

/// Snapshot of the breaker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CircuitBreakerState {
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Requests are refused until this instant
    pub open_until: Option<Instant>,
}

/// Mutex-guarded breaker shared by all requests of a run
#[derive(Debug, Default)]
pub struct CircuitBreaker {
    state: Mutex<CircuitBreakerState>,
}

impl CircuitBreaker {
    /// Closed breaker with no recorded failures
    pub fn new() -> Self {
        Self::default()
    }

    /// Closed breaker wrapped for sharing
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> MutexGuard<'_, CircuitBreakerState> {
        // State stays consistent under poisoning: every update is a single assignment
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether requests are refused at `now`
    pub fn is_open(&self, now: Instant) -> bool {
        self.lock().open_until.is_some_and(|until| now < until)
    }

    /// Cool-down left at `now`, `None` when closed
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.lock()
            .open_until
            .filter(|until| now < *until)
            .map(|until| until - now)
    }

    /// Reset the counter and close the breaker
    pub fn record_success(&self) {
        let mut state = self.lock();
        state.consecutive_failures = 0;
        state.open_until = None;
    }

    /// Count one failure, returning the new consecutive total
    pub fn record_failure(&self) -> u32 {
        let mut state = self.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.consecutive_failures
    }

    /// Open the breaker if `consecutive_failures` crosses a threshold, using the current time
    pub fn maybe_open(&self, consecutive_failures: u32) -> Option<Duration> {
        self.maybe_open_at(consecutive_failures, Instant::now())
    }

    /// Open the breaker relative to `now`; returns the cool-down applied, if any
    pub fn maybe_open_at(&self, consecutive_failures: u32, now: Instant) -> Option<Duration> {
        let cooldown = if consecutive_failures >= BREAKER_CRITICAL_THRESHOLD {
            error!(
                consecutive_failures,
                cooldown_secs = BREAKER_CRITICAL_COOLDOWN.as_secs(),
                "[CIRCUIT BREAKER] Critical failure count, opening circuit"
            );
            BREAKER_CRITICAL_COOLDOWN
        } else if consecutive_failures >= BREAKER_OPEN_THRESHOLD {
            warn!(
                consecutive_failures,
                cooldown_secs = BREAKER_COOLDOWN.as_secs(),
                "[CIRCUIT BREAKER] Opening circuit"
            );
            BREAKER_COOLDOWN
        } else {
            return None;
        };

        let mut state = self.lock();
        state.consecutive_failures = consecutive_failures;
        state.open_until = Some(now + cooldown);
        Some(cooldown)
    }

    /// Failures since the last success
    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> CircuitBreakerState {
        *self.lock()
    }
}
