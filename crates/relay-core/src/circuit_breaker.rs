//! Per-backend failure-tracking circuit breaker.
//!
//! One breaker instance exists per backend name for the lifetime of the
//! service and is shared by every session. The clock is injected as unix
//! epoch milliseconds so transitions are testable without sleeping.

use serde::Serialize;

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Read-only view of a breaker for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failure_count: u32,
    /// Unix millis when the breaker opened; 0 while closed.
    pub opened_at: u64,
}

/// Closed/open/half-open failure tracker for one backend.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: BreakerState,
    failure_count: u32,
    opened_at: u64,
    failure_threshold: u32,
    reset_timeout_ms: u64,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout_ms: u64) -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            opened_at: 0,
            failure_threshold,
            reset_timeout_ms,
        }
    }

    /// Whether a request may go through right now.
    ///
    /// While open, crossing the reset window transitions to half-open as a
    /// side effect of the check.
    pub fn can_request(&mut self, now_ms: u64) -> bool {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                if now_ms.saturating_sub(self.opened_at) >= self.reset_timeout_ms {
                    self.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Records a successful request, closing the breaker from any state.
    pub fn mark_success(&mut self) {
        self.failure_count = 0;
        self.state = BreakerState::Closed;
        self.opened_at = 0;
    }

    /// Records a failed request.
    ///
    /// In the half-open probe state a single failure reopens immediately,
    /// with the count pinned at the threshold so the breaker does not
    /// re-accumulate from zero.
    pub fn mark_failure(&mut self, now_ms: u64) {
        match self.state {
            BreakerState::HalfOpen => {
                self.state = BreakerState::Open;
                self.opened_at = now_ms;
                self.failure_count = self.failure_threshold;
            }
            BreakerState::Closed | BreakerState::Open => {
                self.failure_count += 1;
                if self.failure_count >= self.failure_threshold
                    && self.state == BreakerState::Closed
                {
                    self.state = BreakerState::Open;
                    self.opened_at = now_ms;
                }
            }
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state,
            failure_count: self.failure_count,
            opened_at: self.opened_at,
        }
    }
}
