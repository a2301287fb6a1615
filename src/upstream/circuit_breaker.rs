//! Per-upstream circuit breaker.
//!
//! ```text
//! Closed --(failure_threshold consecutive failures)--> Open
//! Open   --(recovery_timeout elapsed, next request)--> HalfOpen
//! HalfOpen --(success_threshold trial requests ok)--> Closed
//! HalfOpen --(any trial request fails)--> Open
//! ```
//!
//! While open, requests fail fast to the fallback responder without touching
//! the upstream. Half-open admits one trial request at a time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open { until: Instant },
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_success_threshold: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_success_threshold: 2,
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    trial_in_flight: bool,
    rejected: u64,
    transitions: u64,
}

/// Counters exposed on the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub state: &'static str,
    pub consecutive_failures: u32,
    pub rejected: u64,
    pub transitions: u64,
}

/// Thread-safe breaker; clones share state. No I/O happens under the lock.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    settings: BreakerSettings,
    inner: Arc<Mutex<Inner>>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            inner: Arc::new(Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                trial_in_flight: false,
                rejected: 0,
                transitions: 0,
            })),
        }
    }

    /// Whether a request may go to the upstream now.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                true
            }
            CircuitState::Open { until } if Instant::now() >= until => {
                inner.state = CircuitState::HalfOpen;
                inner.half_open_successes = 0;
                inner.trial_in_flight = true;
                inner.transitions += 1;
                info!(new_state = "half_open", "Upstream circuit probing for recovery");
                true
            }
            CircuitState::HalfOpen | CircuitState::Open { .. } => {
                inner.rejected += 1;
                false
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.trial_in_flight = false;
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.settings.half_open_success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.half_open_successes = 0;
                    inner.transitions += 1;
                    info!(new_state = "closed", "Upstream circuit closed");
                }
            }
            CircuitState::Open { .. } => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.trial_in_flight = false;
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.settings.failure_threshold {
                    inner.state = CircuitState::Open {
                        until: Instant::now() + self.settings.recovery_timeout,
                    };
                    inner.transitions += 1;
                    warn!(
                        consecutive_failures = inner.consecutive_failures,
                        recovery_timeout_secs = self.settings.recovery_timeout.as_secs(),
                        "Upstream circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open {
                    until: Instant::now() + self.settings.recovery_timeout,
                };
                inner.half_open_successes = 0;
                inner.transitions += 1;
                warn!(new_state = "open", "Upstream trial request failed, circuit re-opened");
            }
            CircuitState::Open { .. } => {}
        }
    }

    /// Current state; an expired open circuit reads as half-open.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Open { until } if Instant::now() >= until => CircuitState::HalfOpen,
            other => other,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state();
        let inner = self.inner.lock();
        BreakerSnapshot {
            state: state.as_str(),
            consecutive_failures: inner.consecutive_failures,
            rejected: inner.rejected,
            transitions: inner.transitions,
        }
    }
}
