//! Circuit breaker for backend clients.
//!
//! Opens after a burst of consecutive failures inside a short window, stays
//! open for a cool-down period, then half-opens to admit a single probe.
//! Both the Elasticsearch and DShield clients wrap their request paths in
//! one of these; the feature manager reads the state to gate tools.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

/// Breaker thresholds.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures inside `failure_window` that open the circuit.
    pub failure_threshold: u32,
    /// Window inside which failures count toward the threshold.
    pub failure_window: Duration,
    /// How long the circuit stays open before half-opening.
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(30),
            open_duration: Duration::from_secs(30),
        }
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Requests flow normally.
    Closed,
    /// Requests are refused without touching the backend.
    Open,
    /// One probe request is admitted to test recovery.
    HalfOpen,
}

impl BreakerState {
    /// Wire name for health payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    opened_at: Option<Instant>,
    failures: VecDeque<Instant>,
    probe_in_flight: bool,
}

/// A mutex-guarded circuit breaker shared across calls.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Breaker with default thresholds. `name` labels log records.
    pub fn new(name: &'static str) -> Self {
        Self::with_config(name, CircuitBreakerConfig::default())
    }

    /// Breaker with explicit thresholds.
    pub fn with_config(name: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                opened_at: None,
                failures: VecDeque::new(),
                probe_in_flight: false,
            }),
        }
    }

    /// Whether a request may proceed. Transitions open → half-open once the
    /// cool-down elapses; in half-open only the first caller gets through.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.open_duration {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful backend call. Closes the circuit from half-open.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.failures.clear();
        inner.probe_in_flight = false;
        if inner.state != BreakerState::Closed {
            inner.state = BreakerState::Closed;
            inner.opened_at = None;
        }
    }

    /// Record a failed backend call. Opens the circuit when the threshold is
    /// crossed inside the window, or immediately from half-open.
    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.probe_in_flight = false;

        if inner.state == BreakerState::HalfOpen {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(now);
            warn!(breaker = self.name, "probe failed, circuit re-opened");
            return;
        }

        inner.failures.push_back(now);
        while let Some(front) = inner.failures.front() {
            if now.duration_since(*front) > self.config.failure_window {
                inner.failures.pop_front();
            } else {
                break;
            }
        }

        if inner.failures.len() >= self.config.failure_threshold as usize
            && inner.state == BreakerState::Closed
        {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(now);
            warn!(
                breaker = self.name,
                failures = inner.failures.len(),
                "failure threshold crossed, circuit opened"
            );
        }
    }

    /// Current state, folding in the open → half-open timer.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::Open {
            let elapsed = inner
                .opened_at
                .map(|t| t.elapsed())
                .unwrap_or(Duration::ZERO);
            if elapsed >= self.config.open_duration {
                inner.state = BreakerState::HalfOpen;
            }
        }
        inner.state
    }

    /// Whether requests are currently refused.
    pub fn is_open(&self) -> bool {
        self.state() == BreakerState::Open
    }
}
