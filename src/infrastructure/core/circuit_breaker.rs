use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,   // Normal operation - requests pass through
    Open,     // Failure threshold breached - fast-fail everything
    HalfOpen, // Cool-down elapsed - a single probe decides
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: usize,
    window_start: Option<Instant>,
    opened_at: Option<Instant>,
    probe_inflight: bool,
}

/// Gate-style circuit breaker.
///
/// Opens after `failure_threshold` consecutive failures inside
/// `failure_window`; while open every acquire fast-fails with the remaining
/// cool-down. After the cool-down one probe is admitted; its outcome closes
/// or re-opens the breaker.
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    failure_threshold: usize,
    failure_window: Duration,
    cooldown: Duration,
    name: String,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        failure_threshold: usize,
        failure_window: Duration,
        cooldown: Duration,
    ) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                window_start: None,
                opened_at: None,
                probe_inflight: false,
            }),
            failure_threshold,
            failure_window,
            cooldown,
            name: name.into(),
        }
    }

    /// Ask permission for one call. `Err` carries the remaining cool-down;
    /// the caller must not touch the venue.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.cooldown {
                    info!(
                        "CircuitBreaker [{}]: Transitioning Open -> HalfOpen (cool-down elapsed)",
                        self.name
                    );
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_inflight = true;
                    Ok(())
                } else {
                    Err(self.cooldown - elapsed)
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_inflight {
                    // A probe is already out; everyone else keeps waiting.
                    Err(self.cooldown)
                } else {
                    inner.probe_inflight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            CircuitState::HalfOpen => {
                info!(
                    "CircuitBreaker [{}]: Transitioning HalfOpen -> Closed (probe succeeded)",
                    self.name
                );
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.window_start = None;
                inner.probe_inflight = false;
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                inner.window_start = None;
            }
            CircuitState::Open => {
                warn!(
                    "CircuitBreaker [{}]: Success recorded in Open state (unexpected)",
                    self.name
                );
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");

        match inner.state {
            CircuitState::Closed => {
                // A stale window restarts the consecutive count.
                let window_expired = inner
                    .window_start
                    .map(|t| t.elapsed() > self.failure_window)
                    .unwrap_or(true);
                if window_expired {
                    inner.window_start = Some(Instant::now());
                    inner.consecutive_failures = 0;
                }
                inner.consecutive_failures += 1;

                if inner.consecutive_failures >= self.failure_threshold {
                    error!(
                        "CircuitBreaker [{}]: Transitioning Closed -> Open ({} failures)",
                        self.name, inner.consecutive_failures
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                warn!(
                    "CircuitBreaker [{}]: Transitioning HalfOpen -> Open (probe failed)",
                    self.name
                );
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_inflight = false;
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("breaker lock poisoned").state
    }

    pub fn state_label(&self) -> &'static str {
        match self.state() {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}
