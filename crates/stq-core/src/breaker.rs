//! Three-state circuit breaker for flaky remote dependencies.
//!
//! Closed: all requests allowed, failures counted. Open: requests blocked
//! until the cooldown elapses. HalfOpen: exactly one probe request allowed;
//! its outcome decides between Closed and another full cooldown.

use tokio::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        };
        f.write_str(s)
    }
}

/// Operational snapshot of a breaker, for logging/health endpoints.
#[derive(Clone, Copy, Debug)]
pub struct HealthStatus {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Time left until the next probe is allowed, when Open.
    pub open_remaining: Option<Duration>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    state: CircuitState,
    consecutive_failures: u32,
    open_until: Option<Instant>,
    probe_in_flight: bool,
}

impl CircuitBreaker {
    pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
    pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(300);

    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            open_until: None,
            probe_in_flight: false,
        }
    }

    /// Whether a request may proceed right now.
    ///
    /// Transitions Open → HalfOpen once the cooldown has elapsed and admits
    /// exactly one probe; further calls return false until that probe's
    /// outcome is recorded.
    pub fn allow_request(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let Some(until) = self.open_until else {
                    return false;
                };
                if Instant::now() < until {
                    return false;
                }
                self.state = CircuitState::HalfOpen;
                self.probe_in_flight = true;
                true
            }
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    return false;
                }
                self.probe_in_flight = true;
                true
            }
        }
    }

    pub fn record_success(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.open_until = None;
        self.probe_in_flight = false;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        match self.state {
            CircuitState::HalfOpen => self.open_now(),
            CircuitState::Closed if self.consecutive_failures >= self.failure_threshold => {
                self.open_now()
            }
            _ => {}
        }
    }

    /// Open immediately, bypassing the failure threshold. Used when the
    /// dependency sends an unambiguous throttle signal (HTTP 429).
    pub fn trip(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.open_now();
    }

    fn open_now(&mut self) {
        self.state = CircuitState::Open;
        self.open_until = Some(Instant::now() + self.cooldown);
        self.probe_in_flight = false;
    }

    pub fn health(&self) -> HealthStatus {
        let open_remaining = match self.state {
            CircuitState::Open => {
                let now = Instant::now();
                self.open_until.map(|u| u.saturating_duration_since(now))
            }
            _ => None,
        };
        HealthStatus {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            open_remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn closed_allows_until_threshold() {
        let mut b = CircuitBreaker::new(3, Duration::from_secs(300));

        b.record_failure();
        b.record_failure();
        assert!(b.allow_request());
        assert_eq!(b.health().state, CircuitState::Closed);

        b.record_failure();
        assert_eq!(b.health().state, CircuitState::Open);
        assert!(!b.allow_request());
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_failure_count() {
        let mut b = CircuitBreaker::new(3, Duration::from_secs(300));
        b.record_failure();
        b.record_failure();
        b.record_success();
        b.record_failure();
        b.record_failure();
        assert_eq!(b.health().state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_admits_exactly_one_probe() {
        let mut b = CircuitBreaker::new(1, Duration::from_secs(10));
        b.record_failure();
        assert!(!b.allow_request());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(b.allow_request(), "first call after cooldown is the probe");
        assert!(!b.allow_request(), "no second request before probe outcome");
        assert_eq!(b.health().state, CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_success_closes() {
        let mut b = CircuitBreaker::new(1, Duration::from_secs(10));
        b.record_failure();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(b.allow_request());

        b.record_success();
        assert_eq!(b.health().state, CircuitState::Closed);
        assert_eq!(b.health().consecutive_failures, 0);
        assert!(b.allow_request());
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failure_restarts_cooldown() {
        let mut b = CircuitBreaker::new(1, Duration::from_secs(10));
        b.record_failure();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(b.allow_request());

        b.record_failure();
        assert_eq!(b.health().state, CircuitState::Open);
        assert!(!b.allow_request());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(b.allow_request());
    }

    #[tokio::test(start_paused = true)]
    async fn trip_opens_without_threshold() {
        let mut b = CircuitBreaker::new(3, Duration::from_secs(300));
        assert!(b.allow_request());

        b.trip();
        assert_eq!(b.health().state, CircuitState::Open);
        assert!(!b.allow_request());
        assert!(b.health().open_remaining.is_some());
    }
}
