use tokio::time::{Duration, Instant};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BreakerPhase {
    Closed,
    Open,
    HalfOpen,
}

/// CircuitBreaker counts consecutive failures and, past a threshold, rejects calls until a
/// cooldown has passed since the most recent failure. After the cooldown exactly one trial call
/// is let through (HALF_OPEN); its outcome closes or re-opens the breaker.
///
/// Owned by a single `RetryExecutor`. Not shared between concurrent operations.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    phase: BreakerPhase,
    trial_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        CircuitBreaker {
            threshold,
            cooldown,
            consecutive_failures: 0,
            last_failure_at: None,
            phase: BreakerPhase::Closed,
            trial_in_flight: false,
        }
    }

    pub fn phase(&self) -> BreakerPhase {
        self.phase
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_failure_at(&self) -> Option<Instant> {
        self.last_failure_at
    }

    /// Returns true if a call may be made at `now`. May transition OPEN -> HALF_OPEN.
    pub fn permits(&mut self, now: Instant) -> bool {
        match self.phase {
            BreakerPhase::Closed => true,
            BreakerPhase::Open => {
                let cooled_down = match self.last_failure_at {
                    Some(last_failure) => now.saturating_duration_since(last_failure) > self.cooldown,
                    None => true,
                };
                if cooled_down {
                    self.phase = BreakerPhase::HalfOpen;
                    self.trial_in_flight = true;
                }
                cooled_down
            }
            BreakerPhase::HalfOpen => {
                if self.trial_in_flight {
                    false
                } else {
                    self.trial_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.phase = BreakerPhase::Closed;
        self.trial_in_flight = false;
    }

    /// Record a failed call and return the resulting phase.
    pub fn record_failure(&mut self, now: Instant) -> BreakerPhase {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure_at = Some(now);
        self.trial_in_flight = false;

        if self.phase == BreakerPhase::HalfOpen || self.consecutive_failures >= self.threshold {
            self.phase = BreakerPhase::Open;
        }

        self.phase
    }
}
