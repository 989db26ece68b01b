use crate::retry::{is_retryable, BackoffSchedule, BreakerPhase, CircuitBreaker, RetryPolicy};
use crate::time::{CancelSignal, Clock, RealClock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;
use std::future::Future;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E>
where
    E: fmt::Debug + fmt::Display,
{
    /// The breaker rejected the call, or opened while this chain was failing. `last_error` is the
    /// failure that opened it, if it opened during this chain.
    #[error("circuit breaker open after {consecutive_failures} consecutive failures")]
    CircuitOpen {
        consecutive_failures: u32,
        last_error: Option<E>,
    },

    /// Non-retryable failure, or retries exhausted.
    #[error("operation failed after {attempts} attempt(s): {last_error}")]
    Failed { attempts: u32, retryable: bool, last_error: E },

    /// The next backoff would have run past the caller's deadline.
    #[error("deadline reached after {attempts} attempt(s): {last_error}")]
    Deadline { attempts: u32, last_error: E },

    #[error("cancelled after {attempts} attempt(s): {last_error}")]
    Cancelled { attempts: u32, last_error: E },
}

impl<E> RetryError<E>
where
    E: fmt::Debug + fmt::Display,
{
    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::CircuitOpen { last_error, .. } => last_error.as_ref(),
            RetryError::Failed { last_error, .. }
            | RetryError::Deadline { last_error, .. }
            | RetryError::Cancelled { last_error, .. } => Some(last_error),
        }
    }

    pub fn into_last_error(self) -> Option<E> {
        match self {
            RetryError::CircuitOpen { last_error, .. } => last_error,
            RetryError::Failed { last_error, .. }
            | RetryError::Deadline { last_error, .. }
            | RetryError::Cancelled { last_error, .. } => Some(last_error),
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, RetryError::CircuitOpen { .. })
    }
}

/// RetryExecutor wraps fallible async operations with bounded retries, exponential backoff with
/// jitter, and a circuit breaker whose state persists across `execute` calls.
///
/// One executor belongs to one logical flow (e.g. one wait invocation). It is not `Sync`-shared.
pub struct RetryExecutor<C: Clock = RealClock> {
    logger: slog::Logger,
    policy: RetryPolicy,
    breaker: CircuitBreaker,
    clock: C,
    rng: StdRng,
    cancel: CancelSignal,
}

impl RetryExecutor<RealClock> {
    pub fn new(logger: slog::Logger, policy: RetryPolicy) -> Self {
        RetryExecutor::with_clock(logger, policy, RealClock)
    }
}

impl<C: Clock> RetryExecutor<C> {
    pub fn with_clock(logger: slog::Logger, policy: RetryPolicy, clock: C) -> Self {
        let breaker = CircuitBreaker::new(policy.circuit_breaker_threshold, policy.circuit_breaker_cooldown);

        RetryExecutor {
            logger,
            policy,
            breaker,
            clock,
            rng: StdRng::from_entropy(),
            cancel: CancelSignal::never(),
        }
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn with_cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub async fn execute<T, E, F, Fut>(&mut self, operation: F) -> Result<T, RetryError<E>>
    where
        E: fmt::Debug + fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_before(None, operation).await
    }

    /// Same as `execute()`, but never starts a backoff sleep that would end at or after
    /// `deadline`.
    pub async fn execute_before<T, E, F, Fut>(
        &mut self,
        deadline: Option<Instant>,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        E: fmt::Debug + fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut schedule = BackoffSchedule::new(&self.policy);
        let mut attempt: u32 = 0;

        loop {
            if !self.breaker.permits(self.clock.now()) {
                return Err(RetryError::CircuitOpen {
                    consecutive_failures: self.breaker.consecutive_failures(),
                    last_error: None,
                });
            }

            let error = match operation().await {
                Ok(value) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Err(e) => e,
            };

            let now = self.clock.now();
            let attempts = attempt + 1;
            let previous_phase = self.breaker.phase();
            if self.breaker.record_failure(now) == BreakerPhase::Open {
                if previous_phase != BreakerPhase::Open {
                    slog::warn!(
                        self.logger,
                        "Circuit breaker opened after {} consecutive failures. Last error: {}",
                        self.breaker.consecutive_failures(),
                        error
                    );
                }
                return Err(RetryError::CircuitOpen {
                    consecutive_failures: self.breaker.consecutive_failures(),
                    last_error: Some(error),
                });
            }

            let retryable = is_retryable(&error.to_string());
            if !retryable || attempt >= self.policy.max_attempts {
                slog::debug!(
                    self.logger,
                    "Giving up after {} attempt(s) (retryable={}): {}",
                    attempts,
                    retryable,
                    error
                );
                return Err(RetryError::Failed {
                    attempts,
                    retryable,
                    last_error: error,
                });
            }

            let delay = schedule.next_delay(&mut self.rng);
            let wake_time = now + delay;
            if let Some(deadline) = deadline {
                if wake_time >= deadline {
                    return Err(RetryError::Deadline {
                        attempts,
                        last_error: error,
                    });
                }
            }

            slog::warn!(
                self.logger,
                "Attempt {} failed, retrying in {:?}: {}",
                attempts,
                delay,
                error
            );
            if self.cancel.sleep_until(&mut self.clock, wake_time).await.is_err() {
                return Err(RetryError::Cancelled {
                    attempts,
                    last_error: error,
                });
            }

            attempt += 1;
        }
    }
}
