//! Adaptive retry with exponential backoff, jitter, and a failure-threshold circuit breaker.
mod backoff;
mod circuit_breaker;
mod classify;
mod executor;
mod policy;

pub use circuit_breaker::BreakerPhase;
pub use circuit_breaker::CircuitBreaker;
pub use classify::is_retryable;
pub use executor::RetryError;
pub use executor::RetryExecutor;
pub use policy::RetryPolicy;

pub(crate) use backoff::BackoffSchedule;
