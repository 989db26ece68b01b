use tokio::time::Duration;

/// RetryPolicy is immutable configuration for one class of operations (status queries,
/// administrative commands, ...). Build one per class and hand it to a `RetryExecutor`.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first call. The executor makes at most `max_attempts + 1` calls.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Multiply each delay by a uniform random factor in `[0.5, 1.5]`.
    pub jitter_enabled: bool,
    /// Consecutive failures after which the breaker opens.
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 30,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 1.5,
            jitter_enabled: true,
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Policy for directory reads on the polling path. Short, because the polling loop itself
    /// will come back around on the next cycle.
    pub fn status_queries() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            ..RetryPolicy::default()
        }
    }

    /// Policy that calls the operation exactly once.
    pub fn no_retry() -> Self {
        RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err("Backoff multiplier must be at least 1.0");
        }
        if self.base_delay > self.max_delay {
            return Err("Base delay must not exceed max delay");
        }
        if self.circuit_breaker_threshold == 0 {
            return Err("Circuit breaker threshold must be at least 1");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(RetryPolicy::default().validate(), Ok(()));
        assert_eq!(RetryPolicy::status_queries().validate(), Ok(()));
        assert_eq!(RetryPolicy::no_retry().validate(), Ok(()));
    }

    #[test]
    fn rejects_shrinking_backoff() {
        let policy = RetryPolicy {
            backoff_multiplier: 0.5,
            ..RetryPolicy::default()
        };
        assert!(policy.validate().is_err());

        let policy = RetryPolicy {
            backoff_multiplier: f64::NAN,
            ..RetryPolicy::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn rejects_base_above_max() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(1),
            ..RetryPolicy::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn rejects_zero_threshold() {
        let policy = RetryPolicy {
            circuit_breaker_threshold: 0,
            ..RetryPolicy::default()
        };
        assert!(policy.validate().is_err());
    }
}
