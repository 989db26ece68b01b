use crate::retry::RetryPolicy;
use rand::Rng;
use tokio::time::Duration;

/// BackoffSchedule produces the delay before each retry.
///
/// The un-jittered step starts at `base_delay` and grows by `backoff_multiplier` up to
/// `max_delay`. Jitter scales the step by `[0.5, 1.5]` but the result is clamped to `max_delay`,
/// and the next step grows from the un-jittered value, so jitter never compounds.
#[derive(Debug, Clone)]
pub(crate) struct BackoffSchedule {
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter_enabled: bool,
    previous_step: Option<Duration>,
}

impl BackoffSchedule {
    pub(crate) fn new(policy: &RetryPolicy) -> Self {
        BackoffSchedule {
            base_delay: policy.base_delay,
            max_delay: policy.max_delay,
            multiplier: policy.backoff_multiplier,
            jitter_enabled: policy.jitter_enabled,
            previous_step: None,
        }
    }

    pub(crate) fn next_delay<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let step = match self.previous_step {
            None => self.base_delay,
            Some(previous) => Duration::try_from_secs_f64(previous.as_secs_f64() * self.multiplier)
                .unwrap_or(self.max_delay),
        }
        .min(self.max_delay);
        self.previous_step = Some(step);

        if self.jitter_enabled {
            let factor = rng.gen_range(0.5..=1.5);
            step.mul_f64(factor).min(self.max_delay)
        } else {
            step
        }
    }

    pub(crate) fn reset(&mut self) {
        self.previous_step = None;
    }
}
