use crate::convergence::PhaseSummary;
use crate::health::HealthThresholds;
use std::convert::TryFrom;
use tokio::time::{Duration, Instant};

/// Caller-facing knobs for a wait. Every field is optional; unset fields take the defaults below.
#[derive(Clone, Debug, Default)]
pub struct ConvergenceOptions {
    pub stale_threshold: Option<Duration>,
    pub steady_ok_polls: Option<u32>,
    pub poll_interval: Option<Duration>,
    pub backoff_after: Option<Duration>,
    pub backoff_poll_interval: Option<Duration>,
    pub overall_timeout: Option<Duration>,
    pub require_init_success: Option<bool>,
    pub monitor_enabled: Option<bool>,
    pub monitor_every: Option<u64>,
    pub log_every: Option<u64>,
    /// When set, success is decided per readiness phase instead of by per-agreement health.
    pub require: Option<PhaseRequirementOptions>,
    pub timeouts: PhaseTimeoutOptions,
}

#[derive(Clone, Debug, Default)]
pub struct PhaseRequirementOptions {
    pub configured: Option<bool>,
    pub working: Option<bool>,
    pub finished: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct PhaseTimeoutOptions {
    pub configured: Option<Duration>,
    pub start: Option<Duration>,
    pub done: Option<Duration>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PhaseRequirements {
    pub configured: bool,
    pub working: bool,
    pub finished: bool,
}

impl PhaseRequirements {
    /// Every requested phase currently holds.
    pub fn met(&self, summary: &PhaseSummary) -> bool {
        (!self.configured || summary.configured)
            && (!self.working || summary.working)
            && (!self.finished || summary.finished)
    }
}

/// Phase budgets. They run one after another: the working deadline starts counting where the
/// configured deadline ends, and so on.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PhaseTimeouts {
    pub configured: Duration,
    pub start: Duration,
    pub done: Duration,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct PhaseDeadlines {
    pub configured: Instant,
    pub working: Instant,
    pub finished: Instant,
}

impl PhaseTimeouts {
    pub(crate) fn deadlines(&self, start: Instant) -> PhaseDeadlines {
        let configured = start + self.configured;
        let working = configured + self.start;
        let finished = working + self.done;
        PhaseDeadlines {
            configured,
            working,
            finished,
        }
    }
}

/// Validated, immutable wait policy.
#[derive(Clone, Debug, PartialEq)]
pub struct ConvergencePolicy {
    pub stale_threshold: Duration,
    pub required_consecutive_healthy_polls: u32,
    pub poll_interval: Duration,
    pub backoff_after: Duration,
    pub backoff_poll_interval: Duration,
    pub overall_timeout: Duration,
    pub require_init_success: bool,
    pub monitor_enabled: bool,
    pub monitor_every: u64,
    pub log_every: u64,
    pub phases: Option<PhaseRequirements>,
    pub phase_timeouts: PhaseTimeouts,
}

impl ConvergencePolicy {
    fn with_defaults(options: ConvergenceOptions) -> Self {
        let phases = options.require.map(|require| PhaseRequirements {
            configured: require.configured.unwrap_or(true),
            working: require.working.unwrap_or(true),
            finished: require.finished.unwrap_or(false),
        });

        ConvergencePolicy {
            stale_threshold: options.stale_threshold.unwrap_or(Duration::from_secs(300)),
            required_consecutive_healthy_polls: options.steady_ok_polls.unwrap_or(3),
            poll_interval: options.poll_interval.unwrap_or(Duration::from_secs(3)),
            backoff_after: options.backoff_after.unwrap_or(Duration::from_secs(30)),
            backoff_poll_interval: options.backoff_poll_interval.unwrap_or(Duration::from_secs(5)),
            overall_timeout: options.overall_timeout.unwrap_or(Duration::from_secs(180)),
            require_init_success: options.require_init_success.unwrap_or(true),
            monitor_enabled: options.monitor_enabled.unwrap_or(true),
            monitor_every: options.monitor_every.unwrap_or(3),
            log_every: options.log_every.unwrap_or(5),
            phases,
            phase_timeouts: PhaseTimeouts {
                configured: options.timeouts.configured.unwrap_or(Duration::from_secs(20)),
                start: options.timeouts.start.unwrap_or(Duration::from_secs(30)),
                done: options.timeouts.done.unwrap_or(Duration::from_secs(120)),
            },
        }
    }

    fn validate(&self) -> Result<(), &'static str> {
        if self.required_consecutive_healthy_polls < 1 {
            return Err("steady_ok_polls must be at least 1");
        }
        if self.poll_interval == Duration::from_secs(0) {
            return Err("Poll interval must be greater than zero");
        }
        if self.overall_timeout == Duration::from_secs(0) {
            return Err("Overall timeout must be greater than zero");
        }
        if self.log_every < 1 {
            return Err("log_every must be at least 1");
        }

        Ok(())
    }

    pub fn thresholds(&self) -> HealthThresholds {
        HealthThresholds {
            stale_threshold: self.stale_threshold,
            require_init_success: self.require_init_success,
        }
    }

    /// Pause before the next cycle. Once `backoff_after` has passed, polling slows down to
    /// `backoff_poll_interval` (never faster than `poll_interval`).
    pub fn sleep_interval(&self, elapsed: Duration) -> Duration {
        if elapsed < self.backoff_after {
            self.poll_interval
        } else {
            self.poll_interval.max(self.backoff_poll_interval)
        }
    }
}

impl Default for ConvergencePolicy {
    fn default() -> Self {
        ConvergencePolicy::with_defaults(ConvergenceOptions::default())
    }
}

impl TryFrom<ConvergenceOptions> for ConvergencePolicy {
    type Error = &'static str;

    fn try_from(options: ConvergenceOptions) -> Result<Self, Self::Error> {
        let values = ConvergencePolicy::with_defaults(options);
        values.validate()?;
        Ok(values)
    }
}
