use crate::backlog::{should_refresh, BacklogMap, BacklogProbe};
use crate::convergence::outcome::PROGRESS_LIMIT;
use crate::convergence::predicates::evaluate;
use crate::convergence::trend::TrendTracker;
use crate::convergence::{
    ConvergencePolicy, FailureReason, ObservedAgreement, PhaseSummary, ProgressPoint, WaitOutcome, WaitStatus,
};
use crate::directory::Directory;
use crate::health::{classify, Classification, HintSet};
use crate::observe::{all_missing, Observation, ObserveError, StatusObserver};
use crate::retry::{RetryError, RetryExecutor};
use crate::time::{CancelSignal, Clock};
use tokio::time::{Duration, Instant};

/// Everything one cycle produced. Only the latest cycle is kept.
struct CycleRecord {
    observation: Observation,
    classification: Classification,
    summary: PhaseSummary,
}

/// The polling loop behind `wait_for_convergence()`. One instance serves one wait: it owns its
/// retry executor (and thus its circuit breaker) and its trend history.
pub(crate) struct ConvergenceLoop<'a, D, B, C>
where
    D: Directory + ?Sized,
    B: BacklogProbe + ?Sized,
    C: Clock,
{
    logger: slog::Logger,
    observer: StatusObserver<'a, D>,
    backlog_probe: &'a B,
    suffix: String,
    targets: Vec<String>,
    policy: ConvergencePolicy,
    executor: RetryExecutor<C>,
    clock: C,
    cancel: CancelSignal,

    // Loop state
    cycle: u64,
    streak: u32,
    hints: HintSet,
    progress: Vec<ProgressPoint>,
    last: Option<CycleRecord>,
}

impl<'a, D, B, C> ConvergenceLoop<'a, D, B, C>
where
    D: Directory + ?Sized,
    B: BacklogProbe + ?Sized,
    C: Clock,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        logger: slog::Logger,
        observer: StatusObserver<'a, D>,
        backlog_probe: &'a B,
        suffix: &str,
        targets: Vec<String>,
        policy: ConvergencePolicy,
        executor: RetryExecutor<C>,
        clock: C,
        cancel: CancelSignal,
    ) -> Self {
        ConvergenceLoop {
            logger,
            observer,
            backlog_probe,
            suffix: suffix.to_string(),
            targets,
            policy,
            executor,
            clock,
            cancel,
            cycle: 0,
            streak: 0,
            hints: HintSet::new(),
            progress: vec![],
            last: None,
        }
    }

    pub(crate) async fn run(mut self) -> WaitOutcome {
        let start = self.clock.now();
        let deadline = start + self.policy.overall_timeout;
        let phase_deadlines = self.policy.phase_timeouts.deadlines(start);
        let thresholds = self.policy.thresholds();
        let mut trend = TrendTracker::new();
        let mut backlog = BacklogMap::new();

        while self.clock.now() < deadline {
            self.cycle += 1;
            let logger = self.logger.new(slog::o!("Cycle" => self.cycle));

            if self.policy.monitor_enabled && should_refresh(self.cycle, self.policy.monitor_every) {
                backlog = self.backlog_probe.sample(&self.suffix).await;
                slog::debug!(logger, "Sampled backlog for {} agreement(s)", backlog.len());
            }

            let observed = self.observe(&backlog, deadline).await;
            let observation = match observed {
                Ok(observation) => observation,
                Err(RetryError::Cancelled { .. }) => {
                    return self.finish(WaitStatus::Failed(FailureReason::Cancelled), start);
                }
                Err(e) => {
                    slog::warn!(logger, "Status observation gave up, treating agreements as missing: {}", e);
                    all_missing(&self.targets, &backlog, self.clock.unix_time())
                }
            };

            let classification = classify(&observation.agreements, &observation.replica, &thresholds);
            let summary = evaluate(&observation, &mut trend, &thresholds);
            let elapsed = self.clock.now() - start;
            let unhealthy = classification.unhealthy_count();

            if self.progress.len() < PROGRESS_LIMIT {
                self.progress.push(ProgressPoint {
                    cycle: self.cycle,
                    elapsed_s: elapsed.as_secs(),
                    unhealthy,
                });
            }

            let passing = match &self.policy.phases {
                Some(required) => required.met(&summary),
                None => classification.all_healthy(),
            };
            if !passing {
                self.hints.extend(classification.hints.iter().cloned());
            }

            slog::debug!(
                logger,
                "configured={} working={} finished={} unhealthy={} streak={}",
                summary.configured,
                summary.working,
                summary.finished,
                unhealthy,
                self.streak
            );
            if self.cycle == 1 || (self.policy.log_every > 0 && self.cycle % self.policy.log_every == 0) {
                slog::info!(
                    logger,
                    "Waiting for convergence: elapsed={}s unhealthy={} streak={}",
                    elapsed.as_secs(),
                    unhealthy,
                    self.streak
                );
            }

            self.last = Some(CycleRecord {
                observation,
                classification,
                summary,
            });

            if let Some(required) = self.policy.phases {
                let now = self.clock.now();
                let stalled = if required.configured && now > phase_deadlines.configured && !summary.configured {
                    Some(FailureReason::ConfiguredTimeout)
                } else if required.working && now > phase_deadlines.working && !summary.working {
                    Some(FailureReason::StartTimeout)
                } else if required.finished && now > phase_deadlines.finished && !summary.finished {
                    Some(FailureReason::DoneTimeout)
                } else {
                    None
                };

                if let Some(reason) = stalled {
                    self.add_phase_hints(reason, &backlog);
                    slog::warn!(logger, "{}", reason.message());
                    return self.finish(WaitStatus::Failed(reason), start);
                }
            }

            if passing {
                self.streak += 1;
                if self.streak >= self.policy.required_consecutive_healthy_polls {
                    slog::info!(logger, "Replication converged after {} cycle(s)", self.cycle);
                    return self.finish(WaitStatus::Succeeded, start);
                }
            } else {
                self.streak = 0;
            }

            let wake_time = std::cmp::min(self.clock.now() + self.policy.sleep_interval(elapsed), deadline);
            if self.cancel.sleep_until(&mut self.clock, wake_time).await.is_err() {
                slog::info!(logger, "Wait cancelled");
                return self.finish(WaitStatus::Failed(FailureReason::Cancelled), start);
            }
        }

        slog::warn!(self.logger, "{}", FailureReason::OverallTimeout.message());
        self.finish(WaitStatus::Failed(FailureReason::OverallTimeout), start)
    }

    async fn observe(
        &mut self,
        backlog: &BacklogMap,
        deadline: Instant,
    ) -> Result<Observation, RetryError<ObserveError>> {
        let observer = &self.observer;
        let targets = &self.targets[..];
        let clock = &self.clock;

        self.executor
            .execute_before(Some(deadline), move || observer.observe(targets, backlog, clock.unix_time()))
            .await
    }

    fn add_phase_hints(&mut self, reason: FailureReason, backlog: &BacklogMap) {
        match reason {
            FailureReason::ConfiguredTimeout => self.hints.insert("Agreement disabled or missing"),
            FailureReason::StartTimeout => self.hints.insert("No activity observed"),
            FailureReason::DoneTimeout => {
                self.hints.insert("Not converged");
                self.hints
                    .extend(backlog.iter().map(|(name, count)| format!("{}: backlog={}", name, count)));
            }
            FailureReason::OverallTimeout | FailureReason::Cancelled => {}
        }
    }

    fn finish(self, status: WaitStatus, start: Instant) -> WaitOutcome {
        let elapsed: Duration = self.clock.now() - start;
        let message = match status {
            WaitStatus::Succeeded => "Replication converged".to_string(),
            WaitStatus::Failed(reason) => reason.message().to_string(),
        };

        let (observations, summary) = match self.last {
            Some(record) => {
                let observations = record
                    .observation
                    .agreements
                    .into_iter()
                    .zip(record.classification.verdicts)
                    .map(|(snapshot, verdict)| ObservedAgreement {
                        update_age: snapshot.update_age(),
                        snapshot,
                        status: verdict.label,
                    })
                    .collect();
                (observations, record.summary)
            }
            None => (vec![], PhaseSummary::default()),
        };

        WaitOutcome {
            status,
            message,
            observations,
            summary,
            hints: self.hints.to_vec(),
            cycles: self.cycle,
            elapsed_s: elapsed.as_secs(),
            agreements: self.targets.len(),
            progress: self.progress,
        }
    }
}
