use crate::backlog::BacklogProbe;
use crate::convergence::state_machine::ConvergenceLoop;
use crate::convergence::{ConvergenceOptions, ConvergencePolicy, WaitOutcome};
use crate::directory::{replica_dn, Directory};
use crate::observe::{resolve_targets, ObserveError, StatusObserver, Targets};
use crate::retry::{RetryError, RetryExecutor, RetryPolicy};
use crate::time::{CancelSignal, Clock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::convert::TryFrom;

pub struct WaitConfig<C: Clock> {
    pub logger: slog::Logger,
    pub options: ConvergenceOptions,
    /// Retry policy for each cycle's status reads and for agreement discovery.
    pub retry_policy: RetryPolicy,
    pub clock: C,
    pub cancel: CancelSignal,
    /// Seed for retry jitter. Random when unset.
    pub rng_seed: Option<u64>,
}

impl<C: Clock> WaitConfig<C> {
    pub fn new(logger: slog::Logger, options: ConvergenceOptions, clock: C) -> Self {
        WaitConfig {
            logger,
            options,
            retry_policy: RetryPolicy::status_queries(),
            clock,
            cancel: CancelSignal::never(),
            rng_seed: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConvergenceError {
    #[error("Illegal wait options: {0}")]
    InvalidPolicy(&'static str),
    #[error("Illegal retry policy: {0}")]
    InvalidRetryPolicy(&'static str),
    #[error("No replication agreements to wait for under {replica_dn}")]
    NoTargets { replica_dn: String },
    #[error("Could not discover agreements: {0}")]
    TargetDiscovery(RetryError<ObserveError>),
}

/// Poll the targeted agreements of `suffix` until they converge, a phase stalls, the overall
/// timeout passes, or the wait is cancelled.
///
/// Every one of those endings is an `Ok(WaitOutcome)` carrying the last observations. `Err` is only
/// returned when the wait could not start: invalid options, or nothing to wait for.
pub async fn wait_for_convergence<D, B, C>(
    directory: &D,
    backlog_probe: &B,
    suffix: &str,
    targets: &Targets,
    config: WaitConfig<C>,
) -> Result<WaitOutcome, ConvergenceError>
where
    D: Directory + ?Sized,
    B: BacklogProbe + ?Sized,
    C: Clock,
{
    let policy = ConvergencePolicy::try_from(config.options).map_err(ConvergenceError::InvalidPolicy)?;
    config
        .retry_policy
        .validate()
        .map_err(ConvergenceError::InvalidRetryPolicy)?;

    let logger = config.logger.new(slog::o!("Suffix" => suffix.to_string()));
    let replica_dn = replica_dn(suffix);

    let rng = match config.rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut executor = RetryExecutor::with_clock(logger.clone(), config.retry_policy, config.clock.clone())
        .with_rng(rng)
        .with_cancel_signal(config.cancel.clone());

    let replica = replica_dn.as_str();
    let target_dns = executor
        .execute(move || resolve_targets(directory, replica, targets))
        .await
        .map_err(ConvergenceError::TargetDiscovery)?;
    if target_dns.is_empty() {
        return Err(ConvergenceError::NoTargets { replica_dn });
    }
    slog::info!(logger, "Waiting on {} agreement(s)", target_dns.len());

    let observer = StatusObserver::new(logger.clone(), directory, &replica_dn);
    let convergence_loop = ConvergenceLoop::new(
        logger,
        observer,
        backlog_probe,
        suffix,
        target_dns,
        policy,
        executor,
        config.clock,
        config.cancel,
    );

    Ok(convergence_loop.run().await)
}
