use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use ds_repl::{
    agreement_dn, cancellation, mocked_clock, replica_dn, wait_for_convergence, BacklogMap, BacklogProbe,
    ConvergenceError, ConvergenceOptions, Directory, DirectoryError, Entry, FailureReason, InMemoryDirectory,
    MockClock, Mutation, NoBacklog, PhaseRequirementOptions, PhaseTimeoutOptions, Scope, StatusLabel, Targets,
    WaitConfig, WaitOutcome,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Duration;

const SUFFIX: &str = "dc=example,dc=com";
const UNIX_START: i64 = 1_757_246_000;
const AGREEMENT: &str = "agmt to c1";

type Script = dyn Fn(usize, &InMemoryDirectory) + Send + Sync;

/// An in-memory directory that runs `script` every time the replica entry is read. The observer
/// reads the replica first in every cycle, so the script sees the cycle number and can move the
/// agreement's state forward.
struct CycleScriptedDirectory {
    inner: InMemoryDirectory,
    replica_dn: String,
    replica_reads: AtomicUsize,
    script: Box<Script>,
}

impl CycleScriptedDirectory {
    fn new(inner: InMemoryDirectory, script: impl Fn(usize, &InMemoryDirectory) + Send + Sync + 'static) -> Self {
        CycleScriptedDirectory {
            inner,
            replica_dn: replica_dn(SUFFIX),
            replica_reads: AtomicUsize::new(0),
            script: Box::new(script),
        }
    }
}

#[async_trait]
impl Directory for CycleScriptedDirectory {
    async fn query(
        &self,
        scope: Scope,
        base: &str,
        filter: &str,
        attributes: &[&str],
    ) -> Result<Vec<Entry>, DirectoryError> {
        if scope == Scope::Base && base == self.replica_dn {
            let cycle = self.replica_reads.fetch_add(1, Ordering::SeqCst) + 1;
            (self.script)(cycle, &self.inner);
        }
        self.inner.query(scope, base, filter, attributes).await
    }

    async fn mutate(&self, dn: &str, mutation: &Mutation) -> Result<(), DirectoryError> {
        self.inner.mutate(dn, mutation).await
    }
}

struct FixedBacklog(BacklogMap);

#[async_trait]
impl BacklogProbe for FixedBacklog {
    async fn sample(&self, _suffix: &str) -> BacklogMap {
        self.0.clone()
    }
}

fn logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}

fn generalized_time(epoch: i64) -> String {
    Utc.timestamp_opt(epoch, 0)
        .single()
        .map(|time| time.format("%Y%m%d%H%M%SZ").to_string())
        .unwrap()
}

fn agreement_dn_of(name: &str) -> String {
    agreement_dn(name, &replica_dn(SUFFIX))
}

/// A directory with an enabled replica and one bare agreement entry.
fn directory() -> InMemoryDirectory {
    let directory = InMemoryDirectory::new();
    directory.put(Entry::new(replica_dn(SUFFIX)).with_value("nsds5ReplicaEnabled", "on"));
    directory.put(
        Entry::new(agreement_dn_of(AGREEMENT))
            .with_value("objectClass", "nsDS5ReplicationAgreement")
            .with_value("cn", AGREEMENT),
    );
    directory
}

/// Record an update with result `code` that ended `age` seconds before `now`.
fn set_last_update(directory: &InMemoryDirectory, now: i64, code: i64, age: i64) {
    let dn = agreement_dn_of(AGREEMENT);
    let status = if code == 0 {
        "Error (0) Replica acquired successfully: Incremental update succeeded".to_string()
    } else {
        format!("Error ({}) Replication error acquiring replica: Unknown error", code)
    };
    directory.set_attribute(&dn, "nsds5ReplicaEnabled", vec!["on".into()]);
    directory.set_attribute(&dn, "nsds5replicaUpdateInProgress", vec!["FALSE".into()]);
    directory.set_attribute(&dn, "nsds5replicaLastInitStatus", vec!["Error (0) Total update succeeded".into()]);
    directory.set_attribute(&dn, "nsds5replicaLastUpdateStatus", vec![status]);
    directory.set_attribute(&dn, "nsds5replicaLastUpdateStart", vec![generalized_time(now - age - 1)]);
    directory.set_attribute(&dn, "nsds5replicaLastUpdateEnd", vec![generalized_time(now - age)]);
}

fn explicit_target() -> Targets {
    Targets::Explicit(vec![agreement_dn_of(AGREEMENT)])
}

async fn wait<D, B>(directory: &D, backlog: &B, options: ConvergenceOptions, clock: MockClock) -> WaitOutcome
where
    D: Directory + ?Sized,
    B: BacklogProbe + ?Sized,
{
    let mut config = WaitConfig::new(logger(), options, clock);
    config.rng_seed = Some(7);
    wait_for_convergence(directory, backlog, SUFFIX, &explicit_target(), config)
        .await
        .unwrap()
}

fn unhealthy_trail(outcome: &WaitOutcome) -> Vec<usize> {
    outcome.progress.iter().map(|point| point.unhealthy).collect()
}

#[tokio::test]
async fn fresh_successful_update_converges_after_steady_polls() {
    let directory = directory();
    let (clock, controller) = mocked_clock(UNIX_START);
    set_last_update(&directory, UNIX_START, 0, 10);

    let outcome = wait(&directory, &NoBacklog, ConvergenceOptions::default(), clock).await;

    assert!(outcome.succeeded());
    assert_eq!(outcome.cycles, 3);
    assert_eq!(outcome.elapsed_s, 6);
    assert_eq!(controller.elapsed_time(), Duration::from_secs(6));
    assert!(outcome.hints.is_empty());
    assert!(outcome.summary.configured);
    assert!(outcome.summary.working);

    let observed = &outcome.observations[0];
    assert_eq!(observed.status, StatusLabel::Healthy);
    assert_eq!(observed.update_age, Some(16));
}

#[tokio::test]
async fn one_healthy_blip_does_not_converge() {
    let (clock, _) = mocked_clock(UNIX_START);
    let script_clock = clock.clone();
    let directory = CycleScriptedDirectory::new(directory(), move |cycle, inner| {
        let now = ds_repl::Clock::unix_time(&script_clock);
        if cycle == 2 || cycle >= 4 {
            set_last_update(inner, now, 0, 10);
        } else {
            set_last_update(inner, now, 1, 400);
        }
    });

    let outcome = wait(&directory, &NoBacklog, ConvergenceOptions::default(), clock).await;

    assert!(outcome.succeeded());
    assert_eq!(unhealthy_trail(&outcome), vec![1, 0, 1, 0, 0, 0]);
    assert_eq!(outcome.cycles, 6);
    assert_eq!(outcome.elapsed_s, 15);
    // Hints from the failing cycles survive the later success.
    assert_eq!(
        outcome.hints,
        vec![format!("{}: Replication update failed (code 1)", agreement_dn_of(AGREEMENT))]
    );
}

#[tokio::test]
async fn old_failed_update_times_out_with_diagnostics() {
    let directory = directory();
    let (clock, _) = mocked_clock(UNIX_START);
    set_last_update(&directory, UNIX_START, 1, 400);
    let options = ConvergenceOptions {
        overall_timeout: Some(Duration::from_secs(10)),
        ..ConvergenceOptions::default()
    };

    let outcome = wait(&directory, &NoBacklog, options, clock).await;

    assert_eq!(outcome.reason(), Some(FailureReason::OverallTimeout));
    assert_eq!(outcome.message, "Agreements not healthy within timeout");
    assert_eq!(outcome.cycles, 4);
    assert_eq!(outcome.elapsed_s, 10);
    assert_eq!(
        outcome.progress.iter().map(|point| point.elapsed_s).collect::<Vec<_>>(),
        vec![0, 3, 6, 9]
    );
    assert_eq!(unhealthy_trail(&outcome), vec![1, 1, 1, 1]);
    assert!(!outcome.summary.finished);

    let observed = &outcome.observations[0];
    assert_eq!(observed.status, StatusLabel::Failed);
    assert_eq!(observed.snapshot.last_update_code, Some(1));
    assert_eq!(observed.update_age, Some(409));
    assert_eq!(
        outcome.hints,
        vec![format!("{}: Replication update failed (code 1)", agreement_dn_of(AGREEMENT))]
    );
}

#[tokio::test]
async fn phases_converge_without_waiting_for_finished() {
    let (clock, _) = mocked_clock(UNIX_START);
    let directory = CycleScriptedDirectory::new(directory(), |cycle, inner| {
        let dn = agreement_dn_of(AGREEMENT);
        let enabled = if cycle >= 2 { "on" } else { "off" };
        let busy = if cycle >= 5 { "TRUE" } else { "FALSE" };
        inner.set_attribute(&dn, "nsds5ReplicaEnabled", vec![enabled.into()]);
        inner.set_attribute(&dn, "nsds5replicaUpdateInProgress", vec![busy.into()]);
    });
    let options = ConvergenceOptions {
        require: Some(PhaseRequirementOptions::default()),
        ..ConvergenceOptions::default()
    };

    let outcome = wait(&directory, &NoBacklog, options, clock).await;

    assert!(outcome.succeeded(), "{:?}", outcome);
    assert_eq!(outcome.cycles, 7);
    assert_eq!(outcome.elapsed_s, 18);
    assert!(outcome.summary.configured);
    assert!(outcome.summary.working);
    assert!(!outcome.summary.finished);
}

#[tokio::test]
async fn stalled_start_fails_with_phase_hint() {
    let (clock, _) = mocked_clock(UNIX_START);
    let directory = CycleScriptedDirectory::new(directory(), |_, inner| {
        let dn = agreement_dn_of(AGREEMENT);
        inner.set_attribute(&dn, "nsds5ReplicaEnabled", vec!["on".into()]);
    });
    let options = ConvergenceOptions {
        require: Some(PhaseRequirementOptions::default()),
        timeouts: PhaseTimeoutOptions {
            configured: Some(Duration::from_secs(5)),
            start: Some(Duration::from_secs(5)),
            done: None,
        },
        ..ConvergenceOptions::default()
    };

    let outcome = wait(&directory, &NoBacklog, options, clock).await;

    // The working deadline passes at 10s; the first cycle after it runs at 12s.
    assert_eq!(outcome.reason(), Some(FailureReason::StartTimeout));
    assert_eq!(outcome.cycles, 5);
    assert_eq!(outcome.elapsed_s, 12);
    assert!(outcome.hints.contains(&"No activity observed".to_string()));
    assert!(outcome.summary.configured);
    assert!(!outcome.summary.working);
}

#[tokio::test]
async fn unfinished_backlog_is_reported_on_done_timeout() {
    let directory = directory();
    let (clock, _) = mocked_clock(UNIX_START);
    let script_clock = clock.clone();
    let directory = CycleScriptedDirectory::new(directory, move |_, inner| {
        set_last_update(inner, ds_repl::Clock::unix_time(&script_clock), 0, 10);
    });
    let backlog = FixedBacklog([(AGREEMENT.to_string(), 5)].into_iter().collect());
    let options = ConvergenceOptions {
        require: Some(PhaseRequirementOptions {
            finished: Some(true),
            ..PhaseRequirementOptions::default()
        }),
        timeouts: PhaseTimeoutOptions {
            configured: Some(Duration::from_secs(5)),
            start: Some(Duration::from_secs(5)),
            done: Some(Duration::from_secs(5)),
        },
        ..ConvergenceOptions::default()
    };

    let outcome = wait(&directory, &backlog, options, clock).await;

    assert_eq!(outcome.reason(), Some(FailureReason::DoneTimeout));
    assert_eq!(outcome.cycles, 7);
    assert_eq!(
        outcome.hints,
        vec!["Not converged".to_string(), format!("{}: backlog=5", AGREEMENT)]
    );
    assert_eq!(outcome.observations[0].snapshot.backlog_count, Some(5));
    assert_eq!(outcome.observations[0].status, StatusLabel::Healthy);
}

#[tokio::test]
async fn no_agreements_is_an_immediate_error() {
    let directory = InMemoryDirectory::new();
    directory.put(Entry::new(replica_dn(SUFFIX)));
    let (clock, controller) = mocked_clock(UNIX_START);

    let config = WaitConfig::new(logger(), ConvergenceOptions::default(), clock);
    let result = wait_for_convergence(&directory, &NoBacklog, SUFFIX, &Targets::AllUnderReplica, config).await;

    assert!(matches!(result, Err(ConvergenceError::NoTargets { .. })));
    assert_eq!(controller.elapsed_time(), Duration::from_secs(0));
}

#[tokio::test]
async fn invalid_options_are_rejected() {
    let directory = directory();
    let (clock, _) = mocked_clock(UNIX_START);
    let options = ConvergenceOptions {
        steady_ok_polls: Some(0),
        ..ConvergenceOptions::default()
    };

    let config = WaitConfig::new(logger(), options, clock);
    let result = wait_for_convergence(&directory, &NoBacklog, SUFFIX, &explicit_target(), config).await;

    assert!(matches!(result, Err(ConvergenceError::InvalidPolicy(_))));
}

#[tokio::test]
async fn cancelled_wait_keeps_last_observations() {
    let (clock, _) = mocked_clock(UNIX_START);
    let (handle, cancel) = cancellation();
    let handle = Arc::new(handle);
    let script_handle = handle.clone();
    let directory = CycleScriptedDirectory::new(directory(), move |cycle, _| {
        if cycle == 3 {
            script_handle.cancel();
        }
    });

    let mut config = WaitConfig::new(logger(), ConvergenceOptions::default(), clock);
    config.cancel = cancel;
    let outcome = wait_for_convergence(&directory, &NoBacklog, SUFFIX, &explicit_target(), config)
        .await
        .unwrap();

    assert_eq!(outcome.reason(), Some(FailureReason::Cancelled));
    assert_eq!(outcome.cycles, 3);
    assert_eq!(outcome.elapsed_s, 6);
    assert_eq!(outcome.observations.len(), 1);
    assert_eq!(outcome.observations[0].snapshot.dn, agreement_dn_of(AGREEMENT));
}

#[tokio::test]
async fn unreachable_directory_reports_missing_agreements() {
    let directory = directory();
    directory.set_unavailable(Some(DirectoryError::Unreachable("ldapi://%2Frun%2Fslapd-example.socket".into())));
    let (clock, _) = mocked_clock(UNIX_START);
    let options = ConvergenceOptions {
        overall_timeout: Some(Duration::from_secs(20)),
        ..ConvergenceOptions::default()
    };

    let outcome = wait(&directory, &NoBacklog, options, clock).await;

    assert_eq!(outcome.reason(), Some(FailureReason::OverallTimeout));
    assert_eq!(outcome.observations.len(), 1);
    assert_eq!(outcome.observations[0].status, StatusLabel::Missing);
    assert!(outcome.observations[0].snapshot.missing);
}
