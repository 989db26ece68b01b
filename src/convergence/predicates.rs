use crate::convergence::trend::TrendTracker;
use crate::health::HealthThresholds;
use crate::observe::{AgreementSnapshot, Observation};
use serde::Serialize;

/// The three readiness phases, computed over every targeted agreement in one cycle.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct PhaseSummary {
    /// Every agreement reports itself enabled.
    pub configured: bool,
    /// At least one agreement is busy, moved forward since the last cycle, or just succeeded.
    pub working: bool,
    /// Every agreement is idle, initialized, recently successful, and has no backlog.
    pub finished: bool,
}

/// Evaluate the phase predicates for one observation batch, updating `trend` for every
/// agreement in it.
pub(crate) fn evaluate(
    observation: &Observation,
    trend: &mut TrendTracker,
    thresholds: &HealthThresholds,
) -> PhaseSummary {
    let agreements = &observation.agreements;
    let any = !agreements.is_empty();

    let mut summary = PhaseSummary {
        configured: any,
        working: false,
        finished: any,
    };

    for snapshot in agreements {
        let moving = trend.record(snapshot);
        let recent_ok = snapshot.succeeded_recently(thresholds.stale_threshold);
        let busy = snapshot.busy == Some(true);

        if snapshot.enabled != Some(true) {
            summary.configured = false;
        }
        if busy || moving || recent_ok {
            summary.working = true;
        }
        if busy || !init_ok(snapshot, thresholds) || !recent_ok || !backlog_drained(snapshot) {
            summary.finished = false;
        }
    }

    summary
}

fn init_ok(snapshot: &AgreementSnapshot, thresholds: &HealthThresholds) -> bool {
    !thresholds.require_init_success || matches!(snapshot.last_init_code, None | Some(0))
}

fn backlog_drained(snapshot: &AgreementSnapshot) -> bool {
    matches!(snapshot.backlog_count, None | Some(0))
}
