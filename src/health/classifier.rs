use crate::observe::{AgreementSnapshot, ReplicaSnapshot};
use serde::Serialize;
use std::fmt;
use tokio::time::Duration;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Problem {
    /// The replica entry itself reports `nsds5ReplicaEnabled: off`.
    ReplicaDisabled,
    /// The last total init ended with a non-zero code.
    InitFailed,
    /// No successful update within the staleness window.
    Stale,
    /// The last update failed and nothing succeeded since, for longer than the staleness window.
    UpdateFailed,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Problem::ReplicaDisabled => "replica disabled",
            Problem::InitFailed => "init failed",
            Problem::Stale => "stale",
            Problem::UpdateFailed => "update failed",
        };
        f.write_str(text)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLabel {
    Healthy,
    Stale,
    Failed,
    Missing,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HealthThresholds {
    pub stale_threshold: Duration,
    pub require_init_success: bool,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        HealthThresholds {
            stale_threshold: Duration::from_secs(300),
            require_init_success: true,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Verdict {
    pub dn: String,
    pub problems: Vec<Problem>,
    pub label: StatusLabel,
}

impl Verdict {
    pub fn is_healthy(&self) -> bool {
        self.problems.is_empty()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Classification {
    /// One verdict per snapshot, in snapshot order.
    pub verdicts: Vec<Verdict>,
    /// Hints for every problem found, in verdict order, without duplicates.
    pub hints: Vec<String>,
}

impl Classification {
    pub fn unhealthy_count(&self) -> usize {
        self.verdicts.iter().filter(|v| !v.is_healthy()).count()
    }

    pub fn all_healthy(&self) -> bool {
        self.unhealthy_count() == 0
    }
}

/// Classify every agreement snapshot against the replica state and thresholds. Pure: the same
/// input always yields the same verdicts and hints.
pub fn classify(
    agreements: &[AgreementSnapshot],
    replica: &ReplicaSnapshot,
    thresholds: &HealthThresholds,
) -> Classification {
    let mut verdicts = Vec::with_capacity(agreements.len());
    let mut hints: Vec<String> = vec![];

    for snapshot in agreements {
        let problems = problems_of(snapshot, replica, thresholds);
        for problem in &problems {
            let hint = hint_for(snapshot, *problem, thresholds);
            if !hints.contains(&hint) {
                hints.push(hint);
            }
        }
        verdicts.push(Verdict {
            dn: snapshot.dn.clone(),
            label: label_for(snapshot, &problems),
            problems,
        });
    }

    Classification { verdicts, hints }
}

fn problems_of(snapshot: &AgreementSnapshot, replica: &ReplicaSnapshot, thresholds: &HealthThresholds) -> Vec<Problem> {
    let mut problems = vec![];

    if replica.enabled == Some(false) {
        problems.push(Problem::ReplicaDisabled);
    }

    if thresholds.require_init_success {
        if let Some(code) = snapshot.last_init_code {
            if code != 0 {
                problems.push(Problem::InitFailed);
            }
        }
    }

    let outside_window = !snapshot.is_fresh(thresholds.stale_threshold);
    let update_failed = matches!(snapshot.last_update_code, Some(code) if code != 0) && outside_window;
    if update_failed {
        problems.push(Problem::UpdateFailed);
    } else if outside_window && !snapshot.success_signal() {
        problems.push(Problem::Stale);
    }

    problems
}

fn label_for(snapshot: &AgreementSnapshot, problems: &[Problem]) -> StatusLabel {
    if snapshot.missing {
        StatusLabel::Missing
    } else if problems.iter().any(|p| *p != Problem::Stale) {
        StatusLabel::Failed
    } else if problems.contains(&Problem::Stale) {
        StatusLabel::Stale
    } else {
        StatusLabel::Healthy
    }
}

fn hint_for(snapshot: &AgreementSnapshot, problem: Problem, thresholds: &HealthThresholds) -> String {
    let dn = &snapshot.dn;
    match problem {
        Problem::ReplicaDisabled => format!("{}: Replica disabled", dn),
        Problem::InitFailed => format!("{}: Last init failed (code {})", dn, code_text(snapshot.last_init_code)),
        Problem::Stale => format!("{}: Last update stale >{}s", dn, thresholds.stale_threshold.as_secs()),
        Problem::UpdateFailed => format!(
            "{}: Replication update failed (code {})",
            dn,
            code_text(snapshot.last_update_code)
        ),
    }
}

fn code_text(code: Option<i64>) -> String {
    code.map(|c| c.to_string()).unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_735_734_655;
    const DN: &str = "cn=agmt to c1,cn=replica,cn=config";

    fn snapshot(update_code: Option<i64>, age: Option<i64>) -> AgreementSnapshot {
        AgreementSnapshot {
            missing: false,
            enabled: Some(true),
            busy: Some(false),
            last_init_code: Some(0),
            last_update_code: update_code,
            last_update_status: update_code.map(|c| format!("Error ({}) Replication error", c)),
            last_update_ended_at: age.map(|a| NOW - a),
            ..AgreementSnapshot::missing(DN, NOW, None)
        }
    }

    fn enabled_replica() -> ReplicaSnapshot {
        ReplicaSnapshot { enabled: Some(true) }
    }

    #[test]
    fn recent_success_is_healthy() {
        let result = classify(&[snapshot(Some(0), Some(10))], &enabled_replica(), &HealthThresholds::default());

        assert!(result.all_healthy());
        assert_eq!(result.verdicts[0].label, StatusLabel::Healthy);
        assert!(result.hints.is_empty());
    }

    #[test]
    fn old_failure_is_update_failed() {
        let result = classify(&[snapshot(Some(1), Some(400))], &enabled_replica(), &HealthThresholds::default());

        assert_eq!(result.verdicts[0].problems, vec![Problem::UpdateFailed]);
        assert_eq!(result.verdicts[0].label, StatusLabel::Failed);
        assert_eq!(result.hints, vec![format!("{}: Replication update failed (code 1)", DN)]);
    }

    #[test]
    fn fresh_failure_is_not_yet_a_failure() {
        let result = classify(&[snapshot(Some(1), Some(30))], &enabled_replica(), &HealthThresholds::default());

        assert!(result.all_healthy());
    }

    #[test]
    fn unknown_fields_are_stale_not_failed() {
        let result = classify(&[snapshot(None, None)], &enabled_replica(), &HealthThresholds::default());

        assert_eq!(result.verdicts[0].problems, vec![Problem::Stale]);
        assert_eq!(result.verdicts[0].label, StatusLabel::Stale);
        assert_eq!(result.hints, vec![format!("{}: Last update stale >300s", DN)]);
    }

    #[test]
    fn textual_success_counts_without_a_code() {
        let mut s = snapshot(None, Some(20));
        s.last_update_status = Some("Incremental update succeeded".into());

        let result = classify(&[s], &enabled_replica(), &HealthThresholds::default());
        assert!(result.all_healthy());

        // An old textual success is still a success signal, so it is not stale either.
        let mut s = snapshot(None, Some(4000));
        s.last_update_status = Some("Replica acquired successfully".into());
        let result = classify(&[s], &enabled_replica(), &HealthThresholds::default());
        assert!(result.all_healthy());
    }

    #[test]
    fn boundary_age_is_fresh() {
        let thresholds = HealthThresholds {
            stale_threshold: Duration::from_secs(60),
            require_init_success: true,
        };
        assert!(classify(&[snapshot(Some(1), Some(60))], &enabled_replica(), &thresholds).all_healthy());
        assert!(!classify(&[snapshot(Some(1), Some(61))], &enabled_replica(), &thresholds).all_healthy());
        // Clock skew puts the end in the future.
        assert!(!classify(&[snapshot(Some(1), Some(-5))], &enabled_replica(), &thresholds).all_healthy());
    }

    #[test]
    fn replica_and_init_problems() {
        let mut s = snapshot(Some(0), Some(5));
        s.last_init_code = Some(-1);

        let result = classify(&[s.clone()], &ReplicaSnapshot { enabled: Some(false) }, &HealthThresholds::default());
        assert_eq!(result.verdicts[0].problems, vec![Problem::ReplicaDisabled, Problem::InitFailed]);
        assert_eq!(
            result.hints,
            vec![format!("{}: Replica disabled", DN), format!("{}: Last init failed (code -1)", DN)]
        );

        let relaxed = HealthThresholds {
            require_init_success: false,
            ..HealthThresholds::default()
        };
        assert!(classify(&[s], &ReplicaSnapshot::default(), &relaxed).all_healthy());
    }

    #[test]
    fn missing_snapshots_are_labelled_missing() {
        let result = classify(
            &[AgreementSnapshot::missing(DN, NOW, None)],
            &ReplicaSnapshot::default(),
            &HealthThresholds::default(),
        );

        assert_eq!(result.verdicts[0].label, StatusLabel::Missing);
        assert_eq!(result.unhealthy_count(), 1);
    }

    #[test]
    fn classification_is_idempotent() {
        let batch = vec![snapshot(Some(0), Some(10)), snapshot(Some(1), Some(400)), snapshot(None, None)];
        let replica = enabled_replica();
        let thresholds = HealthThresholds::default();

        assert_eq!(classify(&batch, &replica, &thresholds), classify(&batch, &replica, &thresholds));
    }
}
