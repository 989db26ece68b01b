use crate::convergence::PhaseSummary;
use crate::health::StatusLabel;
use crate::observe::AgreementSnapshot;
use serde::Serialize;

/// Progress trail entries kept per wait.
pub(crate) const PROGRESS_LIMIT: usize = 50;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    ConfiguredTimeout,
    StartTimeout,
    DoneTimeout,
    OverallTimeout,
    Cancelled,
}

impl FailureReason {
    pub fn message(&self) -> &'static str {
        match self {
            FailureReason::ConfiguredTimeout => "Replication not configured in time",
            FailureReason::StartTimeout => "Replication did not start within timeout",
            FailureReason::DoneTimeout => "Replication did not finish within timeout",
            FailureReason::OverallTimeout => "Agreements not healthy within timeout",
            FailureReason::Cancelled => "Wait cancelled before replication converged",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum WaitStatus {
    Succeeded,
    Failed(FailureReason),
}

/// Last observation of one agreement, as reported to the caller.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ObservedAgreement {
    #[serde(flatten)]
    pub snapshot: AgreementSnapshot,
    pub update_age: Option<i64>,
    pub status: StatusLabel,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ProgressPoint {
    pub cycle: u64,
    pub elapsed_s: u64,
    pub unhealthy: usize,
}

/// Result of a wait, successful or not, with everything known when it ended.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct WaitOutcome {
    #[serde(flatten)]
    pub status: WaitStatus,
    pub message: String,
    pub observations: Vec<ObservedAgreement>,
    pub summary: PhaseSummary,
    /// Sorted, without duplicates.
    pub hints: Vec<String>,
    pub cycles: u64,
    pub elapsed_s: u64,
    pub agreements: usize,
    pub progress: Vec<ProgressPoint>,
}

impl WaitOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == WaitStatus::Succeeded
    }

    pub fn reason(&self) -> Option<FailureReason> {
        match self.status {
            WaitStatus::Succeeded => None,
            WaitStatus::Failed(reason) => Some(reason),
        }
    }
}
