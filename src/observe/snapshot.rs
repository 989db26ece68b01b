use crate::directory::cn_from_dn;
use serde::Serialize;
use tokio::time::Duration;

/// Status text fragments that mean the last update went through, even when the text carries no
/// numeric code.
const SUCCESS_KEYWORDS: &[&str] = &["succeed", "acquired successfully", "incremental update succeeded"];

/// One observation of one replication agreement. `None` means "not observed", which is never the
/// same as false or zero.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct AgreementSnapshot {
    pub dn: String,
    /// The agreement's `cn`, which is also how the backlog monitor names it.
    pub name: String,
    /// The agreement could not be read this cycle.
    pub missing: bool,
    pub enabled: Option<bool>,
    pub busy: Option<bool>,
    pub last_init_code: Option<i64>,
    pub last_init_status: Option<String>,
    pub last_update_code: Option<i64>,
    pub last_update_status: Option<String>,
    /// Epoch seconds.
    pub last_update_started_at: Option<i64>,
    /// Epoch seconds.
    pub last_update_ended_at: Option<i64>,
    pub backlog_count: Option<i64>,
    /// Wall-clock epoch seconds at which the agreement was read.
    pub observed_at: i64,
}

impl AgreementSnapshot {
    /// Snapshot for an agreement that could not be read.
    pub fn missing(dn: &str, observed_at: i64, backlog_count: Option<i64>) -> Self {
        AgreementSnapshot {
            dn: dn.to_string(),
            name: cn_from_dn(dn).to_string(),
            missing: true,
            enabled: None,
            busy: None,
            last_init_code: None,
            last_init_status: None,
            last_update_code: None,
            last_update_status: None,
            last_update_started_at: None,
            last_update_ended_at: None,
            backlog_count,
            observed_at,
        }
    }

    /// Seconds since the last update ended. Negative under clock skew.
    pub fn update_age(&self) -> Option<i64> {
        self.last_update_ended_at.map(|ended| self.observed_at - ended)
    }

    /// The latest update succeeded, by code or by status text.
    pub fn success_signal(&self) -> bool {
        if self.last_update_code == Some(0) {
            return true;
        }
        match &self.last_update_status {
            Some(status) => {
                let status = status.to_lowercase();
                SUCCESS_KEYWORDS.iter().any(|keyword| status.contains(keyword))
            }
            None => false,
        }
    }

    /// The last update ended no more than `stale_threshold` ago. Unknown or negative ages are not
    /// fresh; an age equal to the threshold is.
    pub fn is_fresh(&self, stale_threshold: Duration) -> bool {
        match self.update_age() {
            Some(age) => age >= 0 && age as u64 <= stale_threshold.as_secs(),
            None => false,
        }
    }

    pub fn succeeded_recently(&self, stale_threshold: Duration) -> bool {
        self.success_signal() && self.is_fresh(stale_threshold)
    }
}

/// State of the replica entry that owns the agreements.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ReplicaSnapshot {
    pub enabled: Option<bool>,
}

/// One coherent batch of snapshots, gathered in the same cycle.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Observation {
    pub replica: ReplicaSnapshot,
    pub agreements: Vec<AgreementSnapshot>,
}
