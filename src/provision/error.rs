use crate::directory::{AdminCommandError, DirectoryError};
use crate::retry::RetryError;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("Invalid request: {0}")]
    InvalidRequest(&'static str),

    #[error("Replica entry missing for suffix {suffix}. Enable replication on the suffix first")]
    ReplicaMissing { suffix: String },

    #[error("Failed to {action}: {source}")]
    Directory {
        action: String,
        source: RetryError<DirectoryError>,
    },

    #[error("Failed to run {program}: {source}")]
    Command {
        program: String,
        source: RetryError<AdminCommandError>,
    },

    #[error("{action} failed (rc={code}): {diagnostic}")]
    CommandExit {
        action: &'static str,
        code: i32,
        diagnostic: String,
    },

    #[error("Replication not enabled after dsconf run")]
    NotEnabledAfterRun,

    #[error("Timeout waiting for successful initialization. Last status: {last_status}")]
    InitTimeout { last_status: String },
}

/// Whether the managed object should exist.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Present,
    Absent,
}

impl Default for Presence {
    fn default() -> Self {
        Presence::Present
    }
}

/// Result of an idempotent directory change.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ProvisionOutcome {
    pub changed: bool,
    pub dn: String,
    pub warnings: Vec<String>,
}

impl ProvisionOutcome {
    pub(crate) fn new(changed: bool, dn: impl Into<String>) -> Self {
        ProvisionOutcome {
            changed,
            dn: dn.into(),
            warnings: vec![],
        }
    }
}
