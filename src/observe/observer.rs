use crate::backlog::BacklogMap;
use crate::directory::{cn_from_dn, Directory, DirectoryError, Entry};
use crate::observe::parse::{first_integer, generalized_time_to_epoch, parse_flag};
use crate::observe::{AgreementSnapshot, Observation, ReplicaSnapshot};

pub(crate) const REPLICA_ENABLED: &str = "nsds5ReplicaEnabled";
pub(crate) const LAST_INIT_STATUS: &str = "nsds5replicaLastInitStatus";
pub(crate) const LAST_INIT_END: &str = "nsds5replicaLastInitEnd";
pub(crate) const LAST_INIT_STATUS_JSON: &str = "nsds5replicaLastInitStatusJSON";
pub(crate) const LAST_UPDATE_STATUS: &str = "nsds5replicaLastUpdateStatus";
pub(crate) const LAST_UPDATE_START: &str = "nsds5replicaLastUpdateStart";
pub(crate) const LAST_UPDATE_END: &str = "nsds5replicaLastUpdateEnd";
pub(crate) const UPDATE_IN_PROGRESS: &str = "nsds5ReplicaUpdateInProgress";

const AGREEMENT_STATUS_ATTRIBUTES: &[&str] = &[
    REPLICA_ENABLED,
    LAST_INIT_STATUS,
    LAST_INIT_END,
    LAST_UPDATE_STATUS,
    LAST_UPDATE_START,
    LAST_UPDATE_END,
    UPDATE_IN_PROGRESS,
];

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ObserveError {
    /// Nothing in the batch could be read: the directory as a whole is unreachable.
    #[error("All {attempted} status reads failed. Last error: {last}")]
    AllReadsFailed { attempted: usize, last: DirectoryError },

    #[error("Agreement discovery under {replica_dn} failed: {source}")]
    Discovery { replica_dn: String, source: DirectoryError },
}

/// StatusObserver reads the replica entry and every targeted agreement once per call.
///
/// One unreadable agreement only turns that agreement's snapshot into a `missing` one. The call
/// fails only when no read at all succeeded, so the caller can retry a wholesale outage.
pub struct StatusObserver<'a, D: Directory + ?Sized> {
    logger: slog::Logger,
    directory: &'a D,
    replica_dn: String,
}

impl<'a, D: Directory + ?Sized> StatusObserver<'a, D> {
    pub fn new(logger: slog::Logger, directory: &'a D, replica_dn: &str) -> Self {
        StatusObserver {
            logger,
            directory,
            replica_dn: replica_dn.to_string(),
        }
    }

    pub fn replica_dn(&self) -> &str {
        &self.replica_dn
    }

    pub async fn observe(
        &self,
        agreement_dns: &[String],
        backlog: &BacklogMap,
        observed_at: i64,
    ) -> Result<Observation, ObserveError> {
        let mut failures = 0;
        let mut last_failure = None;

        let replica = match self.directory.read_entry(&self.replica_dn, &[REPLICA_ENABLED]).await {
            Ok(entry) => ReplicaSnapshot {
                enabled: entry.first(REPLICA_ENABLED).map(parse_flag),
            },
            Err(e) => {
                slog::debug!(self.logger, "Replica entry unreadable: {}", e);
                if !matches!(e, DirectoryError::NoSuchObject(_)) {
                    failures += 1;
                    last_failure = Some(e);
                }
                ReplicaSnapshot::default()
            }
        };

        let mut agreements = Vec::with_capacity(agreement_dns.len());
        for dn in agreement_dns {
            let backlog_count = backlog.get(cn_from_dn(dn)).copied();
            match self.directory.read_entry(dn, AGREEMENT_STATUS_ATTRIBUTES).await {
                Ok(entry) => agreements.push(snapshot_from_entry(dn, &entry, observed_at, backlog_count)),
                Err(e) => {
                    slog::debug!(self.logger, "Agreement unreadable"; "Agreement" => dn.as_str(), "Error" => %e);
                    // A definite "no such object" is an answer, not an outage.
                    if !matches!(e, DirectoryError::NoSuchObject(_)) {
                        failures += 1;
                        last_failure = Some(e);
                    }
                    agreements.push(AgreementSnapshot::missing(dn, observed_at, backlog_count));
                }
            }
        }

        let attempted = agreement_dns.len() + 1;
        if let Some(last) = last_failure {
            if failures == attempted {
                return Err(ObserveError::AllReadsFailed { attempted, last });
            }
        }

        Ok(Observation { replica, agreements })
    }
}

/// Build a snapshot from an agreement entry. Attributes that are absent stay `None`.
pub(crate) fn snapshot_from_entry(
    dn: &str,
    entry: &Entry,
    observed_at: i64,
    backlog_count: Option<i64>,
) -> AgreementSnapshot {
    let init_status = entry.first(LAST_INIT_STATUS).map(String::from);
    let update_status = entry.first(LAST_UPDATE_STATUS).map(String::from);

    AgreementSnapshot {
        dn: dn.to_string(),
        name: cn_from_dn(dn).to_string(),
        missing: false,
        enabled: entry.first(REPLICA_ENABLED).map(parse_flag),
        busy: entry.first(UPDATE_IN_PROGRESS).map(parse_flag),
        last_init_code: init_status.as_deref().and_then(first_integer),
        last_init_status: init_status,
        last_update_code: update_status.as_deref().and_then(first_integer),
        last_update_status: update_status,
        last_update_started_at: entry.first(LAST_UPDATE_START).and_then(generalized_time_to_epoch),
        last_update_ended_at: entry.first(LAST_UPDATE_END).and_then(generalized_time_to_epoch),
        backlog_count,
        observed_at,
    }
}

/// Snapshots for a cycle in which nothing could be observed.
pub(crate) fn all_missing(agreement_dns: &[String], backlog: &BacklogMap, observed_at: i64) -> Observation {
    Observation {
        replica: ReplicaSnapshot::default(),
        agreements: agreement_dns
            .iter()
            .map(|dn| AgreementSnapshot::missing(dn, observed_at, backlog.get(cn_from_dn(dn)).copied()))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryDirectory;

    const REPLICA: &str = "cn=replica,cn=dc\\3Dexample\\2Cdc\\3Dcom,cn=mapping tree,cn=config";

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn agreement(name: &str) -> String {
        format!("cn={},{}", name, REPLICA)
    }

    fn directory() -> InMemoryDirectory {
        let directory = InMemoryDirectory::new();
        directory.put(Entry::new(REPLICA).with_value(REPLICA_ENABLED, "on"));
        directory.put(
            Entry::new(agreement("agmt to c1"))
                .with_value("cn", "agmt to c1")
                .with_value(REPLICA_ENABLED, "on")
                .with_value(LAST_INIT_STATUS, "Error (0) Total update succeeded")
                .with_value(LAST_UPDATE_STATUS, "Error (0) Replica acquired successfully: Incremental update succeeded")
                .with_value(LAST_UPDATE_START, "20250101123040Z")
                .with_value(LAST_UPDATE_END, "20250101123045Z")
                .with_value(UPDATE_IN_PROGRESS, "FALSE"),
        );
        directory.put(Entry::new(agreement("agmt to c2")).with_value("cn", "agmt to c2"));
        directory
    }

    #[tokio::test]
    async fn reads_every_agreement() {
        let directory = directory();
        let observer = StatusObserver::new(logger(), &directory, REPLICA);
        let mut backlog = BacklogMap::new();
        backlog.insert("agmt to c1".into(), 4);

        let observation = observer
            .observe(&[agreement("agmt to c1"), agreement("agmt to c2")], &backlog, 1_735_734_655)
            .await
            .unwrap();

        assert_eq!(observation.replica.enabled, Some(true));
        let c1 = &observation.agreements[0];
        assert_eq!(c1.enabled, Some(true));
        assert_eq!(c1.busy, Some(false));
        assert_eq!(c1.last_init_code, Some(0));
        assert_eq!(c1.last_update_code, Some(0));
        assert_eq!(c1.last_update_started_at, Some(1_735_734_640));
        assert_eq!(c1.update_age(), Some(10));
        assert_eq!(c1.backlog_count, Some(4));

        // Attributes the server didn't report are unknown, not false or zero.
        let c2 = &observation.agreements[1];
        assert!(!c2.missing);
        assert_eq!(c2.enabled, None);
        assert_eq!(c2.busy, None);
        assert_eq!(c2.last_update_code, None);
        assert_eq!(c2.backlog_count, None);
    }

    #[tokio::test]
    async fn one_unreadable_agreement_does_not_blind_the_rest() {
        let directory = directory();
        directory.fail_reads_of(&agreement("agmt to c2"), DirectoryError::Timeout(std::time::Duration::from_secs(30)));
        let observer = StatusObserver::new(logger(), &directory, REPLICA);

        let observation = observer
            .observe(
                &[agreement("agmt to c1"), agreement("agmt to c2"), agreement("agmt to gone")],
                &BacklogMap::new(),
                0,
            )
            .await
            .unwrap();

        assert!(!observation.agreements[0].missing);
        assert!(observation.agreements[1].missing);
        assert!(observation.agreements[2].missing);
    }

    #[tokio::test]
    async fn wholesale_outage_is_an_error() {
        let directory = directory();
        directory.set_unavailable(Some(DirectoryError::Unreachable("ldapi down".into())));
        let observer = StatusObserver::new(logger(), &directory, REPLICA);

        let result = observer.observe(&[agreement("agmt to c1")], &BacklogMap::new(), 0).await;

        match result {
            Err(ObserveError::AllReadsFailed { attempted: 2, last }) => {
                assert!(crate::retry::is_retryable(&last.to_string()));
            }
            other => panic!("Unexpected result: {:?}", other),
        }
    }
}
