use crate::backlog::{BacklogMap, BacklogProbe};
use crate::directory::{cn_from_dn, replica_dn, Directory, DirectoryError, Entry, Scope};
use crate::health::HintSet;
use crate::observe::{generalized_time_to_epoch, leading_integer, parse_flag};
use crate::observe::{
    LAST_INIT_END, LAST_INIT_STATUS, LAST_INIT_STATUS_JSON, LAST_UPDATE_END, LAST_UPDATE_START, LAST_UPDATE_STATUS,
    REPLICA_ENABLED, UPDATE_IN_PROGRESS,
};
use crate::time::Clock;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Duration;

const RUV: &str = "nsds50ruv";
const HOST: &str = "nsds5ReplicaHost";
const PORT: &str = "nsds5ReplicaPort";
const BIND_DN: &str = "nsds5ReplicaBindDN";
const AGREEMENT_FILTER: &str = "(objectClass=nsDS5ReplicationAgreement)";

const AGREEMENT_ATTRIBUTES: &[&str] = &[
    "cn",
    HOST,
    PORT,
    BIND_DN,
    REPLICA_ENABLED,
    LAST_INIT_STATUS,
    LAST_INIT_END,
    LAST_INIT_STATUS_JSON,
    LAST_UPDATE_STATUS,
    LAST_UPDATE_START,
    LAST_UPDATE_END,
    UPDATE_IN_PROGRESS,
];

pub struct InfoConfig<C: Clock> {
    pub logger: slog::Logger,
    /// Only report agreements whose cn or DN contains one of these, ignoring case. Empty means all.
    pub filters: Vec<String>,
    pub stale_threshold: Duration,
    pub clock: C,
}

impl<C: Clock> InfoConfig<C> {
    pub fn new(logger: slog::Logger, clock: C) -> Self {
        InfoConfig {
            logger,
            filters: vec![],
            stale_threshold: Duration::from_secs(120),
            clock,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InfoError {
    #[error("Replica entry missing for suffix {suffix}: {source}")]
    ReplicaUnreadable { suffix: String, source: DirectoryError },
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ReplicaInfo {
    pub dn: String,
    pub enabled: Option<bool>,
    pub ruv: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct AgreementInfo {
    pub dn: String,
    pub name: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub bind_dn: Option<String>,
    pub enabled: Option<bool>,
    pub busy: Option<bool>,
    /// `Done`, `Unknown`, or the state reported by the init status JSON.
    pub init_status: Option<String>,
    pub last_init_status: Option<String>,
    pub last_init_code: Option<i64>,
    pub last_init_end: Option<String>,
    pub last_init_epoch: Option<i64>,
    pub last_update_status: Option<String>,
    pub last_update_code: Option<i64>,
    pub last_update_start: Option<String>,
    pub last_update_start_epoch: Option<i64>,
    pub last_update_end: Option<String>,
    pub last_update_epoch: Option<i64>,
    pub backlog: Option<i64>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct InfoSummary {
    pub configured: bool,
    pub working: bool,
    pub finished: bool,
    pub problems: Vec<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ReplicationInfo {
    pub replica: ReplicaInfo,
    pub agreements: Vec<AgreementInfo>,
    pub summary: InfoSummary,
}

/// One-shot report of the replica and its agreements, with a coarse summary of where replication
/// stands. Unlike a wait, nothing is retried and an unreadable agreement list is reported as empty.
pub async fn replication_info<D, B, C>(
    directory: &D,
    backlog_probe: &B,
    suffix: &str,
    config: InfoConfig<C>,
) -> Result<ReplicationInfo, InfoError>
where
    D: Directory + ?Sized,
    B: BacklogProbe + ?Sized,
    C: Clock,
{
    let logger = config.logger.new(slog::o!("Suffix" => suffix.to_string()));
    let replica_dn = replica_dn(suffix);

    let replica_entry = directory
        .read_entry(&replica_dn, &[REPLICA_ENABLED, RUV])
        .await
        .map_err(|source| InfoError::ReplicaUnreadable {
            suffix: suffix.to_string(),
            source,
        })?;
    let replica = ReplicaInfo {
        dn: replica_dn.clone(),
        enabled: replica_entry.first(REPLICA_ENABLED).map(parse_flag),
        ruv: replica_entry.first(RUV).map(String::from),
    };

    let entries = match directory
        .query(Scope::OneLevel, &replica_dn, AGREEMENT_FILTER, AGREEMENT_ATTRIBUTES)
        .await
    {
        Ok(entries) => entries,
        Err(e) => {
            slog::warn!(logger, "Could not list agreements: {}", e);
            vec![]
        }
    };

    let backlog = backlog_probe.sample(suffix).await;
    let agreements: Vec<AgreementInfo> = entries
        .iter()
        .filter(|entry| matches_filters(entry, &config.filters))
        .map(|entry| agreement_info(entry, &backlog))
        .collect();
    slog::debug!(logger, "Reporting {} of {} agreements", agreements.len(), entries.len());

    let summary = summarize(&agreements, config.clock.unix_time(), config.stale_threshold);

    Ok(ReplicationInfo {
        replica,
        agreements,
        summary,
    })
}

fn entry_name(entry: &Entry) -> String {
    entry
        .first("cn")
        .map(String::from)
        .unwrap_or_else(|| cn_from_dn(entry.dn()).to_string())
}

fn matches_filters(entry: &Entry, filters: &[String]) -> bool {
    if filters.is_empty() {
        return true;
    }
    let name = entry_name(entry).to_lowercase();
    let dn = entry.dn().to_lowercase();
    filters.iter().any(|filter| {
        let filter = filter.to_lowercase();
        name.contains(&filter) || dn.contains(&filter)
    })
}

fn agreement_info(entry: &Entry, backlog: &BacklogMap) -> AgreementInfo {
    let name = entry_name(entry);
    let owned = |attribute: &str| entry.first(attribute).map(String::from);

    let last_init_status = owned(LAST_INIT_STATUS);
    let last_init_code = last_init_status.as_deref().and_then(leading_integer);
    let last_update_status = owned(LAST_UPDATE_STATUS);
    let last_init_end = owned(LAST_INIT_END);
    let last_update_start = owned(LAST_UPDATE_START);
    let last_update_end = owned(LAST_UPDATE_END);

    AgreementInfo {
        dn: entry.dn().to_string(),
        host: owned(HOST),
        port: entry.first(PORT).and_then(|port| port.trim().parse().ok()),
        bind_dn: owned(BIND_DN),
        enabled: entry.first(REPLICA_ENABLED).map(parse_flag),
        busy: entry.first(UPDATE_IN_PROGRESS).map(parse_flag),
        init_status: init_label(entry.first(LAST_INIT_STATUS_JSON), last_init_status.as_deref(), last_init_code),
        last_init_code,
        last_init_epoch: last_init_end.as_deref().and_then(generalized_time_to_epoch),
        last_init_end,
        last_init_status,
        last_update_code: last_update_status.as_deref().and_then(leading_integer),
        last_update_status,
        last_update_start_epoch: last_update_start.as_deref().and_then(generalized_time_to_epoch),
        last_update_start,
        last_update_epoch: last_update_end.as_deref().and_then(generalized_time_to_epoch),
        last_update_end,
        backlog: backlog.get(&name).copied(),
        name,
    }
}

/// Init status label. The JSON status wins: `initialized` decides Done or Unknown, otherwise a
/// `state` of green/succeeded/success is Done and anything else is reported title-cased. Without
/// JSON, code 0 is Done and any other non-empty status Unknown.
fn init_label(status_json: Option<&str>, status: Option<&str>, code: Option<i64>) -> Option<String> {
    let from_json = status_json
        .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
        .and_then(|json| match (json.get("initialized"), json.get("state")) {
            (Some(Value::Bool(true)), _) => Some("Done".to_string()),
            (Some(Value::Bool(false)), _) => Some("Unknown".to_string()),
            (_, Some(Value::String(state))) => {
                let state = state.to_lowercase();
                if matches!(state.as_str(), "green" | "succeeded" | "success") {
                    Some("Done".to_string())
                } else {
                    Some(title_case(&state))
                }
            }
            _ => None,
        });
    if from_json.is_some() {
        return from_json;
    }

    match (status, code) {
        (Some(_), Some(0)) => Some("Done".to_string()),
        (Some(status), _) if !status.is_empty() => Some("Unknown".to_string()),
        _ => None,
    }
}

fn title_case(text: &str) -> String {
    text.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn recent_success(agreement: &AgreementInfo, now: i64, stale_threshold: Duration) -> bool {
    agreement.last_update_code == Some(0)
        && agreement
            .last_update_epoch
            .map_or(false, |ended| now - ended <= stale_threshold.as_secs() as i64)
}

fn summarize(agreements: &[AgreementInfo], now: i64, stale_threshold: Duration) -> InfoSummary {
    let stale_secs = stale_threshold.as_secs();
    let mut problems = HintSet::new();

    let configured = agreements.iter().any(|a| a.enabled == Some(true));
    if !configured {
        problems.insert("No enabled agreements for suffix");
    }

    let working = agreements
        .iter()
        .any(|a| a.busy == Some(true) || recent_success(a, now, stale_threshold));
    if !working {
        for agreement in agreements {
            let name = &agreement.name;
            match (agreement.last_update_code, agreement.last_update_epoch) {
                (Some(code), _) if code != 0 => problems.insert(format!("{}: update failed (code {})", name, code)),
                (_, None) => problems.insert(format!("{}: no update timestamp observed", name)),
                (_, Some(ended)) if now - ended > stale_secs as i64 => {
                    problems.insert(format!("{}: last update stale >{}s", name, stale_secs))
                }
                _ => {}
            }
        }
    }

    let finished = !agreements.is_empty()
        && agreements.iter().all(|a| {
            let init_ok = matches!(a.last_init_code, None | Some(0))
                || matches!(a.init_status.as_deref(), Some("Done") | Some("Completed"));
            a.busy != Some(true)
                && init_ok
                && recent_success(a, now, stale_threshold)
                && a.backlog.map_or(true, |count| count == 0)
        });

    InfoSummary {
        configured,
        working,
        finished,
        problems: problems.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backlog::NoBacklog;
    use crate::directory::InMemoryDirectory;
    use crate::time::mocked_clock;
    use async_trait::async_trait;

    const SUFFIX: &str = "dc=example,dc=com";
    const UPDATE_END: &str = "20250907091740Z";

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

    fn agreement(name: &str, update_status: &str) -> Entry {
        Entry::new(format!("cn={},{}", name, replica_dn(SUFFIX)))
            .with_value("objectClass", "nsDS5ReplicationAgreement")
            .with_value("cn", name)
            .with_value(HOST, "c1.example.com")
            .with_value(PORT, "636")
            .with_value(BIND_DN, "cn=replication manager,cn=config")
            .with_value(REPLICA_ENABLED, "on")
            .with_value(UPDATE_IN_PROGRESS, "FALSE")
            .with_value(LAST_INIT_STATUS, "0 Total init succeeded")
            .with_value(LAST_INIT_END, "20250907091531Z")
            .with_value(LAST_UPDATE_STATUS, update_status)
            .with_value(LAST_UPDATE_START, "20250907091739Z")
            .with_value(LAST_UPDATE_END, UPDATE_END)
    }

    fn directory_with(agreements: Vec<Entry>) -> InMemoryDirectory {
        let directory = InMemoryDirectory::new();
        directory.put(
            Entry::new(replica_dn(SUFFIX))
                .with_value(REPLICA_ENABLED, "on")
                .with_value(RUV, "{replicageneration} 5f0c1a2b000000010000"),
        );
        for entry in agreements {
            directory.put(entry);
        }
        directory
    }

    fn config_at(age: i64) -> InfoConfig<crate::time::MockClock> {
        let ended = generalized_time_to_epoch(UPDATE_END).unwrap();
        let (clock, _) = mocked_clock(ended + age);
        InfoConfig::new(logger(), clock)
    }

    #[tokio::test]
    async fn reports_healthy_replication() {
        let directory = directory_with(vec![agreement("agmt to c1", "0 Replica acquired successfully")]);
        let backlog = FixedBacklog([("agmt to c1".to_string(), 0)].into_iter().collect());

        let info = replication_info(&directory, &backlog, SUFFIX, config_at(30)).await.unwrap();

        assert_eq!(info.replica.enabled, Some(true));
        assert!(info.replica.ruv.is_some());
        let agreement = &info.agreements[0];
        assert_eq!(agreement.port, Some(636));
        assert_eq!(agreement.busy, Some(false));
        assert_eq!(agreement.init_status.as_deref(), Some("Done"));
        assert_eq!(agreement.last_init_code, Some(0));
        assert_eq!(agreement.backlog, Some(0));
        assert_eq!(
            info.summary,
            InfoSummary {
                configured: true,
                working: true,
                finished: true,
                problems: vec![],
            }
        );
    }

    #[tokio::test]
    async fn update_code_must_lead_the_status() {
        let directory = directory_with(vec![agreement("agmt to c1", "Error (0) Replica acquired successfully")]);
        let info = replication_info(&directory, &NoBacklog, SUFFIX, config_at(30)).await.unwrap();
        assert_eq!(info.agreements[0].last_update_code, None);
        assert!(!info.summary.working);
    }

    #[tokio::test]
    async fn explains_why_nothing_is_working() {
        let directory = directory_with(vec![
            agreement("agmt to c1", "1 Replication error acquiring replica"),
            agreement("agmt to c2", "0 Incremental update succeeded"),
        ]);

        let info = replication_info(&directory, &NoBacklog, SUFFIX, config_at(500)).await.unwrap();

        assert!(info.summary.configured);
        assert!(!info.summary.working);
        assert!(!info.summary.finished);
        assert_eq!(
            info.summary.problems,
            vec![
                "agmt to c1: update failed (code 1)".to_string(),
                "agmt to c2: last update stale >120s".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn filters_agreements_by_name_or_dn() {
        let directory = directory_with(vec![
            agreement("agmt to c1", "0 Incremental update succeeded"),
            agreement("agmt to c2", "0 Incremental update succeeded"),
        ]);
        let mut config = config_at(10);
        config.filters = vec!["C2".to_string()];

        let info = replication_info(&directory, &NoBacklog, SUFFIX, config).await.unwrap();

        assert_eq!(info.agreements.len(), 1);
        assert_eq!(info.agreements[0].name, "agmt to c2");
    }

    #[tokio::test]
    async fn no_agreements_is_a_problem() {
        let directory = directory_with(vec![]);
        let info = replication_info(&directory, &NoBacklog, SUFFIX, config_at(0)).await.unwrap();

        assert!(!info.summary.configured);
        assert!(!info.summary.finished);
        assert_eq!(info.summary.problems, vec!["No enabled agreements for suffix".to_string()]);
    }

    #[tokio::test]
    async fn missing_replica_is_an_error() {
        let directory = InMemoryDirectory::new();
        let result = replication_info(&directory, &NoBacklog, SUFFIX, config_at(0)).await;
        assert!(matches!(result, Err(InfoError::ReplicaUnreadable { .. })));
    }

    #[test]
    fn init_label_prefers_json() {
        assert_eq!(init_label(Some(r#"{"initialized": true}"#), None, None).as_deref(), Some("Done"));
        assert_eq!(
            init_label(Some(r#"{"state": "in progress"}"#), Some("0 ok"), Some(0)).as_deref(),
            Some("In Progress")
        );
        assert_eq!(init_label(Some(r#"{"state": "GREEN"}"#), None, None).as_deref(), Some("Done"));
        assert_eq!(init_label(Some("not json"), Some("0 Total init succeeded"), Some(0)).as_deref(), Some("Done"));
        assert_eq!(init_label(None, Some("-1 Failed"), Some(-1)).as_deref(), Some("Unknown"));
        assert_eq!(init_label(None, None, None), None);
    }
}
