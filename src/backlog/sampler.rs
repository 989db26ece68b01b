use crate::directory::{AdminCommandRunner, DsconfTarget, ProcessRunner};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::time::Duration;

/// Pending change count per agreement name (`cn`).
pub type BacklogMap = BTreeMap<String, i64>;

/// BacklogProbe is a best-effort source of backlog counts. It never fails: a probe that can't
/// get an answer returns an empty map.
#[async_trait::async_trait]
pub trait BacklogProbe: Send + Sync {
    async fn sample(&self, suffix: &str) -> BacklogMap;
}

/// Probe that never reports a backlog. Used when monitoring is turned off.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoBacklog;

#[async_trait::async_trait]
impl BacklogProbe for NoBacklog {
    async fn sample(&self, _suffix: &str) -> BacklogMap {
        BacklogMap::new()
    }
}

/// Samples backlog through `dsconf -j <url> replication monitor --suffix <suffix>`, trying the
/// local LDAPI sockets first and then an optional LDAPS target with credentials.
pub struct DsconfBacklogSampler<R: AdminCommandRunner = ProcessRunner> {
    logger: slog::Logger,
    runner: R,
    targets: Vec<DsconfTarget>,
    timeout: Duration,
}

impl DsconfBacklogSampler<ProcessRunner> {
    pub fn new(logger: slog::Logger, instance: &str) -> Self {
        DsconfBacklogSampler::with_runner(logger, instance, ProcessRunner)
    }
}

impl<R: AdminCommandRunner> DsconfBacklogSampler<R> {
    pub fn with_runner(logger: slog::Logger, instance: &str, runner: R) -> Self {
        DsconfBacklogSampler {
            logger,
            runner,
            targets: DsconfTarget::local_sockets(instance),
            timeout: Duration::from_secs(10),
        }
    }

    /// Fall back to `ldaps://host:port` with simple bind credentials when no LDAPI socket answers.
    pub fn with_ldaps_fallback(mut self, host: &str, port: u16, bind_dn: &str, bind_pw: &str) -> Self {
        self.targets.push(DsconfTarget::Url {
            url: format!("ldaps://{}:{}", host, port),
            bind_dn: Some(bind_dn.to_string()),
            bind_pw: Some(bind_pw.to_string()),
        });
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl<R: AdminCommandRunner> BacklogProbe for DsconfBacklogSampler<R> {
    async fn sample(&self, suffix: &str) -> BacklogMap {
        for target in &self.targets {
            let command = target.command(true, &["replication", "monitor", "--suffix", suffix]);
            let output = match self.runner.run(&command, self.timeout).await {
                Ok(output) => output,
                Err(e) => {
                    slog::debug!(self.logger, "Backlog monitor did not run: {}", e);
                    continue;
                }
            };
            if !output.success() || output.stdout.trim().is_empty() {
                slog::debug!(self.logger, "Backlog monitor failed: {}", output.diagnostic());
                continue;
            }
            match serde_json::from_str::<Value>(&output.stdout) {
                Ok(json) => return extract_backlogs(&json),
                Err(e) => slog::debug!(self.logger, "Backlog monitor output is not JSON: {}", e),
            }
        }

        BacklogMap::new()
    }
}

/// Walk a monitor report and collect, from every object that has a string `name`, the value of
/// any key containing "backlog" that reads as an integer. Later keys win within one object.
pub fn extract_backlogs(report: &Value) -> BacklogMap {
    let mut out = BacklogMap::new();
    walk(report, &mut out);
    out
}

fn walk(value: &Value, out: &mut BacklogMap) {
    match value {
        Value::Object(map) => {
            let name = map.get("name").and_then(Value::as_str);
            let mut backlog = None;
            for (key, v) in map {
                if key.to_lowercase().contains("backlog") {
                    if let Some(count) = as_count(v) {
                        backlog = Some(count);
                    }
                }
            }
            if let (Some(name), Some(backlog)) = (name, backlog) {
                if !name.is_empty() {
                    out.insert(name.to_string(), backlog);
                }
            }
            for v in map.values() {
                walk(v, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(item, out);
            }
        }
        _ => {}
    }
}

fn as_count(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

/// Whether poll `cycle` (1-based) refreshes the backlog: always on the first cycle, then every
/// `every` cycles. `every == 0` never refreshes after the first.
pub fn should_refresh(cycle: u64, every: u64) -> bool {
    cycle == 1 || (every > 0 && cycle % every == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{AdminCommandError, CommandOutput, ScriptedRunner};
    use serde_json::json;

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    #[test]
    fn extracts_nested_backlogs() {
        let report = json!({
            "type": "list",
            "items": [{
                "name": "ds1:636",
                "data": [
                    {"name": "agmt to c1", "replica-backlog": 12, "status": "ok"},
                    {"name": "agmt to c2", "Backlog": "0"},
                    {"name": "agmt to c3", "backlog": "n/a"},
                    {"agmt-name": "no name key", "backlog": 4},
                    {"name": "agmt to c4", "maxcsn_backlog": 2.9},
                ]
            }]
        });

        let backlogs = extract_backlogs(&report);
        let expected: BacklogMap = vec![
            ("agmt to c1".to_string(), 12),
            ("agmt to c2".to_string(), 0),
            ("agmt to c4".to_string(), 2),
        ]
        .into_iter()
        .collect();
        assert_eq!(backlogs, expected);
    }

    #[test]
    fn refresh_cadence() {
        let refreshed: Vec<u64> = (1..=10).filter(|c| should_refresh(*c, 3)).collect();
        assert_eq!(refreshed, vec![1, 3, 6, 9]);

        assert!(should_refresh(1, 0));
        assert!(!should_refresh(2, 0));
    }

    #[tokio::test]
    async fn falls_through_sockets_to_ldaps() {
        let runner = ScriptedRunner::new(|command| {
            if command.argv.iter().any(|a| a.starts_with("ldaps://")) {
                Ok(CommandOutput::ok(r#"{"items": [{"name": "agmt to c1", "replica-backlog": 3}]}"#))
            } else {
                Ok(CommandOutput::failed(1, "Can't contact LDAP server"))
            }
        });
        let sampler = DsconfBacklogSampler::with_runner(logger(), "example", runner.clone()).with_ldaps_fallback(
            "ds1.example.com",
            636,
            "cn=Directory Manager",
            "secret",
        );

        let backlogs = sampler.sample("dc=example,dc=com").await;

        assert_eq!(backlogs.get("agmt to c1"), Some(&3));
        let history = runner.history();
        assert_eq!(history.len(), 3);
        assert_eq!(
            history[0].argv,
            vec![
                "dsconf",
                "-j",
                "ldapi://%2Frun%2Fslapd-example.socket",
                "replication",
                "monitor",
                "--suffix",
                "dc=example,dc=com"
            ]
        );
    }

    #[tokio::test]
    async fn failures_yield_an_empty_map() {
        let runner = ScriptedRunner::new(|command| {
            if command.argv[2].contains("%2Frun") && !command.argv[2].contains("data") {
                Err(AdminCommandError::Timeout {
                    program: "dsconf".into(),
                    timeout: Duration::from_secs(10),
                })
            } else {
                Ok(CommandOutput::ok("this is not json"))
            }
        });
        let sampler = DsconfBacklogSampler::with_runner(logger(), "example", runner.clone());

        assert!(sampler.sample("dc=example,dc=com").await.is_empty());
        assert_eq!(runner.history().len(), 2);
        assert!(NoBacklog.sample("dc=example,dc=com").await.is_empty());
    }
}
