use crate::directory::{AdminCommandRunner, Directory, DsconfTarget};
use crate::provision::{ProvisionError, Provisioner};
use crate::time::Clock;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaRole {
    Supplier,
    Hub,
    Consumer,
}

impl ReplicaRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicaRole::Supplier => "supplier",
            ReplicaRole::Hub => "hub",
            ReplicaRole::Consumer => "consumer",
        }
    }

    /// Only suppliers and hubs carry a replica id on the command line.
    fn takes_replica_id(&self) -> bool {
        !matches!(self, ReplicaRole::Consumer)
    }
}

#[derive(Clone, Debug)]
pub struct EnableSpec {
    pub suffix: String,
    pub role: ReplicaRole,
    pub replica_id: Option<u16>,
    pub target: DsconfTarget,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ReplicaDetails {
    pub replica_type: Option<String>,
    pub replica_id: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct EnableOutcome {
    pub changed: bool,
    pub enabled: bool,
    pub details: Option<ReplicaDetails>,
}

struct ReplicaState {
    enabled: bool,
    details: ReplicaDetails,
}

/// Pull the replica attributes out of `dsconf -j replication get`. Attribute names are
/// lowercased and single-valued attributes are taken from the first element.
fn parse_replica_state(stdout: &str) -> Option<ReplicaState> {
    let document: Value = serde_json::from_str(stdout.trim()).ok()?;
    let attrs = document.get("attrs")?.as_object()?;

    let flattened: HashMap<String, String> = attrs
        .iter()
        .filter_map(|(key, value)| {
            let first = match value {
                Value::Array(values) => values.first()?.clone(),
                other => other.clone(),
            };
            let text = match first {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            Some((key.to_ascii_lowercase(), text))
        })
        .collect();

    let replica_type = flattened.get("nsds5replicatype").cloned();
    Some(ReplicaState {
        enabled: replica_type.as_deref().map_or(false, |t| !t.trim().is_empty()),
        details: ReplicaDetails {
            replica_type,
            replica_id: flattened.get("nsds5replicaid").cloned(),
        },
    })
}

impl<'a, D, R, C> Provisioner<'a, D, R, C>
where
    D: Directory + ?Sized,
    R: AdminCommandRunner + ?Sized,
    C: Clock,
{
    async fn replica_state(&mut self, target: &DsconfTarget, suffix: &str) -> Result<Option<ReplicaState>, ProvisionError> {
        let command = target.command(true, &["replication", "get", "--suffix", suffix]);
        let output = self.run(&command).await?;
        if !output.success() {
            slog::debug!(self.logger, "No replica configuration for {}: {}", suffix, output.diagnostic());
            return Ok(None);
        }
        Ok(parse_replica_state(&output.stdout))
    }

    /// Enable replication on a suffix with `dsconf replication enable`, unless it already is.
    pub async fn enable_replication(&mut self, spec: &EnableSpec) -> Result<EnableOutcome, ProvisionError> {
        if let Some(state) = self.replica_state(&spec.target, &spec.suffix).await? {
            if state.enabled {
                return Ok(EnableOutcome {
                    changed: false,
                    enabled: true,
                    details: Some(state.details),
                });
            }
        }

        if self.check_mode {
            return Ok(EnableOutcome {
                changed: true,
                enabled: false,
                details: None,
            });
        }

        let mut args = vec![
            "replication".to_string(),
            "enable".to_string(),
            "--suffix".to_string(),
            spec.suffix.clone(),
            "--role".to_string(),
            spec.role.as_str().to_string(),
        ];
        if let (true, Some(id)) = (spec.role.takes_replica_id(), spec.replica_id) {
            args.push("--replica-id".to_string());
            args.push(id.to_string());
        }
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let command = spec.target.command(false, &args);

        let output = self.run(&command).await?;
        if !output.success() {
            let diagnostic = output.diagnostic();
            if diagnostic.to_ascii_lowercase().contains("already enabled") {
                slog::info!(self.logger, "Replication on {} was enabled concurrently", spec.suffix);
            } else {
                return Err(ProvisionError::CommandExit {
                    action: "dsconf replication enable",
                    code: output.exit_code,
                    diagnostic,
                });
            }
        }

        match self.replica_state(&spec.target, &spec.suffix).await? {
            Some(state) if state.enabled => {
                slog::info!(self.logger, "Enabled replication on {} as {}", spec.suffix, spec.role.as_str());
                Ok(EnableOutcome {
                    changed: true,
                    enabled: true,
                    details: Some(state.details),
                })
            }
            _ => Err(ProvisionError::NotEnabledAfterRun),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{AdminCommand, CommandOutput, InMemoryDirectory, ScriptedRunner};
    use crate::retry::RetryPolicy;
    use crate::time::mocked_clock;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    const SUFFIX: &str = "dc=example,dc=com";
    const ENABLED: &str = r#"{"type": "entry", "dn": "cn=replica", "attrs": {"nsDS5ReplicaType": ["3"], "nsDS5ReplicaId": ["7"]}}"#;
    const DISABLED: &str = r#"{"type": "entry", "dn": "cn=replica", "attrs": {"cn": ["replica"]}}"#;

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn spec(role: ReplicaRole) -> EnableSpec {
        EnableSpec {
            suffix: SUFFIX.into(),
            role,
            replica_id: Some(7),
            target: DsconfTarget::Instance("example".into()),
        }
    }

    fn is_enable(command: &AdminCommand) -> bool {
        command.argv.iter().any(|a| a == "enable")
    }

    /// Reports the replica as disabled until an enable command has run.
    fn enabling_runner(enable_result: CommandOutput) -> ScriptedRunner {
        let enabled = Arc::new(AtomicBool::new(false));
        ScriptedRunner::new(move |command| {
            if is_enable(command) {
                enabled.store(true, Ordering::SeqCst);
                Ok(enable_result.clone())
            } else if enabled.load(Ordering::SeqCst) {
                Ok(CommandOutput::ok(ENABLED))
            } else {
                Ok(CommandOutput::ok(DISABLED))
            }
        })
    }

    #[test]
    fn parses_replica_state() {
        let state = parse_replica_state(ENABLED).unwrap();
        assert!(state.enabled);
        assert_eq!(state.details.replica_type.as_deref(), Some("3"));
        assert_eq!(state.details.replica_id.as_deref(), Some("7"));

        assert!(!parse_replica_state(DISABLED).unwrap().enabled);
        assert!(parse_replica_state("not json").is_none());
    }

    #[tokio::test]
    async fn already_enabled_is_unchanged() {
        let directory = InMemoryDirectory::new();
        let runner = ScriptedRunner::always(ENABLED);
        let (clock, _) = mocked_clock(0);
        let mut provisioner = Provisioner::new(logger(), &directory, &runner, RetryPolicy::no_retry(), clock);

        let outcome = provisioner.enable_replication(&spec(ReplicaRole::Supplier)).await.unwrap();

        assert!(!outcome.changed);
        assert!(outcome.enabled);
        assert!(!runner.history().iter().any(is_enable));
    }

    #[tokio::test]
    async fn enables_supplier_with_replica_id() {
        let directory = InMemoryDirectory::new();
        let runner = enabling_runner(CommandOutput::ok(""));
        let (clock, _) = mocked_clock(0);
        let mut provisioner = Provisioner::new(logger(), &directory, &runner, RetryPolicy::no_retry(), clock);

        let outcome = provisioner.enable_replication(&spec(ReplicaRole::Supplier)).await.unwrap();

        assert!(outcome.changed);
        assert!(outcome.enabled);
        let enable = runner.history().into_iter().find(is_enable).unwrap();
        assert_eq!(
            enable.argv,
            vec![
                "dsconf",
                "example",
                "replication",
                "enable",
                "--suffix",
                SUFFIX,
                "--role",
                "supplier",
                "--replica-id",
                "7"
            ]
        );
    }

    #[tokio::test]
    async fn consumer_has_no_replica_id() {
        let directory = InMemoryDirectory::new();
        let runner = enabling_runner(CommandOutput::ok(""));
        let (clock, _) = mocked_clock(0);
        let mut provisioner = Provisioner::new(logger(), &directory, &runner, RetryPolicy::no_retry(), clock);

        provisioner.enable_replication(&spec(ReplicaRole::Consumer)).await.unwrap();

        let enable = runner.history().into_iter().find(is_enable).unwrap();
        assert!(!enable.argv.iter().any(|a| a == "--replica-id"));
    }

    #[tokio::test]
    async fn tolerates_concurrent_enable() {
        let directory = InMemoryDirectory::new();
        let runner = enabling_runner(CommandOutput::failed(1, "Error: Replication is already enabled for this suffix"));
        let (clock, _) = mocked_clock(0);
        let mut provisioner = Provisioner::new(logger(), &directory, &runner, RetryPolicy::no_retry(), clock);

        let outcome = provisioner.enable_replication(&spec(ReplicaRole::Supplier)).await.unwrap();
        assert!(outcome.enabled);
    }

    #[tokio::test]
    async fn reports_failures() {
        let directory = InMemoryDirectory::new();
        let runner = enabling_runner(CommandOutput::failed(1, "Error: invalid replica id"));
        let (clock, _) = mocked_clock(0);
        let mut provisioner = Provisioner::new(logger(), &directory, &runner, RetryPolicy::no_retry(), clock);

        let result = provisioner.enable_replication(&spec(ReplicaRole::Supplier)).await;
        assert!(matches!(
            result,
            Err(ProvisionError::CommandExit {
                action: "dsconf replication enable",
                code: 1,
                ..
            })
        ));

        let never_enables = ScriptedRunner::always(DISABLED);
        let (clock, _) = mocked_clock(0);
        let mut provisioner = Provisioner::new(logger(), &directory, &never_enables, RetryPolicy::no_retry(), clock);
        let result = provisioner.enable_replication(&spec(ReplicaRole::Supplier)).await;
        assert!(matches!(result, Err(ProvisionError::NotEnabledAfterRun)));
    }

    #[tokio::test]
    async fn check_mode_does_not_run_enable() {
        let directory = InMemoryDirectory::new();
        let runner = ScriptedRunner::always(DISABLED);
        let (clock, _) = mocked_clock(0);
        let mut provisioner =
            Provisioner::new(logger(), &directory, &runner, RetryPolicy::no_retry(), clock).with_check_mode(true);

        let outcome = provisioner.enable_replication(&spec(ReplicaRole::Hub)).await.unwrap();

        assert!(outcome.changed);
        assert!(!runner.history().iter().any(is_enable));
    }
}
