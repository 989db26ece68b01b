use crate::directory::{AdminCommandRunner, Directory, DsconfTarget};
use crate::provision::{ProvisionError, Provisioner};
use crate::time::Clock;
use serde::Serialize;
use tokio::time::Duration;

const INIT_SUCCESS_MARKERS: [&str; 2] = ["successfully initialized", "total init succeeded"];

#[derive(Clone, Debug)]
pub struct InitSpec {
    pub suffix: String,
    /// Agreement name (its cn).
    pub agreement: String,
    pub target: DsconfTarget,
    /// Poll `init-status` until the consumer reports a finished total init.
    pub wait: bool,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl InitSpec {
    pub fn new(suffix: &str, agreement: &str, target: DsconfTarget) -> Self {
        InitSpec {
            suffix: suffix.to_string(),
            agreement: agreement.to_string(),
            target,
            wait: false,
            timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct InitOutcome {
    pub changed: bool,
    /// Last `init-status` output, when waiting.
    pub status: Option<String>,
    pub polls: u32,
    pub elapsed_s: u64,
}

fn init_succeeded(status: &str) -> bool {
    let status = status.to_ascii_lowercase();
    INIT_SUCCESS_MARKERS.iter().any(|marker| status.contains(marker))
}

impl<'a, D, R, C> Provisioner<'a, D, R, C>
where
    D: Directory + ?Sized,
    R: AdminCommandRunner + ?Sized,
    C: Clock,
{
    /// Start a total initialization of the consumer behind an agreement, optionally waiting for it
    /// to finish. Initialization is always a change.
    pub async fn initialize_agreement(&mut self, spec: &InitSpec) -> Result<InitOutcome, ProvisionError> {
        if spec.poll_interval.is_zero() {
            return Err(ProvisionError::InvalidRequest("Init poll interval must be positive"));
        }
        if self.check_mode {
            return Ok(InitOutcome {
                changed: true,
                status: None,
                polls: 0,
                elapsed_s: 0,
            });
        }

        let start = self.clock.now();
        let command = spec
            .target
            .command(false, &["repl-agmt", "init", "--suffix", &spec.suffix, &spec.agreement]);
        let output = self.run(&command).await?;
        if !output.success() {
            return Err(ProvisionError::CommandExit {
                action: "dsconf repl-agmt init",
                code: output.exit_code,
                diagnostic: output.diagnostic(),
            });
        }
        slog::info!(self.logger, "Started total init of {} for {}", spec.agreement, spec.suffix);

        if !spec.wait {
            return Ok(InitOutcome {
                changed: true,
                status: None,
                polls: 0,
                elapsed_s: 0,
            });
        }

        let deadline = start + spec.timeout;
        let status_command = spec
            .target
            .command(false, &["repl-agmt", "init-status", "--suffix", &spec.suffix, &spec.agreement]);
        let mut polls = 0u32;
        let mut last_status = String::new();

        while self.clock.now() < deadline {
            polls += 1;
            let output = self.run(&status_command).await?;
            last_status = format!("{}{}", output.stdout, output.stderr).trim().to_string();

            if init_succeeded(&last_status) {
                let elapsed_s = (self.clock.now() - start).as_secs();
                slog::info!(self.logger, "Init of {} finished after {} polls", spec.agreement, polls);
                return Ok(InitOutcome {
                    changed: true,
                    status: Some(last_status),
                    polls,
                    elapsed_s,
                });
            }

            if polls % 10 == 0 || last_status.to_ascii_lowercase().contains("error") {
                slog::info!(self.logger, "Init status of {} (poll {}): {}", spec.agreement, polls, last_status);
            }

            let wake = std::cmp::min(self.clock.now() + spec.poll_interval, deadline);
            self.clock.sleep_until(wake).await;
        }

        Err(ProvisionError::InitTimeout { last_status })
    }
}
