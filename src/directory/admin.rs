use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::Duration;

/// One invocation of an external administrative tool (`ldapsearch`, `dsconf`, ...).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AdminCommand {
    pub argv: Vec<String>,
    /// Added on top of the inherited environment.
    pub env: Vec<(String, String)>,
    pub stdin: Option<String>,
}

impl AdminCommand {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AdminCommand {
            argv: argv.into_iter().map(Into::into).collect(),
            env: vec![],
            stdin: None,
        }
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_stdin(mut self, stdin: String) -> Self {
        self.stdin = Some(stdin);
        self
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("")
    }

    /// Command line for logs, with the value after any `-w` (password) flag masked.
    pub fn redacted(&self) -> String {
        let mut out = Vec::with_capacity(self.argv.len());
        let mut mask_next = false;
        for arg in &self.argv {
            if mask_next {
                out.push("********");
                mask_next = false;
            } else {
                mask_next = arg == "-w";
                out.push(arg.as_str());
            }
        }
        out.join(" ")
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// -1 when the process was terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        CommandOutput {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        CommandOutput {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Short human-readable reason for a failure: stderr if present, otherwise stdout.
    pub fn diagnostic(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        text.chars().take(512).collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AdminCommandError {
    #[error("Empty command line")]
    EmptyCommand,

    #[error("Failed to launch {program}: {source}")]
    Spawn { program: String, source: std::io::Error },

    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("I/O failure talking to {program}: {source}")]
    Io { program: String, source: std::io::Error },
}

/// AdminCommandRunner is the capability to run external administrative tools. Non-zero exit codes
/// are returned as a normal `CommandOutput`; only failures to run the tool at all are errors.
#[async_trait::async_trait]
pub trait AdminCommandRunner: Send + Sync {
    async fn run(&self, command: &AdminCommand, timeout: Duration) -> Result<CommandOutput, AdminCommandError>;
}

/// Runs commands as local subprocesses. A process that outlives its timeout is killed.
#[derive(Copy, Clone, Debug, Default)]
pub struct ProcessRunner;

#[async_trait::async_trait]
impl AdminCommandRunner for ProcessRunner {
    async fn run(&self, command: &AdminCommand, timeout: Duration) -> Result<CommandOutput, AdminCommandError> {
        let (program, args) = match command.argv.split_first() {
            Some(split) => split,
            None => return Err(AdminCommandError::EmptyCommand),
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if command.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| AdminCommandError::Spawn {
            program: program.clone(),
            source,
        })?;

        if let (Some(input), Some(mut pipe)) = (&command.stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .await
                .map_err(|source| AdminCommandError::Io {
                    program: program.clone(),
                    source,
                })?;
            // Dropping the pipe closes it so the tool sees EOF.
        }

        // On timeout the wait future, and with it the child, is dropped. kill_on_drop reaps it.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| AdminCommandError::Io {
                program: program.clone(),
                source,
            })?,
            Err(_) => {
                return Err(AdminCommandError::Timeout {
                    program: program.clone(),
                    timeout,
                })
            }
        };

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_passwords() {
        let command = AdminCommand::new(vec!["ldapwhoami", "-x", "-D", "cn=dm", "-w", "secret", "-H", "ldapi://x"]);
        assert_eq!(command.redacted(), "ldapwhoami -x -D cn=dm -w ******** -H ldapi://x");
    }

    #[test]
    fn diagnostic_prefers_stderr_and_truncates() {
        let output = CommandOutput {
            exit_code: 1,
            stdout: "ignored".into(),
            stderr: format!("  {}  ", "x".repeat(600)),
        };
        assert_eq!(output.diagnostic().len(), 512);

        let output = CommandOutput {
            exit_code: 1,
            stdout: " only stdout ".into(),
            stderr: "".into(),
        };
        assert_eq!(output.diagnostic(), "only stdout");
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let result = ProcessRunner.run(&AdminCommand::default(), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(AdminCommandError::EmptyCommand)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_exit_code_and_stdin() {
        let command = AdminCommand::new(vec!["sh", "-c", "cat; echo oops >&2; exit 3"]).with_stdin("hello".into());
        let output = ProcessRunner.run(&command, Duration::from_secs(10)).await.unwrap();

        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout, "hello");
        assert_eq!(output.stderr.trim(), "oops");
        assert!(!output.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_commands_time_out() {
        let command = AdminCommand::new(vec!["sleep", "5"]);
        let result = ProcessRunner.run(&command, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(AdminCommandError::Timeout { .. })));
    }
}
