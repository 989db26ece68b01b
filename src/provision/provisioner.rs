use crate::directory::{
    AdminCommand, AdminCommandRunner, CommandOutput, Directory, DirectoryError, Entry, Mutation, Scope,
};
use crate::provision::ProvisionError;
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::time::Clock;
use tokio::time::Duration;

/// Provisioner applies idempotent replication setup changes. Directory writes go through `mutate`,
/// administrative tools through the command runner, and both through one retry executor.
///
/// In check mode nothing is written; each operation only reports whether it would change
/// something.
pub struct Provisioner<'a, D, R, C>
where
    D: Directory + ?Sized,
    R: AdminCommandRunner + ?Sized,
    C: Clock,
{
    pub(super) logger: slog::Logger,
    pub(super) directory: &'a D,
    pub(super) runner: &'a R,
    pub(super) executor: RetryExecutor<C>,
    pub(super) clock: C,
    pub(super) check_mode: bool,
    pub(super) command_timeout: Duration,
}

impl<'a, D, R, C> Provisioner<'a, D, R, C>
where
    D: Directory + ?Sized,
    R: AdminCommandRunner + ?Sized,
    C: Clock,
{
    pub fn new(logger: slog::Logger, directory: &'a D, runner: &'a R, policy: RetryPolicy, clock: C) -> Self {
        let executor = RetryExecutor::with_clock(logger.clone(), policy, clock.clone());

        Provisioner {
            logger,
            directory,
            runner,
            executor,
            clock,
            check_mode: false,
            command_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_check_mode(mut self, check_mode: bool) -> Self {
        self.check_mode = check_mode;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Read one entry, or `None` if it doesn't exist.
    pub(super) async fn read_optional(&mut self, dn: &str, attributes: &[&str]) -> Result<Option<Entry>, ProvisionError> {
        let directory = self.directory;
        let result = self.executor.execute(move || directory.read_entry(dn, attributes)).await;

        match result {
            Ok(entry) => Ok(Some(entry)),
            Err(e) if matches!(e.last_error(), Some(DirectoryError::NoSuchObject(_))) => Ok(None),
            Err(source) => Err(ProvisionError::Directory {
                action: format!("read {}", dn),
                source,
            }),
        }
    }

    pub(super) async fn search_one_level(
        &mut self,
        base: &str,
        filter: &str,
        attributes: &[&str],
    ) -> Result<Vec<Entry>, ProvisionError> {
        let directory = self.directory;
        self.executor
            .execute(move || directory.query(Scope::OneLevel, base, filter, attributes))
            .await
            .map_err(|source| ProvisionError::Directory {
                action: format!("search under {}", base),
                source,
            })
    }

    pub(super) async fn mutate(&mut self, dn: &str, mutation: &Mutation) -> Result<(), ProvisionError> {
        slog::debug!(self.logger, "Updating {}", dn);
        let directory = self.directory;
        self.executor
            .execute(move || directory.mutate(dn, mutation))
            .await
            .map_err(|source| ProvisionError::Directory {
                action: format!("update {}", dn),
                source,
            })
    }

    /// Run an admin command. Only failures to run the tool are retried; a non-zero exit is
    /// returned to the caller to interpret.
    pub(super) async fn run(&mut self, command: &AdminCommand) -> Result<CommandOutput, ProvisionError> {
        slog::debug!(self.logger, "Running {}", command.redacted());
        let runner = self.runner;
        let timeout = self.command_timeout;
        self.executor
            .execute(move || runner.run(command, timeout))
            .await
            .map_err(|source| ProvisionError::Command {
                program: command.program().to_string(),
                source,
            })
    }
}
