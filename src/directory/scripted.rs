use crate::directory::{AdminCommand, AdminCommandError, AdminCommandRunner, CommandOutput};
use std::sync::{Arc, Mutex};
use tokio::time::Duration;

type Responder = dyn Fn(&AdminCommand) -> Result<CommandOutput, AdminCommandError> + Send + Sync;

/// ScriptedRunner answers admin commands from a closure instead of spawning processes, and records
/// every command it was asked to run. Clones share the record.
#[derive(Clone)]
pub struct ScriptedRunner {
    responder: Arc<Responder>,
    history: Arc<Mutex<Vec<AdminCommand>>>,
}

impl ScriptedRunner {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&AdminCommand) -> Result<CommandOutput, AdminCommandError> + Send + Sync + 'static,
    {
        ScriptedRunner {
            responder: Arc::new(responder),
            history: Arc::new(Mutex::new(vec![])),
        }
    }

    /// A runner on which every command exits 0 and prints `stdout`.
    pub fn always(stdout: &str) -> Self {
        let stdout = stdout.to_string();
        ScriptedRunner::new(move |_| Ok(CommandOutput::ok(stdout.clone())))
    }

    pub fn history(&self) -> Vec<AdminCommand> {
        self.history.lock().expect("ScriptedRunner mutex guard poison").clone()
    }

    /// Commands whose program (argv[0]) is `program`.
    pub fn invocations_of(&self, program: &str) -> Vec<AdminCommand> {
        self.history()
            .into_iter()
            .filter(|command| command.program() == program)
            .collect()
    }
}

#[async_trait::async_trait]
impl AdminCommandRunner for ScriptedRunner {
    async fn run(&self, command: &AdminCommand, _timeout: Duration) -> Result<CommandOutput, AdminCommandError> {
        self.history
            .lock()
            .expect("ScriptedRunner mutex guard poison")
            .push(command.clone());
        (self.responder)(command)
    }
}
