use clap::{Args, Parser, Subcommand, ValueEnum};
use ds_repl::{
    agreement_dn, cancellation, replica_dn, replication_info, wait_for_convergence, BacklogProbe, BindMethod,
    ConvergenceError, ConvergenceOptions, DsconfBacklogSampler, InfoConfig, LdapCliDirectory, LdapConnParams, NoBacklog,
    PhaseRequirementOptions, PhaseTimeoutOptions, RealClock, Targets, WaitConfig,
};
use serde::Serialize;
use slog::Drain;
use std::process::ExitCode;
use tokio::time::Duration;

const EXIT_FAILED: u8 = 1;
const EXIT_CONFIG: u8 = 2;

#[derive(Parser)]
#[command(name = "ds-repl")]
#[command(about = "Wait for and report on 389 Directory Server replication", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log every poll cycle
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Poll agreements until replication has converged or a timeout passes
    Wait(WaitArgs),
    /// Print a one-shot report of the replica and its agreements
    Info(InfoArgs),
}

#[derive(Copy, Clone, ValueEnum)]
enum BindMethodArg {
    Simple,
    Sslclientauth,
}

#[derive(Args)]
struct Connection {
    /// Instance name, with or without the slapd- prefix
    #[arg(long)]
    instance: String,

    #[arg(long)]
    suffix: String,

    /// Don't try the local LDAPI sockets
    #[arg(long)]
    no_ldapi: bool,

    #[arg(long)]
    ldaps_host: Option<String>,

    #[arg(long, default_value_t = 636)]
    ldaps_port: u16,

    #[arg(long, value_enum, default_value = "simple")]
    bind_method: BindMethodArg,

    #[arg(long)]
    bind_dn: Option<String>,

    #[arg(long, env = "DS_REPL_BIND_PW", hide_env_values = true)]
    bind_pw: Option<String>,

    #[arg(long)]
    tls_ca: Option<String>,

    #[arg(long)]
    tls_client_cert: Option<String>,

    #[arg(long)]
    tls_client_key: Option<String>,

    /// Seconds
    #[arg(long, default_value_t = 5)]
    connect_timeout: u64,

    /// Seconds
    #[arg(long, default_value_t = 30)]
    op_timeout: u64,

    /// Skip backlog sampling through `dsconf replication monitor`
    #[arg(long)]
    no_monitor: bool,

    /// Seconds
    #[arg(long, default_value_t = 10)]
    monitor_timeout: u64,
}

#[derive(Args)]
struct WaitArgs {
    #[command(flatten)]
    connection: Connection,

    /// Agreement name or DN to wait for. Repeatable; all agreements under the replica when absent
    #[arg(long = "agreement")]
    agreements: Vec<String>,

    /// Seconds
    #[arg(long)]
    stale_threshold: Option<u64>,

    #[arg(long)]
    steady_ok_polls: Option<u32>,

    /// Seconds
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Seconds
    #[arg(long)]
    backoff_after: Option<u64>,

    /// Seconds
    #[arg(long)]
    backoff_poll_interval: Option<u64>,

    /// Seconds
    #[arg(long)]
    timeout: Option<u64>,

    #[arg(long)]
    require_init_success: Option<bool>,

    #[arg(long)]
    monitor_every: Option<u64>,

    #[arg(long)]
    log_every: Option<u64>,

    /// Decide success by readiness phase: agreements enabled
    #[arg(long)]
    require_configured: Option<bool>,

    /// Decide success by readiness phase: replication activity observed
    #[arg(long)]
    require_working: Option<bool>,

    /// Decide success by readiness phase: nothing left to replicate
    #[arg(long)]
    require_finished: Option<bool>,

    /// Seconds
    #[arg(long)]
    configured_timeout: Option<u64>,

    /// Seconds
    #[arg(long)]
    start_timeout: Option<u64>,

    /// Seconds
    #[arg(long)]
    done_timeout: Option<u64>,

    /// Seed for retry jitter
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args)]
struct InfoArgs {
    #[command(flatten)]
    connection: Connection,

    /// Only report agreements whose name or DN contains this. Repeatable
    #[arg(long = "agreement")]
    agreements: Vec<String>,

    /// Seconds
    #[arg(long, default_value_t = 120)]
    stale_threshold: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let logger = create_root_logger(cli.verbose);

    let code = match cli.command {
        Command::Wait(args) => wait(logger, args).await,
        Command::Info(args) => info(logger, args).await,
    };
    ExitCode::from(code)
}

fn create_root_logger(verbose: bool) -> slog::Logger {
    let level = if verbose { slog::Level::Debug } else { slog::Level::Info };
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().filter_level(level).fuse();

    slog::Logger::root(drain, slog::o!())
}

fn seconds(value: Option<u64>) -> Option<Duration> {
    value.map(Duration::from_secs)
}

fn conn_params(connection: &Connection) -> LdapConnParams {
    LdapConnParams {
        use_ldapi: !connection.no_ldapi,
        ldaps_host: connection.ldaps_host.clone(),
        ldaps_port: connection.ldaps_port,
        bind_method: match connection.bind_method {
            BindMethodArg::Simple => BindMethod::Simple,
            BindMethodArg::Sslclientauth => BindMethod::SslClientAuth,
        },
        bind_dn: connection.bind_dn.clone(),
        bind_pw: connection.bind_pw.clone(),
        tls_ca: connection.tls_ca.clone(),
        tls_client_cert: connection.tls_client_cert.clone(),
        tls_client_key: connection.tls_client_key.clone(),
        connect_timeout: Duration::from_secs(connection.connect_timeout),
        op_timeout: Duration::from_secs(connection.op_timeout),
        ..LdapConnParams::ldapi(&connection.instance)
    }
}

fn backlog_probe(logger: &slog::Logger, connection: &Connection) -> Box<dyn BacklogProbe> {
    if connection.no_monitor {
        return Box::new(NoBacklog);
    }
    let mut sampler = DsconfBacklogSampler::new(logger.clone(), &connection.instance)
        .with_timeout(Duration::from_secs(connection.monitor_timeout));
    if let (Some(host), Some(dn), Some(pw)) = (&connection.ldaps_host, &connection.bind_dn, &connection.bind_pw) {
        sampler = sampler.with_ldaps_fallback(host, connection.ldaps_port, dn, pw);
    }
    Box::new(sampler)
}

fn wait_options(args: &WaitArgs) -> ConvergenceOptions {
    let phase_mode = args.require_configured.is_some() || args.require_working.is_some() || args.require_finished.is_some();

    ConvergenceOptions {
        stale_threshold: seconds(args.stale_threshold),
        steady_ok_polls: args.steady_ok_polls,
        poll_interval: seconds(args.poll_interval),
        backoff_after: seconds(args.backoff_after),
        backoff_poll_interval: seconds(args.backoff_poll_interval),
        overall_timeout: seconds(args.timeout),
        require_init_success: args.require_init_success,
        monitor_enabled: Some(!args.connection.no_monitor),
        monitor_every: args.monitor_every,
        log_every: args.log_every,
        require: if phase_mode {
            Some(PhaseRequirementOptions {
                configured: args.require_configured,
                working: args.require_working,
                finished: args.require_finished,
            })
        } else {
            None
        },
        timeouts: PhaseTimeoutOptions {
            configured: seconds(args.configured_timeout),
            start: seconds(args.start_timeout),
            done: seconds(args.done_timeout),
        },
    }
}

/// Agreement arguments that look like a DN are used as given; anything else is an agreement name
/// under the suffix's replica entry.
fn wait_targets(suffix: &str, agreements: &[String]) -> Targets {
    if agreements.is_empty() {
        return Targets::AllUnderReplica;
    }
    let replica = replica_dn(suffix);
    Targets::Explicit(
        agreements
            .iter()
            .map(|agreement| {
                if agreement.contains('=') {
                    agreement.clone()
                } else {
                    agreement_dn(agreement, &replica)
                }
            })
            .collect(),
    )
}

fn print_json<T: Serialize>(logger: &slog::Logger, value: &T) -> bool {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            true
        }
        Err(e) => {
            slog::error!(logger, "Could not serialize result: {}", e);
            false
        }
    }
}

#[derive(Serialize)]
struct ErrorReport {
    error: String,
}

async fn wait(logger: slog::Logger, args: WaitArgs) -> u8 {
    let connection = &args.connection;
    let directory = LdapCliDirectory::new(logger.clone(), conn_params(connection));
    let probe = backlog_probe(&logger, connection);
    let targets = wait_targets(&connection.suffix, &args.agreements);

    let (cancel_handle, cancel) = cancellation();
    let ctrl_c_logger = logger.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            slog::warn!(ctrl_c_logger, "Interrupted, stopping the wait");
            cancel_handle.cancel();
        }
    });

    let mut config = WaitConfig::new(logger.clone(), wait_options(&args), RealClock);
    config.cancel = cancel;
    config.rng_seed = args.seed;

    match wait_for_convergence(&directory, &*probe, &connection.suffix, &targets, config).await {
        Ok(outcome) => {
            if !print_json(&logger, &outcome) {
                return EXIT_FAILED;
            }
            if outcome.succeeded() {
                0
            } else {
                slog::warn!(logger, "{}", outcome.message);
                EXIT_FAILED
            }
        }
        Err(e) => {
            slog::error!(logger, "{}", e);
            print_json(&logger, &ErrorReport { error: e.to_string() });
            match e {
                ConvergenceError::TargetDiscovery(_) => EXIT_FAILED,
                ConvergenceError::InvalidPolicy(_)
                | ConvergenceError::InvalidRetryPolicy(_)
                | ConvergenceError::NoTargets { .. } => EXIT_CONFIG,
            }
        }
    }
}

async fn info(logger: slog::Logger, args: InfoArgs) -> u8 {
    let connection = &args.connection;
    let directory = LdapCliDirectory::new(logger.clone(), conn_params(connection));
    let probe = backlog_probe(&logger, connection);

    let mut config = InfoConfig::new(logger.clone(), RealClock);
    config.filters = args.agreements.clone();
    config.stale_threshold = Duration::from_secs(args.stale_threshold);

    match replication_info(&directory, &*probe, &connection.suffix, config).await {
        Ok(report) => {
            if print_json(&logger, &report) {
                0
            } else {
                EXIT_FAILED
            }
        }
        Err(e) => {
            slog::error!(logger, "{}", e);
            print_json(&logger, &ErrorReport { error: e.to_string() });
            EXIT_FAILED
        }
    }
}
