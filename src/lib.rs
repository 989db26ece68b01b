mod backlog;
mod convergence;
mod directory;
mod health;
mod observe;
mod provision;
mod report;
mod retry;
mod time;

pub use backlog::extract_backlogs;
pub use backlog::should_refresh;
pub use backlog::BacklogMap;
pub use backlog::BacklogProbe;
pub use backlog::DsconfBacklogSampler;
pub use backlog::NoBacklog;
pub use convergence::wait_for_convergence;
pub use convergence::ConvergenceError;
pub use convergence::ConvergenceOptions;
pub use convergence::ConvergencePolicy;
pub use convergence::FailureReason;
pub use convergence::ObservedAgreement;
pub use convergence::PhaseRequirementOptions;
pub use convergence::PhaseRequirements;
pub use convergence::PhaseSummary;
pub use convergence::PhaseTimeoutOptions;
pub use convergence::PhaseTimeouts;
pub use convergence::ProgressPoint;
pub use convergence::WaitConfig;
pub use convergence::WaitOutcome;
pub use convergence::WaitStatus;
pub use directory::agreement_dn;
pub use directory::candidate_ldapi_urls;
pub use directory::cn_from_dn;
pub use directory::escape_filter_value;
pub use directory::escape_suffix;
pub use directory::ldapi_url;
pub use directory::parent_dn;
pub use directory::replica_dn;
pub use directory::AdminCommand;
pub use directory::AdminCommandError;
pub use directory::AdminCommandRunner;
pub use directory::BindMethod;
pub use directory::Change;
pub use directory::CommandOutput;
pub use directory::Directory;
pub use directory::DirectoryError;
pub use directory::DsconfTarget;
pub use directory::Entry;
pub use directory::InMemoryDirectory;
pub use directory::LdapCliDirectory;
pub use directory::LdapConnParams;
pub use directory::Mutation;
pub use directory::ProcessRunner;
pub use directory::Scope;
pub use directory::ScriptedRunner;
pub use health::classify;
pub use health::Classification;
pub use health::HealthThresholds;
pub use health::HintSet;
pub use health::Problem;
pub use health::StatusLabel;
pub use health::Verdict;
pub use observe::first_integer;
pub use observe::generalized_time_to_epoch;
pub use observe::leading_integer;
pub use observe::parse_flag;
pub use observe::resolve_targets;
pub use observe::AgreementSnapshot;
pub use observe::ObserveError;
pub use observe::Observation;
pub use observe::ReplicaSnapshot;
pub use observe::StatusObserver;
pub use observe::Targets;
pub use provision::AgreementSpec;
pub use provision::EnableOutcome;
pub use provision::EnableSpec;
pub use provision::InitOutcome;
pub use provision::InitSpec;
pub use provision::ManagerSpec;
pub use provision::Presence;
pub use provision::ProvisionError;
pub use provision::ProvisionOutcome;
pub use provision::Provisioner;
pub use provision::ReplicaDetails;
pub use provision::ReplicaRole;
pub use provision::Transport;
pub use report::replication_info;
pub use report::AgreementInfo;
pub use report::InfoConfig;
pub use report::InfoError;
pub use report::InfoSummary;
pub use report::ReplicaInfo;
pub use report::ReplicationInfo;
pub use retry::is_retryable;
pub use retry::BreakerPhase;
pub use retry::CircuitBreaker;
pub use retry::RetryError;
pub use retry::RetryExecutor;
pub use retry::RetryPolicy;
pub use time::cancellation;
pub use time::mocked_clock;
pub use time::CancelHandle;
pub use time::CancelSignal;
pub use time::Clock;
pub use time::MockClock;
pub use time::MockClockController;
pub use time::RealClock;

