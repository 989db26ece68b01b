//! The convergence wait: poll, classify, decide, sleep, until the agreements are ready or time
//! runs out.
mod options;
mod outcome;
mod predicates;
mod state_machine;
mod trend;
mod wiring;

pub use options::ConvergenceOptions;
pub use options::ConvergencePolicy;
pub use options::PhaseRequirementOptions;
pub use options::PhaseRequirements;
pub use options::PhaseTimeoutOptions;
pub use options::PhaseTimeouts;
pub use outcome::FailureReason;
pub use outcome::ObservedAgreement;
pub use outcome::ProgressPoint;
pub use outcome::WaitOutcome;
pub use outcome::WaitStatus;
pub use predicates::PhaseSummary;
pub use wiring::wait_for_convergence;
pub use wiring::ConvergenceError;
pub use wiring::WaitConfig;
