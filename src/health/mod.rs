//! Per-agreement health verdicts and the hints that explain them.
mod classifier;
mod hints;

pub use classifier::classify;
pub use classifier::Classification;
pub use classifier::HealthThresholds;
pub use classifier::Problem;
pub use classifier::StatusLabel;
pub use classifier::Verdict;
pub use hints::HintSet;
