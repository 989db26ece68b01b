//! Best-effort backlog sampling from the replication monitor.
mod sampler;

pub use sampler::extract_backlogs;
pub use sampler::should_refresh;
pub use sampler::BacklogMap;
pub use sampler::BacklogProbe;
pub use sampler::DsconfBacklogSampler;
pub use sampler::NoBacklog;
