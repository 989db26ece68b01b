//! One-shot replication report.
mod info;

pub use info::replication_info;
pub use info::AgreementInfo;
pub use info::InfoConfig;
pub use info::InfoError;
pub use info::InfoSummary;
pub use info::ReplicaInfo;
pub use info::ReplicationInfo;
