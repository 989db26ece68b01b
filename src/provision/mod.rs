mod agreement;
mod binddn;
mod enable;
mod error;
mod init;
mod manager;
mod provisioner;

pub use agreement::AgreementSpec;
pub use agreement::Transport;
pub use enable::EnableOutcome;
pub use enable::EnableSpec;
pub use enable::ReplicaDetails;
pub use enable::ReplicaRole;
pub use error::Presence;
pub use error::ProvisionError;
pub use error::ProvisionOutcome;
pub use init::InitOutcome;
pub use init::InitSpec;
pub use manager::ManagerSpec;
pub use provisioner::Provisioner;
