mod admin;
mod api;
mod dn;
mod dsconf;
mod in_memory;
mod ldap_cli;
mod ldif;
mod scripted;

pub use admin::AdminCommand;
pub use admin::AdminCommandError;
pub use admin::AdminCommandRunner;
pub use admin::CommandOutput;
pub use admin::ProcessRunner;
pub use api::Change;
pub use api::Directory;
pub use api::DirectoryError;
pub use api::Entry;
pub use api::Mutation;
pub use api::Scope;
pub use dn::agreement_dn;
pub use dn::cn_from_dn;
pub use dn::escape_filter_value;
pub use dn::escape_suffix;
pub use dn::parent_dn;
pub use dn::replica_dn;
pub use dsconf::DsconfTarget;
pub use in_memory::InMemoryDirectory;
pub use ldap_cli::candidate_ldapi_urls;
pub use ldap_cli::ldapi_url;
pub use ldap_cli::BindMethod;
pub use ldap_cli::LdapCliDirectory;
pub use ldap_cli::LdapConnParams;
pub use scripted::ScriptedRunner;
