use crate::directory::{agreement_dn, Directory, Scope};
use crate::observe::ObserveError;

const AGREEMENT_FILTER: &str = "(objectClass=nsDS5ReplicationAgreement)";

/// Which agreements a wait watches.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Targets {
    /// These agreement DNs, as given.
    Explicit(Vec<String>),
    /// Every agreement directly under the replica entry, discovered at start.
    AllUnderReplica,
}

/// Resolve `targets` to agreement DNs. Discovered DNs are rebuilt from each agreement's `cn` rather
/// than taken from the search output's `dn:` lines.
pub async fn resolve_targets<D: Directory + ?Sized>(
    directory: &D,
    replica_dn: &str,
    targets: &Targets,
) -> Result<Vec<String>, ObserveError> {
    match targets {
        Targets::Explicit(dns) => Ok(dns.clone()),
        Targets::AllUnderReplica => {
            let entries = directory
                .query(Scope::OneLevel, replica_dn, AGREEMENT_FILTER, &["cn"])
                .await
                .map_err(|source| ObserveError::Discovery {
                    replica_dn: replica_dn.to_string(),
                    source,
                })?;

            Ok(entries
                .iter()
                .filter_map(|entry| entry.first("cn"))
                .map(|cn| agreement_dn(cn, replica_dn))
                .collect())
        }
    }
}
