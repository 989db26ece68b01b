use crate::directory::{replica_dn, AdminCommandRunner, Change, Directory, Mutation};
use crate::provision::{Presence, ProvisionError, ProvisionOutcome, Provisioner};
use crate::time::Clock;

const REPLICA_BIND_DN: &str = "nsds5ReplicaBindDN";

impl<'a, D, R, C> Provisioner<'a, D, R, C>
where
    D: Directory + ?Sized,
    R: AdminCommandRunner + ?Sized,
    C: Clock,
{
    /// Make `bind_dn` one of (or not one of) the identities the replica accepts replication
    /// sessions from. DNs compare case-insensitively.
    pub async fn ensure_replica_bind_dn(
        &mut self,
        suffix: &str,
        bind_dn: &str,
        presence: Presence,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        let replica_dn = replica_dn(suffix);
        let replica = match self.read_optional(&replica_dn, &[REPLICA_BIND_DN]).await? {
            Some(entry) => entry,
            None => {
                return Err(ProvisionError::ReplicaMissing {
                    suffix: suffix.to_string(),
                })
            }
        };

        let stored = replica
            .values(REPLICA_BIND_DN)
            .unwrap_or(&[])
            .iter()
            .find(|value| value.eq_ignore_ascii_case(bind_dn))
            .cloned();

        let change = match (presence, stored) {
            (Presence::Present, None) => Some(Change::add(REPLICA_BIND_DN, bind_dn)),
            // Delete the spelling the server has, not the one we were given.
            (Presence::Absent, Some(stored)) => Some(Change::delete_value(REPLICA_BIND_DN, stored)),
            _ => None,
        };

        let changed = change.is_some();
        if let Some(change) = change {
            if !self.check_mode {
                self.mutate(&replica_dn, &Mutation::Modify(vec![change])).await?;
            }
            slog::info!(self.logger, "Replica bind DN {} set to {:?}", bind_dn, presence);
        }

        Ok(ProvisionOutcome::new(changed, replica_dn))
    }
}
