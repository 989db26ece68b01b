use crate::directory::{candidate_ldapi_urls, AdminCommand, AdminCommandRunner, Change, Directory, Mutation};
use crate::provision::{Presence, ProvisionError, ProvisionOutcome, Provisioner};
use crate::time::Clock;

/// Desired state of the replication manager account, `cn=<name>,cn=config`.
#[derive(Clone, Debug)]
pub struct ManagerSpec {
    /// Instance whose LDAPI sockets are used to verify the password.
    pub instance: String,
    pub name: String,
    pub password: Option<String>,
    /// Before replacing the password of an existing account, try binding with it.
    pub verify: bool,
    pub presence: Presence,
}

impl ManagerSpec {
    pub fn new(instance: &str) -> Self {
        ManagerSpec {
            instance: instance.to_string(),
            name: "replication manager".to_string(),
            password: None,
            verify: true,
            presence: Presence::Present,
        }
    }

    pub fn dn(&self) -> String {
        format!("cn={},cn=config", self.name)
    }
}

impl<'a, D, R, C> Provisioner<'a, D, R, C>
where
    D: Directory + ?Sized,
    R: AdminCommandRunner + ?Sized,
    C: Clock,
{
    pub async fn ensure_replication_manager(&mut self, spec: &ManagerSpec) -> Result<ProvisionOutcome, ProvisionError> {
        let dn = spec.dn();
        let exists = self.read_optional(&dn, &["cn"]).await?.is_some();

        match (spec.presence, exists) {
            (Presence::Absent, false) => Ok(ProvisionOutcome::new(false, dn)),
            (Presence::Absent, true) => {
                if !self.check_mode {
                    self.mutate(&dn, &Mutation::Delete).await?;
                }
                slog::info!(self.logger, "Deleted replication manager {}", dn);
                Ok(ProvisionOutcome::new(true, dn))
            }
            (Presence::Present, false) => {
                if !self.check_mode {
                    let mut attributes = vec![
                        (
                            "objectClass".to_string(),
                            vec!["top".to_string(), "nsSimpleSecurityObject".to_string()],
                        ),
                        ("cn".to_string(), vec![spec.name.clone()]),
                    ];
                    if let Some(password) = &spec.password {
                        attributes.push(("userPassword".to_string(), vec![password.clone()]));
                    }
                    self.mutate(&dn, &Mutation::Add(attributes)).await?;
                }
                slog::info!(self.logger, "Created replication manager {}", dn);
                Ok(ProvisionOutcome::new(true, dn))
            }
            (Presence::Present, true) => {
                let password = match &spec.password {
                    Some(password) => password,
                    None => return Ok(ProvisionOutcome::new(false, dn)),
                };
                // The stored value is hashed, so the only way to compare is to bind with it.
                if spec.verify && self.password_works(&spec.instance, &dn, password).await {
                    return Ok(ProvisionOutcome::new(false, dn));
                }
                if !self.check_mode {
                    self.mutate(&dn, &Mutation::Modify(vec![Change::replace("userPassword", password.as_str())]))
                        .await?;
                }
                slog::info!(self.logger, "Replaced password of {}", dn);
                Ok(ProvisionOutcome::new(true, dn))
            }
        }
    }

    async fn password_works(&mut self, instance: &str, dn: &str, password: &str) -> bool {
        for url in candidate_ldapi_urls(instance) {
            let command = AdminCommand::new(vec!["ldapwhoami", "-x", "-D", dn, "-w", password, "-H", url.as_str()]);
            match self.run(&command).await {
                Ok(output) if output.success() => return true,
                Ok(output) => slog::debug!(self.logger, "Bind as {} failed: {}", dn, output.diagnostic()),
                Err(e) => slog::debug!(self.logger, "Could not verify {}: {}", dn, e),
            }
        }
        false
    }
}
