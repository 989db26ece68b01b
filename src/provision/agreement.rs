use crate::directory::{
    agreement_dn, escape_filter_value, replica_dn, AdminCommandRunner, BindMethod, Change, Directory, Entry, Mutation,
};
use crate::provision::{Presence, ProvisionError, ProvisionOutcome, Provisioner};
use crate::time::Clock;

const AGREEMENT_CLASS: &str = "nsDS5ReplicationAgreement";
const HOST: &str = "nsds5ReplicaHost";
const PORT: &str = "nsds5ReplicaPort";
const TRANSPORT: &str = "nsds5ReplicaTransportInfo";
const ROOT: &str = "nsds5ReplicaRoot";
const BIND_DN: &str = "nsds5ReplicaBindDN";
const BIND_METHOD: &str = "nsds5ReplicaBindMethod";
const CREDENTIALS: &str = "nsds5ReplicaCredentials";
const BACKOFF_MIN: &str = "nsds5ReplicaBackoffMin";
const BACKOFF_MAX: &str = "nsds5ReplicaBackoffMax";
const PURGE_DELAY: &str = "nsds5ReplicaPurgeDelay";
const ENABLED: &str = "nsds5ReplicaEnabled";

const LOOKUP_ATTRIBUTES: &[&str] = &[
    "cn",
    HOST,
    PORT,
    BIND_DN,
    ENABLED,
    TRANSPORT,
    BACKOFF_MIN,
    BACKOFF_MAX,
    PURGE_DELAY,
    BIND_METHOD,
    ROOT,
    "description",
];

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Transport {
    Ldaps,
    StartTls,
    Ldap,
}

impl Transport {
    /// Value of `nsds5ReplicaTransportInfo`.
    pub fn transport_info(&self) -> &'static str {
        match self {
            Transport::Ldaps => "SSL",
            Transport::StartTls => "TLS",
            Transport::Ldap => "LDAP",
        }
    }
}

/// Desired state of one supplier-to-consumer agreement.
#[derive(Clone, Debug)]
pub struct AgreementSpec {
    pub suffix: String,
    pub consumer_host: String,
    pub consumer_port: u16,
    /// Agreement `cn`. Defaults to `agmt to <host>:<port>`.
    pub name: Option<String>,
    pub bind_method: BindMethod,
    pub bind_dn: Option<String>,
    pub bind_pw: Option<String>,
    pub tls_client_cert: Option<String>,
    pub tls_client_key: Option<String>,
    pub transport: Transport,
    pub backoff_min: Option<u32>,
    pub backoff_max: Option<u32>,
    pub purge_delay: Option<u32>,
    /// Stored credentials can't be read back in clear text, so they are only written on create
    /// unless this is set.
    pub rotate_credentials: bool,
    pub presence: Presence,
}

impl AgreementSpec {
    pub fn new(suffix: &str, consumer_host: &str, consumer_port: u16) -> Self {
        AgreementSpec {
            suffix: suffix.to_string(),
            consumer_host: consumer_host.to_string(),
            consumer_port,
            name: None,
            bind_method: BindMethod::Simple,
            bind_dn: None,
            bind_pw: None,
            tls_client_cert: None,
            tls_client_key: None,
            transport: Transport::Ldaps,
            backoff_min: None,
            backoff_max: None,
            purge_delay: None,
            rotate_credentials: false,
            presence: Presence::Present,
        }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.presence == Presence::Absent {
            return Ok(());
        }
        match self.bind_method {
            BindMethod::Simple if self.bind_dn.is_none() || self.bind_pw.is_none() => {
                Err("bind_method=simple requires bind_dn and bind_pw")
            }
            BindMethod::SslClientAuth if self.tls_client_cert.is_none() || self.tls_client_key.is_none() => {
                Err("bind_method=sslclientauth requires tls_client_cert and tls_client_key")
            }
            _ => Ok(()),
        }
    }

    pub fn cn(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("agmt to {}:{}", self.consumer_host, self.consumer_port),
        }
    }

    fn target_attributes(&self) -> Vec<(&'static str, String)> {
        let mut attributes = vec![
            (HOST, self.consumer_host.clone()),
            (PORT, self.consumer_port.to_string()),
            (TRANSPORT, self.transport.transport_info().to_string()),
            (ROOT, self.suffix.clone()),
            ("description", format!("agmt to {}:{}", self.consumer_host, self.consumer_port)),
        ];

        match self.bind_method {
            BindMethod::Simple => {
                if let Some(dn) = &self.bind_dn {
                    attributes.push((BIND_DN, dn.clone()));
                    attributes.push((BIND_METHOD, "SIMPLE".to_string()));
                    if let Some(pw) = &self.bind_pw {
                        attributes.push((CREDENTIALS, pw.clone()));
                    }
                }
            }
            BindMethod::SslClientAuth => attributes.push((BIND_METHOD, "SSLCLIENTAUTH".to_string())),
        }

        if let Some(v) = self.backoff_min {
            attributes.push((BACKOFF_MIN, v.to_string()));
        }
        if let Some(v) = self.backoff_max {
            attributes.push((BACKOFF_MAX, v.to_string()));
        }
        if let Some(v) = self.purge_delay {
            attributes.push((PURGE_DELAY, v.to_string()));
        }

        attributes
    }

    /// Replace operations that bring `current` to the desired state, enabling it if needed.
    fn changes_from(&self, current: &Entry) -> Vec<Change> {
        let mut changes: Vec<Change> = self
            .target_attributes()
            .into_iter()
            .filter(|(attribute, _)| *attribute != CREDENTIALS || self.rotate_credentials)
            .filter(|(attribute, value)| current.first(attribute) != Some(value.as_str()))
            .map(|(attribute, value)| Change::replace(attribute, value))
            .collect();

        let enabled = current
            .first(ENABLED)
            .map_or(false, |v| matches!(v.to_lowercase().as_str(), "on" | "true" | "yes" | "1"));
        if !enabled {
            changes.push(Change::replace(ENABLED, "on"));
        }

        changes
    }
}

impl<'a, D, R, C> Provisioner<'a, D, R, C>
where
    D: Directory + ?Sized,
    R: AdminCommandRunner + ?Sized,
    C: Clock,
{
    /// Create, update, or delete a replication agreement under the suffix's replica entry. An
    /// existing agreement is found by name first, then by consumer host and port.
    pub async fn ensure_agreement(&mut self, spec: &AgreementSpec) -> Result<ProvisionOutcome, ProvisionError> {
        spec.validate().map_err(ProvisionError::InvalidRequest)?;

        let replica_dn = replica_dn(&spec.suffix);
        if self.read_optional(&replica_dn, &["cn"]).await?.is_none() {
            return Err(ProvisionError::ReplicaMissing {
                suffix: spec.suffix.clone(),
            });
        }

        let mut existing = vec![];
        if let Some(name) = &spec.name {
            let filter = format!(
                "(&(objectClass={})(cn={}))",
                AGREEMENT_CLASS,
                escape_filter_value(name)
            );
            existing = self.search_one_level(&replica_dn, &filter, LOOKUP_ATTRIBUTES).await?;
        }
        if existing.is_empty() {
            let filter = format!(
                "(&(objectClass={})({}={})({}={}))",
                AGREEMENT_CLASS,
                HOST,
                escape_filter_value(&spec.consumer_host),
                PORT,
                spec.consumer_port
            );
            existing = self.search_one_level(&replica_dn, &filter, LOOKUP_ATTRIBUTES).await?;
        }

        let mut warnings = vec![];
        if existing.len() > 1 {
            warnings.push("Multiple agreements match host:port; managing the first".to_string());
        }
        let current = existing.into_iter().next();

        let mut outcome = match (spec.presence, current) {
            (Presence::Absent, None) => ProvisionOutcome::new(false, agreement_dn(&spec.cn(), &replica_dn)),
            (Presence::Absent, Some(entry)) => {
                if !self.check_mode {
                    self.mutate(entry.dn(), &Mutation::Delete).await?;
                }
                slog::info!(self.logger, "Deleted agreement {}", entry.dn());
                ProvisionOutcome::new(true, entry.dn())
            }
            (Presence::Present, None) => {
                let cn = spec.cn();
                let dn = agreement_dn(&cn, &replica_dn);
                if !self.check_mode {
                    let mut attributes = vec![
                        (
                            "objectClass".to_string(),
                            vec!["top".to_string(), AGREEMENT_CLASS.to_string()],
                        ),
                        ("cn".to_string(), vec![cn]),
                    ];
                    attributes.extend(
                        spec.target_attributes()
                            .into_iter()
                            .map(|(attribute, value)| (attribute.to_string(), vec![value])),
                    );
                    self.mutate(&dn, &Mutation::Add(attributes)).await?;
                    self.mutate(&dn, &Mutation::Modify(vec![Change::replace(ENABLED, "on")]))
                        .await?;
                }
                slog::info!(self.logger, "Created agreement {}", dn);
                ProvisionOutcome::new(true, dn)
            }
            (Presence::Present, Some(entry)) => {
                let changes = spec.changes_from(&entry);
                let changed = !changes.is_empty();
                if changed && !self.check_mode {
                    // The agreement exists and is usable; a partial update is reported, not fatal.
                    if let Err(e) = self.mutate(entry.dn(), &Mutation::Modify(changes)).await {
                        let message: String = e.to_string().chars().take(200).collect();
                        slog::warn!(self.logger, "Agreement update failed: {}", message);
                        warnings.push(format!("Modify warning for {}: {}", entry.dn(), message));
                    }
                }
                ProvisionOutcome::new(changed, entry.dn())
            }
        };

        outcome.warnings = warnings;
        Ok(outcome)
    }
}
