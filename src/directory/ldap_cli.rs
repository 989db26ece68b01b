use crate::directory::ldif::{parse_entries, render_add, render_modify};
use crate::directory::{
    AdminCommand, AdminCommandError, AdminCommandRunner, CommandOutput, Directory, DirectoryError, Entry, Mutation,
    ProcessRunner, Scope,
};
use std::sync::Mutex;
use tokio::time::Duration;

// ldapsearch exit codes (LDAP result codes, plus 255 when the server can't be reached).
const NO_SUCH_OBJECT: i32 = 32;
const ALREADY_EXISTS: i32 = 68;
const SERVER_DOWN: i32 = 255;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BindMethod {
    Simple,
    SslClientAuth,
}

#[derive(Clone, Debug)]
pub struct LdapConnParams {
    /// Instance name, with or without the `slapd-` prefix.
    pub instance: String,
    pub use_ldapi: bool,
    pub ldaps_host: Option<String>,
    pub ldaps_port: u16,
    pub bind_method: BindMethod,
    pub bind_dn: Option<String>,
    pub bind_pw: Option<String>,
    pub tls_ca: Option<String>,
    pub tls_client_cert: Option<String>,
    pub tls_client_key: Option<String>,
    pub connect_timeout: Duration,
    pub op_timeout: Duration,
}

impl LdapConnParams {
    /// Local instance over LDAPI with SASL/EXTERNAL and default timeouts.
    pub fn ldapi(instance: &str) -> Self {
        LdapConnParams {
            instance: instance.to_string(),
            use_ldapi: true,
            ldaps_host: None,
            ldaps_port: 636,
            bind_method: BindMethod::Simple,
            bind_dn: None,
            bind_pw: None,
            tls_ca: None,
            tls_client_cert: None,
            tls_client_key: None,
            connect_timeout: Duration::from_secs(5),
            op_timeout: Duration::from_secs(30),
        }
    }

    /// URLs in the order they are tried: LDAPI sockets, then LDAPS if a host is configured.
    pub fn candidate_urls(&self) -> Vec<String> {
        let mut urls = vec![];
        if self.use_ldapi {
            urls.extend(candidate_ldapi_urls(&self.instance));
        }
        if let Some(host) = &self.ldaps_host {
            urls.push(format!("ldaps://{}:{}", host, self.ldaps_port));
        }
        urls
    }

    fn auth(&self, url: &str) -> Result<(Vec<String>, Vec<(String, String)>), DirectoryError> {
        if url.starts_with("ldapi://") {
            return Ok((vec!["-Y".into(), "EXTERNAL".into()], vec![]));
        }

        let mut env = vec![];
        if let Some(ca) = &self.tls_ca {
            env.push(("LDAPTLS_CACERT".to_string(), ca.clone()));
        }
        match self.bind_method {
            BindMethod::Simple => match (&self.bind_dn, &self.bind_pw) {
                (Some(dn), Some(pw)) => Ok((vec!["-x".into(), "-D".into(), dn.clone(), "-w".into(), pw.clone()], env)),
                _ => Err(DirectoryError::InvalidParams("SIMPLE bind requires bind_dn and bind_pw")),
            },
            BindMethod::SslClientAuth => match (&self.tls_client_cert, &self.tls_client_key) {
                (Some(cert), Some(key)) => {
                    env.push(("LDAPTLS_CERT".to_string(), cert.clone()));
                    env.push(("LDAPTLS_KEY".to_string(), key.clone()));
                    Ok((vec!["-Y".into(), "EXTERNAL".into()], env))
                }
                _ => Err(DirectoryError::InvalidParams(
                    "sslclientauth requires tls_client_cert and tls_client_key",
                )),
            },
        }
    }
}

/// Percent-encoded LDAPI URL for the instance socket under `base_dir`.
pub fn ldapi_url(instance: &str, base_dir: &str) -> String {
    let instance = instance.strip_prefix("slapd-").unwrap_or(instance);
    let socket = format!("{}/slapd-{}.socket", base_dir, instance);
    format!("ldapi://{}", socket.replace('/', "%2F"))
}

/// Host systemd socket first, then the container default.
pub fn candidate_ldapi_urls(instance: &str) -> Vec<String> {
    vec![ldapi_url(instance, "/run"), ldapi_url(instance, "/data/run")]
}

/// LdapCliDirectory talks to the directory through the OpenLDAP command-line tools. Each operation
/// is its own short-lived process, so no connection outlives a call.
///
/// The first candidate URL that answers a root DSE probe is remembered until an operation on it
/// reports the server as unreachable.
pub struct LdapCliDirectory<R: AdminCommandRunner = ProcessRunner> {
    logger: slog::Logger,
    params: LdapConnParams,
    runner: R,
    selected_url: Mutex<Option<String>>,
}

impl LdapCliDirectory<ProcessRunner> {
    pub fn new(logger: slog::Logger, params: LdapConnParams) -> Self {
        LdapCliDirectory::with_runner(logger, params, ProcessRunner)
    }
}

impl<R: AdminCommandRunner> LdapCliDirectory<R> {
    pub fn with_runner(logger: slog::Logger, params: LdapConnParams, runner: R) -> Self {
        LdapCliDirectory {
            logger,
            params,
            runner,
            selected_url: Mutex::new(None),
        }
    }

    pub fn params(&self) -> &LdapConnParams {
        &self.params
    }

    async fn connection(&self) -> Result<(String, Vec<String>, Vec<(String, String)>), DirectoryError> {
        let cached = self
            .selected_url
            .lock()
            .expect("LdapCliDirectory mutex guard poison")
            .clone();
        if let Some(url) = cached {
            let (auth, env) = self.params.auth(&url)?;
            return Ok((url, auth, env));
        }

        let mut last_failure = String::from("no candidate URLs configured");
        for url in self.params.candidate_urls() {
            let (auth, env) = match self.params.auth(&url) {
                Ok(auth) => auth,
                Err(e) => {
                    last_failure = e.to_string();
                    continue;
                }
            };

            let mut argv = self.base_argv("ldapsearch", &["-LLL"]);
            argv.extend(auth.iter().cloned());
            argv.extend(strings(&["-H", &url, "-s", "base", "-b", "", "1.1"]));

            match self.run(argv, &env, None).await {
                Ok(output) if output.success() => {
                    slog::debug!(self.logger, "Using LDAP URL {}", url);
                    *self.selected_url.lock().expect("LdapCliDirectory mutex guard poison") = Some(url.clone());
                    return Ok((url, auth, env));
                }
                Ok(output) => last_failure = format!("{}: rc={} {}", url, output.exit_code, output.diagnostic()),
                Err(e) => last_failure = format!("{}: {}", url, e),
            }
        }

        Err(DirectoryError::Unreachable(last_failure))
    }

    fn base_argv(&self, tool: &str, extra: &[&str]) -> Vec<String> {
        let mut argv = vec![tool.to_string()];
        argv.extend(extra.iter().map(|s| s.to_string()));
        argv.push("-o".into());
        argv.push(format!("nettimeout={}", self.params.connect_timeout.as_secs().max(1)));
        argv
    }

    async fn run(
        &self,
        argv: Vec<String>,
        env: &[(String, String)],
        stdin: Option<String>,
    ) -> Result<CommandOutput, DirectoryError> {
        let command = AdminCommand {
            argv,
            env: env.to_vec(),
            stdin,
        };
        slog::debug!(self.logger, "Running {}", command.redacted());

        self.runner
            .run(&command, self.params.op_timeout)
            .await
            .map_err(|e| match e {
                AdminCommandError::Timeout { timeout, .. } => DirectoryError::Timeout(timeout),
                other => DirectoryError::Command {
                    code: -1,
                    message: other.to_string(),
                },
            })
    }

    /// Run an operation on the selected URL and map a non-zero exit code to an error.
    async fn run_checked(
        &self,
        argv: Vec<String>,
        env: &[(String, String)],
        stdin: Option<String>,
        target: &str,
    ) -> Result<CommandOutput, DirectoryError> {
        let output = self.run(argv, env, stdin).await?;
        match output.exit_code {
            0 => Ok(output),
            NO_SUCH_OBJECT => Err(DirectoryError::NoSuchObject(target.to_string())),
            ALREADY_EXISTS => Err(DirectoryError::AlreadyExists(target.to_string())),
            code => {
                if code == SERVER_DOWN || code < 0 {
                    self.forget_url();
                }
                Err(DirectoryError::Command {
                    code,
                    message: output.diagnostic(),
                })
            }
        }
    }

    fn forget_url(&self) {
        *self.selected_url.lock().expect("LdapCliDirectory mutex guard poison") = None;
    }
}

#[async_trait::async_trait]
impl<R: AdminCommandRunner> Directory for LdapCliDirectory<R> {
    async fn query(
        &self,
        scope: Scope,
        base: &str,
        filter: &str,
        attributes: &[&str],
    ) -> Result<Vec<Entry>, DirectoryError> {
        let (url, auth, env) = self.connection().await?;

        let mut argv = self.base_argv("ldapsearch", &["-LLL"]);
        argv.extend(strings(&["-o", "ldif-wrap=no"]));
        argv.extend(auth);
        argv.extend(strings(&["-H", &url, "-s", scope.as_arg(), "-b", base, filter]));
        argv.extend(strings(attributes));

        let output = self.run_checked(argv, &env, None, base).await?;
        parse_entries(&output.stdout)
    }

    async fn mutate(&self, dn: &str, mutation: &Mutation) -> Result<(), DirectoryError> {
        let (url, auth, env) = self.connection().await?;

        let (argv, stdin) = match mutation {
            Mutation::Add(attributes) => {
                let mut argv = self.base_argv("ldapmodify", &[]);
                argv.extend(auth);
                argv.extend(strings(&["-H", &url, "-a"]));
                (argv, Some(render_add(dn, attributes)))
            }
            Mutation::Modify(changes) => {
                let mut argv = self.base_argv("ldapmodify", &[]);
                argv.extend(auth);
                argv.extend(strings(&["-H", &url]));
                (argv, Some(render_modify(dn, changes)))
            }
            Mutation::Delete => {
                let mut argv = self.base_argv("ldapdelete", &[]);
                argv.extend(auth);
                argv.extend(strings(&["-H", &url, dn]));
                (argv, None)
            }
        };

        self.run_checked(argv, &env, stdin, dn).await?;
        Ok(())
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}
