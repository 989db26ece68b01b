use crate::directory::{candidate_ldapi_urls, AdminCommand};

/// Where a `dsconf` invocation points: a local instance by name, or a URL with optional
/// Directory Manager credentials.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DsconfTarget {
    Instance(String),
    Url {
        url: String,
        bind_dn: Option<String>,
        bind_pw: Option<String>,
    },
}

impl DsconfTarget {
    /// LDAPI socket URLs of a local instance, in the order they should be tried.
    pub fn local_sockets(instance: &str) -> Vec<DsconfTarget> {
        candidate_ldapi_urls(instance)
            .into_iter()
            .map(|url| DsconfTarget::Url {
                url,
                bind_dn: None,
                bind_pw: None,
            })
            .collect()
    }

    /// `dsconf [-j] [-D dn] [-w pw] <instance|url> args...`
    pub fn command(&self, json: bool, args: &[&str]) -> AdminCommand {
        let mut argv = vec!["dsconf".to_string()];
        if json {
            argv.push("-j".into());
        }
        match self {
            DsconfTarget::Instance(instance) => argv.push(instance.clone()),
            DsconfTarget::Url { url, bind_dn, bind_pw } => {
                if let Some(dn) = bind_dn {
                    argv.push("-D".into());
                    argv.push(dn.clone());
                }
                if let Some(pw) = bind_pw {
                    argv.push("-w".into());
                    argv.push(pw.clone());
                }
                argv.push(url.clone());
            }
        }
        argv.extend(args.iter().map(|s| s.to_string()));
        AdminCommand::new(argv)
    }
}
