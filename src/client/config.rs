//! Connection settings: where the API server is and how to authenticate.

use std::fmt;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

use crate::error::ConfigurationError;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const HOST_ENV: &str = "KUBERNETES_SERVICE_HOST";
const PORT_ENV: &str = "KUBERNETES_SERVICE_PORT";

/// API server address and credentials.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Base URL, e.g. `https://10.0.0.1:443`.
    pub server: String,
    /// Bearer token.
    pub token: Option<String>,
    /// CA bundle (PEM) trusted for the server.
    pub ca_pem: Option<Vec<u8>>,
    /// Client certificate (PEM).
    pub client_cert_pem: Option<Vec<u8>>,
    /// Client private key (PEM).
    pub client_key_pem: Option<Vec<u8>>,
    /// Skip server certificate verification.
    pub insecure_skip_tls_verify: bool,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("server", &self.server)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("ca_pem", &self.ca_pem.is_some())
            .field("client_cert_pem", &self.client_cert_pem.is_some())
            .field("client_key_pem", &self.client_key_pem.as_ref().map(|_| "<redacted>"))
            .field("insecure_skip_tls_verify", &self.insecure_skip_tls_verify)
            .finish()
    }
}

impl ConnectionConfig {
    /// Settings pointing at `server` with no credentials.
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            ..Self::default()
        }
    }

    /// Adds a bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Settings of the pod's service account.
    pub fn in_cluster() -> Result<Self, ConfigurationError> {
        Self::in_cluster_from(
            Path::new(SERVICE_ACCOUNT_DIR),
            std::env::var(HOST_ENV).ok(),
            std::env::var(PORT_ENV).ok(),
        )
    }

    /// Service-account settings from an explicit directory and address.
    pub fn in_cluster_from(
        dir: &Path,
        host: Option<String>,
        port: Option<String>,
    ) -> Result<Self, ConfigurationError> {
        let (host, port) = match (host, port) {
            (Some(h), Some(p)) if !h.is_empty() && !p.is_empty() => (h, p),
            _ => {
                return Err(ConfigurationError::InCluster {
                    reason: format!("{HOST_ENV} and {PORT_ENV} must be set"),
                });
            }
        };
        let read = |name: &str| {
            std::fs::read(dir.join(name)).map_err(|e| ConfigurationError::InCluster {
                reason: format!("{}: {e}", dir.join(name).display()),
            })
        };
        let token = String::from_utf8_lossy(&read("token")?).trim().to_owned();
        let ca = read("ca.crt")?;
        let host = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]")
        } else {
            host
        };
        Ok(Self {
            server: format!("https://{host}:{port}"),
            token: Some(token),
            ca_pem: Some(ca),
            ..Self::default()
        })
    }

    /// Settings of the current context of a kubeconfig file.
    ///
    /// Relative file references inside the kubeconfig resolve against its directory.
    pub fn from_kubeconfig(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let fail = |reason: String| ConfigurationError::Kubeconfig {
            path: path.to_path_buf(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
        Self::parse_kubeconfig(&text, path.parent()).map_err(fail)
    }

    /// Settings of the current context of an in-memory kubeconfig.
    pub fn from_kubeconfig_str(yaml: &str) -> Result<Self, ConfigurationError> {
        Self::parse_kubeconfig(yaml, None).map_err(|reason| ConfigurationError::Kubeconfig {
            path: PathBuf::from("<inline>"),
            reason,
        })
    }

    fn parse_kubeconfig(yaml: &str, base: Option<&Path>) -> Result<Self, String> {
        let kc: Kubeconfig = serde_yaml::from_str(yaml).map_err(|e| e.to_string())?;
        let current = kc
            .current_context
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or("no current-context")?;
        let context = kc
            .contexts
            .iter()
            .find(|c| c.name == current)
            .map(|c| &c.context)
            .ok_or_else(|| format!("context {current:?} not found"))?;
        let cluster = kc
            .clusters
            .iter()
            .find(|c| c.name == context.cluster)
            .map(|c| &c.cluster)
            .ok_or_else(|| format!("cluster {:?} not found", context.cluster))?;
        let user = match context.user.as_deref() {
            Some(name) if !name.is_empty() => Some(
                kc.users
                    .iter()
                    .find(|u| u.name == name)
                    .map(|u| &u.user)
                    .ok_or_else(|| format!("user {name:?} not found"))?,
            ),
            _ => None,
        };

        let mut cfg = Self {
            server: cluster.server.clone(),
            ca_pem: inline_or_file(
                cluster.certificate_authority_data.as_deref(),
                cluster.certificate_authority.as_deref(),
                base,
            )?,
            insecure_skip_tls_verify: cluster.insecure_skip_tls_verify,
            ..Self::default()
        };
        if let Some(user) = user {
            cfg.client_cert_pem = inline_or_file(
                user.client_certificate_data.as_deref(),
                user.client_certificate.as_deref(),
                base,
            )?;
            cfg.client_key_pem =
                inline_or_file(user.client_key_data.as_deref(), user.client_key.as_deref(), base)?;
            cfg.token = match (&user.token, &user.token_file) {
                (Some(token), _) => Some(token.clone()),
                (None, Some(file)) => {
                    let raw = std::fs::read_to_string(resolve(file, base))
                        .map_err(|e| format!("{}: {e}", file.display()))?;
                    Some(raw.trim().to_owned())
                }
                (None, None) => None,
            };
        }
        Ok(cfg)
    }

    /// Checks that the settings can produce a client.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |reason: &str| ConfigurationError::InvalidConnection {
            reason: reason.to_owned(),
        };
        if self.server.is_empty() {
            return Err(invalid("server address is empty"));
        }
        if !(self.server.starts_with("https://") || self.server.starts_with("http://")) {
            return Err(invalid("server address must start with http:// or https://"));
        }
        if self.client_cert_pem.is_some() != self.client_key_pem.is_some() {
            return Err(invalid("client certificate and key must be given together"));
        }
        if self.token.as_deref().is_some_and(str::is_empty) {
            return Err(invalid("bearer token is empty"));
        }
        Ok(())
    }
}

fn resolve(file: &Path, base: Option<&Path>) -> PathBuf {
    match base {
        Some(dir) if file.is_relative() => dir.join(file),
        _ => file.to_path_buf(),
    }
}

fn inline_or_file(data: Option<&str>, file: Option<&Path>, base: Option<&Path>) -> Result<Option<Vec<u8>>, String> {
    if let Some(data) = data {
        return STANDARD
            .decode(data.trim())
            .map(Some)
            .map_err(|e| format!("invalid base64: {e}"));
    }
    match file {
        Some(file) => std::fs::read(resolve(file, base))
            .map(Some)
            .map_err(|e| format!("{}: {e}", file.display())),
        None => Ok(None),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig {
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    users: Vec<NamedUser>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    current_context: Option<String>,
}

#[derive(Deserialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterEntry,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterEntry {
    server: String,
    #[serde(default)]
    certificate_authority: Option<PathBuf>,
    #[serde(default)]
    certificate_authority_data: Option<String>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: UserEntry,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct UserEntry {
    #[serde(default)]
    token: Option<String>,
    #[serde(default, rename = "tokenFile")]
    token_file: Option<PathBuf>,
    #[serde(default)]
    client_certificate: Option<PathBuf>,
    #[serde(default)]
    client_certificate_data: Option<String>,
    #[serde(default)]
    client_key: Option<PathBuf>,
    #[serde(default)]
    client_key_data: Option<String>,
}

#[derive(Deserialize)]
struct NamedContext {
    name: String,
    context: ContextEntry,
}

#[derive(Deserialize)]
struct ContextEntry {
    cluster: String,
    #[serde(default)]
    user: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: dev
clusters:
  - name: dev-cluster
    cluster:
      server: https://127.0.0.1:6443
      certificate-authority-data: Q0EtUEVN
  - name: other
    cluster:
      server: https://other:6443
contexts:
  - name: dev
    context:
      cluster: dev-cluster
      user: admin
users:
  - name: admin
    user:
      token: s3cret
"#;

    #[test]
    fn kubeconfig_current_context() {
        let cfg = ConnectionConfig::from_kubeconfig_str(KUBECONFIG).unwrap();
        assert_eq!(cfg.server, "https://127.0.0.1:6443");
        assert_eq!(cfg.ca_pem.as_deref(), Some(&b"CA-PEM"[..]));
        assert_eq!(cfg.token.as_deref(), Some("s3cret"));
        assert!(cfg.validate().is_ok());
        assert!(!format!("{cfg:?}").contains("s3cret"));
    }

    #[test]
    fn kubeconfig_missing_context_is_an_error() {
        let yaml = KUBECONFIG.replace("current-context: dev", "current-context: prod");
        let err = ConnectionConfig::from_kubeconfig_str(&yaml).unwrap_err();
        assert_eq!(err.as_label(), "config_kubeconfig");
        assert!(err.to_string().contains("\"prod\""));
    }

    #[test]
    fn kubeconfig_files_resolve_relative_to_the_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ca.pem"), b"FILE-CA").unwrap();
        std::fs::write(dir.path().join("token"), b"tok\n").unwrap();
        let yaml = r#"
current-context: c
clusters:
  - name: k
    cluster:
      server: https://k:443
      certificate-authority: ca.pem
contexts:
  - name: c
    context: { cluster: k, user: u }
users:
  - name: u
    user:
      tokenFile: token
"#;
        let path = dir.path().join("config");
        std::fs::File::create(&path).unwrap().write_all(yaml.as_bytes()).unwrap();

        let cfg = ConnectionConfig::from_kubeconfig(&path).unwrap();
        assert_eq!(cfg.ca_pem.as_deref(), Some(&b"FILE-CA"[..]));
        assert_eq!(cfg.token.as_deref(), Some("tok"));
    }

    #[test]
    fn in_cluster_reads_service_account() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("token"), b"sa-token\n").unwrap();
        std::fs::write(dir.path().join("ca.crt"), b"CA").unwrap();

        let cfg = ConnectionConfig::in_cluster_from(dir.path(), Some("fd00::1".into()), Some("443".into())).unwrap();
        assert_eq!(cfg.server, "https://[fd00::1]:443");
        assert_eq!(cfg.token.as_deref(), Some("sa-token"));

        let err = ConnectionConfig::in_cluster_from(dir.path(), None, None).unwrap_err();
        assert_eq!(err.as_label(), "config_in_cluster");
    }

    #[test]
    fn validation() {
        assert!(ConnectionConfig::default().validate().is_err());
        assert!(ConnectionConfig::new("ftp://x").validate().is_err());
        let mut cfg = ConnectionConfig::new("https://x");
        cfg.client_cert_pem = Some(b"cert".to_vec());
        assert!(cfg.validate().is_err());
        assert!(ConnectionConfig::new("https://x").with_token("t").validate().is_ok());
    }
}
