use super::{CAData, ClientConfig, Credentials};

use dirs::home_dir;

use std::fmt::{self, Display};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Problems loading a kubeconfig file or turning it into a `ClientConfig`
#[derive(Debug)]
pub enum KubeConfigError {
    Io(io::Error),
    Format(serde_yaml::Error),
    MissingCredentials(String),
    NoHomeDir,
    Invalid(String),
    Exec(String),
}

impl From<serde_yaml::Error> for KubeConfigError {
    fn from(err: serde_yaml::Error) -> KubeConfigError {
        KubeConfigError::Format(err)
    }
}

impl From<io::Error> for KubeConfigError {
    fn from(err: io::Error) -> KubeConfigError {
        KubeConfigError::Io(err)
    }
}

impl Display for KubeConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KubeConfigError::Io(e) => write!(f, "couldn't read kubeconfig: {}", e),
            KubeConfigError::Format(e) => write!(f, "malformed kubeconfig: {}", e),
            KubeConfigError::MissingCredentials(user) => write!(
                f,
                "user {:?} has no supported credentials, expected a token, username/password, client certificate or exec plugin",
                user
            ),
            KubeConfigError::NoHomeDir => {
                f.write_str("couldn't determine the home directory to find ~/.kube/config")
            }
            KubeConfigError::Invalid(msg) => write!(f, "invalid kubeconfig: {}", msg),
            KubeConfigError::Exec(msg) => write!(f, "credential plugin failed: {}", msg),
        }
    }
}

impl std::error::Error for KubeConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KubeConfigError::Io(e) => Some(e),
            KubeConfigError::Format(e) => Some(e),
            _ => None,
        }
    }
}

fn default_kubeconfig_path() -> Result<PathBuf, KubeConfigError> {
    if let Ok(path) = std::env::var("KUBECONFIG") {
        // only the first entry of a path list is supported
        if let Some(first) = std::env::split_paths(&path).next() {
            return Ok(first);
        }
    }
    home_dir()
        .map(|home| home.join(".kube").join("config"))
        .ok_or(KubeConfigError::NoHomeDir)
}

// The structs below only cover the parts of a kubeconfig that kf reads.

#[derive(Deserialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "kebab-case")]
struct ClusterInfo {
    server: String,
    certificate_authority_data: Option<String>,
    certificate_authority: Option<PathBuf>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Deserialize, Debug, PartialEq, Clone)]
struct NamedCluster {
    name: String,
    cluster: ClusterInfo,
}

#[derive(Deserialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "kebab-case")]
struct AuthInfo {
    username: Option<String>,
    password: Option<String>,
    token: Option<String>,
    client_certificate_data: Option<String>,
    client_key_data: Option<String>,
    client_certificate: Option<String>,
    client_key: Option<String>,
    #[serde(rename = "as")]
    impersonate: Option<String>,
    #[serde(default)]
    as_groups: Vec<String>,
    exec: Option<ExecConfig>,
}

#[derive(Deserialize, Debug, PartialEq, Clone)]
struct ExecEnvVar {
    name: String,
    value: String,
}

#[derive(Deserialize, Debug, PartialEq, Clone)]
struct ExecConfig {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: Vec<ExecEnvVar>,
}

#[derive(Deserialize, Debug, PartialEq, Clone)]
struct NamedAuthInfo {
    name: String,
    user: AuthInfo,
}

#[derive(Deserialize, Debug, PartialEq, Clone)]
struct ContextInfo {
    cluster: String,
    user: String,
}

#[derive(Deserialize, Debug, PartialEq, Clone)]
struct NamedContext {
    name: String,
    context: ContextInfo,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
struct ExecCredentialStatus {
    token: String,
    expiration_timestamp: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
struct ExecCredential {
    status: ExecCredentialStatus,
}

impl ExecConfig {
    fn run(&self) -> Result<Credentials, KubeConfigError> {
        log::debug!("Running credential plugin: {}", self.command);
        let output = Command::new(self.command.as_str())
            .args(self.args.iter())
            .envs(self.env.iter().map(|e| (e.name.as_str(), e.value.as_str())))
            .output()?;
        if !output.status.success() {
            return Err(KubeConfigError::Exec(format!(
                "'{}' exited with {}",
                self.command, output.status
            )));
        }
        let credential: ExecCredential = serde_yaml::from_slice(output.stdout.as_slice())
            .map_err(|err| {
                KubeConfigError::Exec(format!(
                    "'{}' wrote an invalid ExecCredential: {}",
                    self.command, err
                ))
            })?;
        log::info!(
            "Got token from credential plugin '{}', expires: {:?}",
            self.command,
            credential.status.expiration_timestamp
        );
        Ok(Credentials::bearer_token(&credential.status.token))
    }
}

impl AuthInfo {
    fn credentials(&self, user_name: &str) -> Result<Credentials, KubeConfigError> {
        if let Some(token) = self.token.as_ref() {
            return Ok(Credentials::bearer_token(token));
        }
        if let Some(username) = self.username.as_ref() {
            let password = self.password.as_ref().ok_or_else(|| {
                KubeConfigError::Invalid(format!("user {:?} has a username but no password", user_name))
            })?;
            return Ok(Credentials::basic(username, password));
        }
        if let Some(exec) = self.exec.as_ref() {
            return exec.run();
        }
        match (&self.client_certificate, &self.client_key) {
            (Some(certificate_path), Some(private_key_path)) => {
                return Ok(Credentials::PemPath {
                    certificate_path: certificate_path.clone(),
                    private_key_path: private_key_path.clone(),
                });
            }
            (Some(_), None) => {
                return Err(KubeConfigError::Invalid(
                    "'client-certificate' is set without 'client-key'".to_owned(),
                ))
            }
            _ => {}
        }
        match (&self.client_certificate_data, &self.client_key_data) {
            (Some(certificate), Some(key)) => Ok(Credentials::Pem {
                certificate_base64: certificate.clone(),
                private_key_base64: key.clone(),
            }),
            (Some(_), None) => Err(KubeConfigError::Invalid(
                "'client-certificate-data' is set without 'client-key-data'".to_owned(),
            )),
            _ => Err(KubeConfigError::MissingCredentials(user_name.to_owned())),
        }
    }
}

/// A kubeconfig file loaded into memory
#[derive(Deserialize, Debug, PartialEq, Clone)]
pub struct KubeConfig {
    #[serde(rename = "current-context")]
    current_context: String,
    clusters: Vec<NamedCluster>,
    users: Vec<NamedAuthInfo>,
    contexts: Vec<NamedContext>,
}

impl KubeConfig {
    /// Loads the kubeconfig from `KUBECONFIG` or `~/.kube/config`, returning the path it was
    /// read from along with it.
    pub fn load() -> Result<(KubeConfig, PathBuf), KubeConfigError> {
        let path = default_kubeconfig_path()?;
        let conf = KubeConfig::load_file(&path)?;
        Ok((conf, path))
    }

    pub fn load_file(path: &Path) -> Result<KubeConfig, KubeConfigError> {
        let reader = File::open(path)?;
        let conf = serde_yaml::from_reader(reader)?;
        Ok(conf)
    }

    pub fn current_context(&self) -> &str {
        self.current_context.as_str()
    }

    /// Resolves the current context into a `ClientConfig`. Relative certificate paths are
    /// resolved against `kubeconfig_dir`.
    pub fn create_client_config(
        &self,
        user_agent: String,
        kubeconfig_dir: &Path,
    ) -> Result<ClientConfig, KubeConfigError> {
        let context = self
            .contexts
            .iter()
            .find(|ctx| ctx.name == self.current_context)
            .ok_or_else(|| {
                KubeConfigError::Invalid(format!(
                    "current context {:?} is not defined",
                    self.current_context
                ))
            })?;
        let cluster = self
            .clusters
            .iter()
            .find(|c| c.name == context.context.cluster)
            .ok_or_else(|| {
                KubeConfigError::Invalid(format!(
                    "cluster {:?} is not defined",
                    context.context.cluster
                ))
            })?;
        let user = self
            .users
            .iter()
            .find(|u| u.name == context.context.user)
            .ok_or_else(|| {
                KubeConfigError::Invalid(format!("user {:?} is not defined", context.context.user))
            })?;

        let ca_data = match (
            &cluster.cluster.certificate_authority_data,
            &cluster.cluster.certificate_authority,
        ) {
            (Some(data), _) => Some(CAData::Contents(data.clone())),
            (None, Some(path)) => {
                let resolved = kubeconfig_dir.join(path).to_string_lossy().into_owned();
                log::debug!("Resolved certificate-authority {:?} to {:?}", path, resolved);
                Some(CAData::File(resolved))
            }
            (None, None) => None,
        };

        Ok(ClientConfig {
            api_server_endpoint: cluster.cluster.server.clone(),
            credentials: user.user.credentials(&user.name)?,
            ca_data,
            user_agent,
            verify_ssl_certs: !cluster.cluster.insecure_skip_tls_verify,
            impersonate: user.user.impersonate.clone(),
            impersonate_groups: user.user.as_groups.clone(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: dev
clusters:
- name: dev-cluster
  cluster:
    server: https://10.0.0.1
    certificate-authority: ./ca.crt
users:
- name: dev-user
  user:
    token: abc123
    as: someone@example.com
contexts:
- name: dev
  context:
    cluster: dev-cluster
    user: dev-user
"#;

    #[test]
    fn resolves_current_context() {
        let conf: KubeConfig = serde_yaml::from_str(KUBECONFIG).unwrap();
        assert_eq!("dev", conf.current_context());
        let client = conf
            .create_client_config("kf-test".to_owned(), Path::new("/home/me/.kube"))
            .unwrap();
        assert_eq!("https://10.0.0.1", client.api_server_endpoint);
        assert_eq!(Credentials::bearer_token("abc123"), client.credentials);
        assert_eq!(
            Some(CAData::File("/home/me/.kube/./ca.crt".to_owned())),
            client.ca_data
        );
        assert_eq!(Some("someone@example.com".to_owned()), client.impersonate);
        assert!(client.verify_ssl_certs);
    }

    #[test]
    fn missing_context_is_invalid() {
        let conf: KubeConfig =
            serde_yaml::from_str(&KUBECONFIG.replace("current-context: dev", "current-context: prod"))
                .unwrap();
        let err = conf
            .create_client_config("kf-test".to_owned(), Path::new("."))
            .unwrap_err();
        assert_eq!(
            "invalid kubeconfig: current context \"prod\" is not defined",
            err.to_string()
        );
    }

    #[test]
    fn user_without_credentials_is_rejected() {
        let conf: KubeConfig =
            serde_yaml::from_str(&KUBECONFIG.replace("    token: abc123\n", "")).unwrap();
        let err = conf
            .create_client_config("kf-test".to_owned(), Path::new("."))
            .unwrap_err();
        match err {
            KubeConfigError::MissingCredentials(user) => assert_eq!("dev-user", user),
            other => panic!("expected MissingCredentials, got: {}", other),
        }
    }
}
