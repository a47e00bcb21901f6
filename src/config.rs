//! Configuration for talking to the api server (`ClientConfig`), for the cluster wide defaults
//! stored in the `config-defaults` ConfigMap (`DefaultsConfig`), and for the polling and retry
//! behavior of the generic client (`WaitOptions`, `RetryPolicy`).
mod defaults;
mod kubeconfig;
mod wait;

pub use self::defaults::{DefaultsConfig, DomainTemplate, FeatureFlags, DEFAULTS_CONFIG_NAME};
pub use self::kubeconfig::{KubeConfig, KubeConfigError};
pub use self::wait::{CancelToken, RetryPolicy, WaitOptions};
pub(crate) use self::wait::ConflictBackoff;

use std::fs;
use std::io;
use std::path::Path;

const SERVICE_ACCOUNT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const SERVICE_ACCOUNT_CA_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";
const API_SERVER_HOSTNAME: &str = "kubernetes.default.svc";

/// Where to find the certificate authority used to verify the api server
#[derive(Debug, Clone, PartialEq)]
pub enum CAData {
    /// Path to a PEM file
    File(String),
    /// Base64 encoded PEM contents, as found inline in a kubeconfig
    Contents(String),
}

/// How requests to the api server are authenticated
#[derive(Debug, Clone, PartialEq)]
pub enum Credentials {
    /// A complete `Authorization` header value
    Header(String),
    /// Client certificate and key stored in PEM files
    PemPath {
        certificate_path: String,
        private_key_path: String,
    },
    /// Base64 encoded client certificate and key
    Pem {
        certificate_base64: String,
        private_key_base64: String,
    },
}

impl Credentials {
    pub fn bearer_token(token: &str) -> Credentials {
        Credentials::Header(format!("Bearer {}", token.trim()))
    }

    pub fn basic(username: &str, password: &str) -> Credentials {
        let encoded = base64::encode(format!("{}:{}", username, password).as_bytes());
        Credentials::Header(format!("Basic {}", encoded))
    }

    pub(crate) fn header_value(&self) -> Option<&str> {
        match self {
            Credentials::Header(value) => Some(value.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub api_server_endpoint: String,
    pub credentials: Credentials,
    pub ca_data: Option<CAData>,
    pub user_agent: String,
    pub verify_ssl_certs: bool,
    pub impersonate: Option<String>,
    pub impersonate_groups: Vec<String>,
}

impl ClientConfig {
    /// Configuration for running inside a pod, using the mounted service account token
    pub fn from_service_account(user_agent: impl Into<String>) -> Result<ClientConfig, io::Error> {
        let token = fs::read_to_string(SERVICE_ACCOUNT_TOKEN_PATH)?;
        let ca_data = if Path::new(SERVICE_ACCOUNT_CA_PATH).exists() {
            Some(CAData::File(SERVICE_ACCOUNT_CA_PATH.to_owned()))
        } else {
            None
        };

        Ok(ClientConfig {
            api_server_endpoint: format!("https://{}", API_SERVER_HOSTNAME),
            credentials: Credentials::bearer_token(&token),
            ca_data,
            user_agent: user_agent.into(),
            verify_ssl_certs: true,
            impersonate: None,
            impersonate_groups: Vec::new(),
        })
    }

    /// Configuration from the current context of the user's kubeconfig, which is found using
    /// the `KUBECONFIG` environment variable or else `~/.kube/config`
    pub fn from_kubeconfig(user_agent: impl Into<String>) -> Result<ClientConfig, KubeConfigError> {
        let (kubeconfig, path) = KubeConfig::load()?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        kubeconfig.create_client_config(user_agent.into(), dir)
    }

    /// Tries the in-cluster service account first and falls back to the kubeconfig
    pub fn load(user_agent: &str) -> Result<ClientConfig, KubeConfigError> {
        match ClientConfig::from_service_account(user_agent) {
            Ok(config) => Ok(config),
            Err(err) => {
                log::debug!(
                    "Not using service account credentials ({}), trying kubeconfig",
                    err
                );
                ClientConfig::from_kubeconfig(user_agent)
            }
        }
    }
}
