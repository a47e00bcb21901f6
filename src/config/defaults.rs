use crate::error::ConfigError;

use serde::de::DeserializeOwned;
use serde::Serialize;

use std::collections::BTreeMap;

/// Name of the ConfigMap in the kf namespace that holds the cluster wide defaults
pub const DEFAULTS_CONFIG_NAME: &str = "config-defaults";

const SPACE_CLUSTER_DOMAINS_KEY: &str = "spaceClusterDomains";
const PROGRESS_DEADLINE_SECONDS_KEY: &str = "progressDeadlineSeconds";
const TERMINATION_GRACE_PERIOD_SECONDS_KEY: &str = "terminationGracePeriodSeconds";
const FEATURE_FLAGS_KEY: &str = "featureFlags";
const APP_CPU_MIN_KEY: &str = "appCPUMin";
const BUILD_DISABLE_ISTIO_SIDECAR_KEY: &str = "buildDisableIstioSidecar";

const SPACE_NAME_PLACEHOLDER: &str = "$(SPACE_NAME)";

/// A domain that every Space gets. The domain may contain `$(SPACE_NAME)`, which is replaced
/// with the name of the Space it's applied to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainTemplate {
    pub domain: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gateway_name: String,
}

impl DomainTemplate {
    pub fn new(domain: impl Into<String>) -> DomainTemplate {
        DomainTemplate {
            domain: domain.into(),
            gateway_name: String::new(),
        }
    }

    pub fn resolve(&self, space_name: &str) -> String {
        self.domain.replace(SPACE_NAME_PLACEHOLDER, space_name)
    }
}

/// Named feature toggles. Flags that aren't present are disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureFlags(pub BTreeMap<String, bool>);

impl FeatureFlags {
    pub fn is_enabled(&self, name: &str) -> bool {
        self.0.get(name).copied().unwrap_or(false)
    }

    /// True only if the flag is explicitly set to false
    pub fn is_disabled(&self, name: &str) -> bool {
        self.0.get(name) == Some(&false)
    }

    pub fn set(&mut self, name: impl Into<String>, enabled: bool) {
        self.0.insert(name.into(), enabled);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Cluster wide defaults. Each key of the ConfigMap holds a YAML document.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultsConfig {
    pub space_cluster_domains: Vec<DomainTemplate>,
    pub progress_deadline_seconds: i32,
    pub termination_grace_period_seconds: i64,
    pub feature_flags: FeatureFlags,
    pub app_cpu_min: String,
    pub build_disable_istio_sidecar: bool,
}

impl Default for DefaultsConfig {
    fn default() -> DefaultsConfig {
        DefaultsConfig::builtin()
    }
}

fn parse_key<T: DeserializeOwned>(
    data: &BTreeMap<String, String>,
    key: &str,
    target: &mut T,
) -> Result<(), ConfigError> {
    if let Some(raw) = data.get(key) {
        if raw.trim().is_empty() {
            return Ok(());
        }
        *target = serde_yaml::from_str(raw).map_err(|err| {
            ConfigError::new(format!("couldn't parse {} in {}: {}", key, DEFAULTS_CONFIG_NAME, err))
        })?;
    }
    Ok(())
}

fn write_key<T: Serialize>(
    data: &mut BTreeMap<String, String>,
    key: &str,
    value: &T,
) -> Result<(), ConfigError> {
    let encoded = serde_yaml::to_string(value).map_err(|err| {
        ConfigError::new(format!("couldn't encode {}: {}", key, err))
    })?;
    data.insert(key.to_owned(), encoded);
    Ok(())
}

impl DefaultsConfig {
    /// The values used when the ConfigMap doesn't set anything
    pub fn builtin() -> DefaultsConfig {
        DefaultsConfig {
            space_cluster_domains: Vec::new(),
            progress_deadline_seconds: 600,
            termination_grace_period_seconds: 30,
            feature_flags: FeatureFlags::default(),
            app_cpu_min: "100m".to_owned(),
            build_disable_istio_sidecar: false,
        }
    }

    /// Reads the defaults from the `data` of the ConfigMap. Keys that aren't set keep their
    /// builtin values and unknown keys are ignored.
    pub fn from_config_map(data: &BTreeMap<String, String>) -> Result<DefaultsConfig, ConfigError> {
        let mut config = DefaultsConfig::builtin();
        parse_key(data, SPACE_CLUSTER_DOMAINS_KEY, &mut config.space_cluster_domains)?;
        parse_key(data, PROGRESS_DEADLINE_SECONDS_KEY, &mut config.progress_deadline_seconds)?;
        parse_key(
            data,
            TERMINATION_GRACE_PERIOD_SECONDS_KEY,
            &mut config.termination_grace_period_seconds,
        )?;
        parse_key(data, FEATURE_FLAGS_KEY, &mut config.feature_flags)?;
        parse_key(data, APP_CPU_MIN_KEY, &mut config.app_cpu_min)?;
        parse_key(
            data,
            BUILD_DISABLE_ISTIO_SIDECAR_KEY,
            &mut config.build_disable_istio_sidecar,
        )?;
        log::debug!("Loaded {}: {:?}", DEFAULTS_CONFIG_NAME, config);
        Ok(config)
    }

    /// Writes the non-empty values back into ConfigMap data, leaving any other keys alone.
    pub fn patch_config_map(&self, data: &mut BTreeMap<String, String>) -> Result<(), ConfigError> {
        if !self.space_cluster_domains.is_empty() {
            write_key(data, SPACE_CLUSTER_DOMAINS_KEY, &self.space_cluster_domains)?;
        }
        if self.progress_deadline_seconds != 0 {
            write_key(data, PROGRESS_DEADLINE_SECONDS_KEY, &self.progress_deadline_seconds)?;
        }
        if self.termination_grace_period_seconds != 0 {
            write_key(
                data,
                TERMINATION_GRACE_PERIOD_SECONDS_KEY,
                &self.termination_grace_period_seconds,
            )?;
        }
        if !self.feature_flags.is_empty() {
            write_key(data, FEATURE_FLAGS_KEY, &self.feature_flags)?;
        }
        if !self.app_cpu_min.is_empty() {
            write_key(data, APP_CPU_MIN_KEY, &self.app_cpu_min)?;
        }
        if self.build_disable_istio_sidecar {
            write_key(
                data,
                BUILD_DISABLE_ISTIO_SIDECAR_KEY,
                &self.build_disable_istio_sidecar,
            )?;
        }
        Ok(())
    }

    /// The cluster domains resolved for a single Space
    pub fn space_domains(&self, space_name: &str) -> Vec<DomainTemplate> {
        self.space_cluster_domains
            .iter()
            .map(|template| DomainTemplate {
                domain: template.resolve(space_name),
                gateway_name: template.gateway_name.clone(),
            })
            .collect()
    }
}
