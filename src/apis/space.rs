use super::{CommonStatus, EnvVar, Labels, ObjectMeta};
use crate::k8s_types::kf_dev::v1alpha1;

pub const PERMIT_ALL_NETWORK_POLICY: &str = "PermitAll";
pub const DENY_ALL_NETWORK_POLICY: &str = "DenyAll";

/// A Space is the tenancy boundary in kf. Every Space owns the Namespace with the same name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Space {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: SpaceSpec,
    #[serde(default)]
    pub status: SpaceStatus,
}

kube_object!(Space, v1alpha1::Space);

impl Space {
    pub fn new(name: &str) -> Space {
        Space {
            metadata: ObjectMeta::named(None, name),
            ..Default::default()
        }
    }

    /// The first domain the Space reports, which is where routes without a domain end up
    pub fn default_domain_or_blank(&self) -> &str {
        self.status
            .network_config
            .domains
            .first()
            .map(|d| d.domain.as_str())
            .unwrap_or("")
    }

    /// All domains routes in this Space may use
    pub fn domain_names(&self) -> Vec<&str> {
        self.status
            .network_config
            .domains
            .iter()
            .map(|d| d.domain.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceSpec {
    #[serde(default)]
    pub build_config: SpaceSpecBuildConfig,
    #[serde(default)]
    pub runtime_config: SpaceSpecRuntimeConfig,
    #[serde(default)]
    pub network_config: SpaceSpecNetworkConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceSpecBuildConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container_registry: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_account: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceSpecRuntimeConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub node_selector: Labels,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceSpecNetworkConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<SpaceDomain>,
    #[serde(default)]
    pub app_network_policy: NetworkPolicyConfig,
    #[serde(default)]
    pub build_network_policy: NetworkPolicyConfig,
}

/// Either `PermitAll` or `DenyAll` for each direction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPolicyConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ingress: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub egress: String,
}

impl NetworkPolicyConfig {
    pub fn new(ingress: &str, egress: &str) -> NetworkPolicyConfig {
        NetworkPolicyConfig {
            ingress: ingress.to_owned(),
            egress: egress.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceDomain {
    pub domain: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gateway_name: String,
}

impl SpaceDomain {
    pub fn new(domain: &str) -> SpaceDomain {
        SpaceDomain {
            domain: domain.to_owned(),
            gateway_name: String::new(),
        }
    }
}

/// Removes later entries with a domain that was already seen, keeping the order otherwise
pub fn dedupe_space_domains(domains: Vec<SpaceDomain>) -> Vec<SpaceDomain> {
    let mut seen = std::collections::HashSet::new();
    domains
        .into_iter()
        .filter(|d| seen.insert(d.domain.clone()))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceStatus {
    #[serde(flatten)]
    pub common: CommonStatus,
    #[serde(default)]
    pub runtime_config: SpaceStatusRuntimeConfig,
    #[serde(default)]
    pub network_config: SpaceStatusNetworkConfig,
    #[serde(default)]
    pub build_config: SpaceStatusBuildConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceStatusRuntimeConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub node_selector: Labels,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_cpu_min: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_deadline_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_grace_period_seconds: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceStatusNetworkConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<SpaceDomain>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceStatusBuildConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_account: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container_registry: String,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_domain_is_first_status_domain() {
        let mut space = Space::new("dev");
        assert_eq!("", space.default_domain_or_blank());
        space.status.network_config.domains = vec![
            SpaceDomain::new("dev.example.com"),
            SpaceDomain::new("example.com"),
        ];
        assert_eq!("dev.example.com", space.default_domain_or_blank());
        assert_eq!(vec!["dev.example.com", "example.com"], space.domain_names());
    }

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let mut gateway = SpaceDomain::new("a.com");
        gateway.gateway_name = "kf/internal".to_owned();
        let deduped = dedupe_space_domains(vec![
            SpaceDomain::new("b.com"),
            SpaceDomain::new("a.com"),
            gateway,
            SpaceDomain::new("b.com"),
        ]);
        assert_eq!(
            vec![SpaceDomain::new("b.com"), SpaceDomain::new("a.com")],
            deduped
        );
    }

    #[test]
    fn status_round_trips_through_json() {
        let value = serde_json::json!({
            "metadata": {"name": "dev"},
            "spec": {
                "networkConfig": {"appNetworkPolicy": {"ingress": "DenyAll", "egress": "PermitAll"}}
            },
            "status": {
                "observedGeneration": 2,
                "conditions": [{"type": "Ready", "status": "True"}],
                "runtimeConfig": {"progressDeadlineSeconds": 300}
            }
        });
        let space: Space = serde_json::from_value(value).unwrap();
        assert_eq!(Some(2), space.status.common.observed_generation);
        assert_eq!(Some(300), space.status.runtime_config.progress_deadline_seconds);
        assert_eq!("DenyAll", space.spec.network_config.app_network_policy.ingress);
        assert_eq!(
            "True",
            space.status.common.condition("Ready").unwrap().status
        );
    }
}
