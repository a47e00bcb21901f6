use super::{
    app_component_labels, BuildSpec, CommonStatus, Labels, LocalObjectReference, ObjectMeta,
    QualifiedRouteBinding, RouteWeightBinding, UidGid,
};
use crate::k8s_types::kf_dev::v1alpha1;

use serde_json::Value;

use std::fmt::{self, Display};

pub const APP_SERVER_COMPONENT: &str = "app-server";
pub const DEFAULT_USER_CONTAINER_NAME: &str = "user-container";
pub const CPU_RULE_TYPE: &str = "CPU";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct App {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: AppSpec,
    #[serde(default)]
    pub status: AppStatus,
}

kube_object!(App, v1alpha1::App);

impl App {
    pub fn new(namespace: &str, name: &str) -> App {
        App {
            metadata: ObjectMeta::named(Some(namespace), name),
            ..Default::default()
        }
    }

    pub fn component_labels(&self, component: &str) -> Labels {
        app_component_labels(self.metadata.name.as_str(), component)
    }

    /// The first container of the pod template, which is the one kf runs the App in
    pub fn user_container(&self) -> Option<&Value> {
        self.spec
            .template
            .spec
            .get("containers")
            .and_then(Value::as_array)
            .and_then(|containers| containers.first())
    }

    /// The port the App listens on, which is the first declared container port or else 8080
    pub fn user_port(&self) -> i32 {
        self.user_container()
            .and_then(|c| c.pointer("/ports/0/containerPort"))
            .and_then(Value::as_i64)
            .map(|p| p as i32)
            .unwrap_or(DEFAULT_USER_PORT)
    }
}

pub const DEFAULT_USER_PORT: i32 = 8080;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSpec {
    #[serde(default)]
    pub build: AppSpecBuild,
    #[serde(default)]
    pub template: AppSpecTemplate,
    #[serde(default)]
    pub instances: AppSpecInstances,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteWeightBinding>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSpecBuild {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub update_requests: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<BuildSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_ref: Option<LocalObjectReference>,
}

fn is_zero(i: &i64) -> bool {
    *i == 0
}

/// The pod template for the App. The pod spec stays untyped so it round trips unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSpecTemplate {
    #[serde(default)]
    pub update_requests: i64,
    #[serde(default = "empty_object")]
    pub spec: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Default for AppSpecTemplate {
    fn default() -> AppSpecTemplate {
        AppSpecTemplate {
            update_requests: 0,
            spec: empty_object(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSpecInstances {
    #[serde(default)]
    pub autoscaling: AppSpecAutoscaling,
    #[serde(default, skip_serializing_if = "super::is_false")]
    pub stopped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSpecAutoscaling {
    #[serde(default, skip_serializing_if = "super::is_false")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<AppAutoscalingRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppAutoscalingRule {
    #[serde(default)]
    pub rule_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<i32>,
}

impl AppSpecAutoscaling {
    pub fn requires_hpa(&self) -> bool {
        self.enabled && self.max_replicas.is_some() && !self.rules.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExactScaleRequired;

impl Display for ExactScaleRequired {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Exact scale required for deployment based setup")
    }
}

impl std::error::Error for ExactScaleRequired {}

impl AppSpecInstances {
    /// The replica count for the Deployment. Stopped Apps have none.
    pub fn deployment_replicas(&self) -> Result<i32, ExactScaleRequired> {
        if self.stopped {
            Ok(0)
        } else {
            self.replicas.ok_or(ExactScaleRequired)
        }
    }

    /// The scale the App is expected to run at, along with a human readable description
    pub fn status(&self) -> InstanceStatus {
        let (replicas, mut representation) = if self.stopped {
            (0, "stopped".to_owned())
        } else if let Some(replicas) = self.replicas {
            (replicas, replicas.to_string())
        } else {
            (1, "1".to_owned())
        };

        if !self.stopped && self.autoscaling.requires_hpa() {
            representation.push_str(&format!(
                " (autoscaled {} to {})",
                self.autoscaling.min_replicas.unwrap_or_default(),
                self.autoscaling.max_replicas.unwrap_or_default()
            ));
        }

        InstanceStatus {
            replicas,
            representation,
            label_selector: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStatus {
    #[serde(flatten)]
    pub common: CommonStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub build_name: String,
    #[serde(default, rename = "latestReadyBuild", skip_serializing_if = "String::is_empty")]
    pub latest_ready_build_name: String,
    #[serde(default, rename = "latestBuild", skip_serializing_if = "String::is_empty")]
    pub latest_created_build_name: String,
    #[serde(default, rename = "serviceBindings", skip_serializing_if = "Vec::is_empty")]
    pub service_binding_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<AppRouteStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<AppVolumeStatus>,
    #[serde(default)]
    pub instances: InstanceStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_account_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppVolumeStatus {
    pub mount_path: String,
    #[serde(rename = "name")]
    pub volume_name: String,
    #[serde(rename = "claim")]
    pub volume_claim_name: String,
    #[serde(default, rename = "readonly", skip_serializing_if = "super::is_false")]
    pub read_only: bool,
    #[serde(flatten)]
    pub ids: UidGid,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    #[serde(default)]
    pub replicas: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub representation: String,
    #[serde(default)]
    pub label_selector: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRouteStatus {
    #[serde(flatten)]
    pub binding: QualifiedRouteBinding,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn rule() -> AppAutoscalingRule {
        AppAutoscalingRule {
            rule_type: CPU_RULE_TYPE.to_owned(),
            target: Some(80),
        }
    }

    #[test]
    fn requires_hpa_needs_enabled_max_and_rules() {
        let mut autoscaling = AppSpecAutoscaling::default();
        assert!(!autoscaling.requires_hpa());
        autoscaling.enabled = true;
        autoscaling.max_replicas = Some(5);
        assert!(!autoscaling.requires_hpa());
        autoscaling.rules.push(rule());
        assert!(autoscaling.requires_hpa());
    }

    #[test]
    fn deployment_replicas() {
        let mut instances = AppSpecInstances::default();
        assert_eq!(
            "Exact scale required for deployment based setup",
            instances.deployment_replicas().unwrap_err().to_string()
        );
        instances.replicas = Some(3);
        assert_eq!(Ok(3), instances.deployment_replicas());
        instances.stopped = true;
        assert_eq!(Ok(0), instances.deployment_replicas());
    }

    #[test]
    fn instance_status_representation() {
        let mut instances = AppSpecInstances::default();
        assert_eq!("1", instances.status().representation);
        assert_eq!(1, instances.status().replicas);

        instances.replicas = Some(4);
        instances.autoscaling = AppSpecAutoscaling {
            enabled: true,
            min_replicas: Some(2),
            max_replicas: Some(6),
            rules: vec![rule()],
        };
        assert_eq!("4 (autoscaled 2 to 6)", instances.status().representation);

        instances.stopped = true;
        let stopped = instances.status();
        assert_eq!("stopped", stopped.representation);
        assert_eq!(0, stopped.replicas);
    }

    #[test]
    fn user_port_comes_from_first_container() {
        let mut app = App::new("dev", "my-app");
        assert_eq!(8080, app.user_port());
        app.spec.template.spec = json!({
            "containers": [{"ports": [{"containerPort": 9000}, {"containerPort": 9001}]}]
        });
        assert_eq!(9000, app.user_port());
    }

    #[test]
    fn app_round_trips_unknown_pod_fields() {
        let value = json!({
            "metadata": {"name": "my-app", "namespace": "dev"},
            "spec": {
                "build": {"image": "nginx"},
                "template": {"updateRequests": 2, "spec": {"containers": [{"name": "x", "someNewField": 1}]}},
                "instances": {"replicas": 2},
                "routes": [{"hostname": "my-app", "domain": "example.com", "weight": 2}]
            },
            "status": {"volumes": [{"mountPath": "/data", "name": "v", "claim": "c", "UID": 1000, "GID": "1000"}]}
        });
        let app: App = serde_json::from_value(value).unwrap();
        assert_eq!(Some("nginx"), app.spec.build.image.as_deref());
        assert_eq!(Some(2), app.spec.routes[0].weight);
        assert_eq!("1000", app.status.volumes[0].ids.uid.0);
        let out = serde_json::to_value(&app).unwrap();
        assert_eq!(json!(1), out["spec"]["template"]["spec"]["containers"][0]["someNewField"]);
    }
}
