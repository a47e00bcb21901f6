use super::{CommonStatus, EnvVar, Labels, LocalObjectReference, ObjectMeta};
use crate::k8s_types::kf_dev::v1alpha1;

pub const BUILTIN_TASK_KIND: &str = "KfBuiltinTask";
pub const BUILTIN_TASK_API_VERSION: &str = "builtin.kf.dev/v1alpha1";
pub const TASK_KIND: &str = "Task";

pub const BUILDPACK_V3_BUILD_TASK: &str = "buildpackv3";
pub const KANIKO_BUILD_TASK: &str = "kaniko";
pub const BUILDPACK_V2_BUILD_TASK: &str = "buildpackv2";

pub const SOURCE_IMAGE_PARAM: &str = "SOURCE_IMAGE";
pub const BUILDPACK_PARAM: &str = "BUILDPACK";
pub const RUN_IMAGE_PARAM: &str = "RUN_IMAGE";
pub const BUILDER_IMAGE_PARAM: &str = "BUILDER_IMAGE";
pub const DOCKERFILE_PARAM: &str = "DOCKERFILE";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildParam {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl BuildParam {
    pub fn new(name: &str, value: impl Into<String>) -> BuildParam {
        BuildParam {
            name: name.to_owned(),
            value: value.into(),
        }
    }
}

/// Describes how to build an image: which task runs, with what parameters, against which
/// source package
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSpec {
    #[serde(default, skip_serializing_if = "LocalObjectReference::is_empty")]
    pub source_package: LocalObjectReference,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<BuildParam>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub node_selector: Labels,
}

impl BuildSpec {
    /// A spec that runs one of the tasks built into kf
    pub fn builtin(task_name: &str, params: Vec<BuildParam>) -> BuildSpec {
        BuildSpec {
            name: task_name.to_owned(),
            kind: BUILTIN_TASK_KIND.to_owned(),
            api_version: BUILTIN_TASK_API_VERSION.to_owned(),
            params,
            ..Default::default()
        }
    }

    pub fn is_builtin(&self) -> bool {
        self.kind == BUILTIN_TASK_KIND
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }
}

impl LocalObjectReference {
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Build {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: BuildSpec,
    #[serde(default)]
    pub status: BuildStatus,
}

kube_object!(Build, v1alpha1::Build);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStatus {
    #[serde(flatten)]
    pub common: CommonStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub build_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<String>,
}

impl Build {
    /// The build finished and produced an image
    pub fn succeeded(&self) -> bool {
        !self.status.image.is_empty()
            && self
                .status
                .common
                .condition("Succeeded")
                .map(|c| c.status == "True")
                .unwrap_or(false)
    }
}
