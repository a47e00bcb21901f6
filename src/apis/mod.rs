//! Typed models of the kf custom resources, and the metadata types shared by every object kf
//! reads or writes. Only the kf resources get full structs. Pod specs and generated children
//! stay as `serde_json::Value` so fields kf doesn't know about survive a round trip.

macro_rules! kube_object {
    ($t:ty, $k8s_type:expr) => {
        impl crate::apis::KubeObject for $t {
            fn meta(&self) -> &crate::apis::ObjectMeta {
                &self.metadata
            }
            fn meta_mut(&mut self) -> &mut crate::apis::ObjectMeta {
                &mut self.metadata
            }
        }

        impl crate::apis::Resource for $t {
            fn k8s_type() -> &'static crate::k8s_types::K8sType {
                $k8s_type
            }
        }
    };
}

mod app;
mod build;
mod route;
mod service_instance;
mod space;
pub mod validation;

pub use self::app::*;
pub use self::build::*;
pub use self::route::*;
pub use self::service_instance::*;
pub use self::space::*;

use crate::k8s_types::K8sType;

use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use std::collections::BTreeMap;

pub const NAME_LABEL: &str = "app.kubernetes.io/name";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";
pub const VERSION_LABEL: &str = "app.kubernetes.io/version";
pub const NETWORK_POLICY_LABEL: &str = "kf.dev/networkpolicy";
pub const NETWORK_POLICY_APP: &str = "app";
pub const NETWORK_POLICY_BUILD: &str = "build";
pub const MANAGED_BY_KF: &str = "kf";

pub type Labels = BTreeMap<String, String>;

pub(crate) fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_owner_deletion: Option<bool>,
}

impl OwnerReference {
    /// An owner reference that marks `owner` as the managing controller of the child, so the
    /// child is garbage collected when the owner goes away
    pub fn new_controller_ref(k8s_type: &K8sType, owner: &ObjectMeta) -> OwnerReference {
        OwnerReference {
            api_version: k8s_type.api_version.to_owned(),
            kind: k8s_type.kind.to_owned(),
            name: owner.name.clone(),
            uid: owner.uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: Labels,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
}

impl ObjectMeta {
    pub fn named(namespace: Option<&str>, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: name.to_owned(),
            namespace: namespace.map(str::to_owned),
            ..Default::default()
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref().filter(|ns| !ns.is_empty())
    }

    pub fn is_being_deleted(&self) -> bool {
        self.deletion_timestamp.is_some()
    }
}

/// Anything with standard Kubernetes object metadata
pub trait KubeObject: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn name(&self) -> &str {
        self.meta().name.as_str()
    }
}

/// A `KubeObject` whose type is known at compile time
pub trait Resource: KubeObject {
    fn k8s_type() -> &'static K8sType;
}

/// Any object, with typed metadata and everything else kept as json
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicObject {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

impl KubeObject for DynamicObject {
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl DynamicObject {
    pub fn from_value(value: Value) -> Result<DynamicObject, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn is_type(&self, k8s_type: &K8sType) -> bool {
        k8s_type.matches(self.api_version.as_str(), self.kind.as_str())
    }
}

/// A reference to an object in the same namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalObjectReference {
    #[serde(default)]
    pub name: String,
}

impl LocalObjectReference {
    pub fn new(name: impl Into<String>) -> LocalObjectReference {
        LocalObjectReference { name: name.into() }
    }
}

/// A knative style status condition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// The status fields shared by every kf resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl CommonStatus {
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }
}

/// An entry of a container's `env`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<Value>,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> EnvVar {
        EnvVar {
            name: name.into(),
            value: Some(value.into()),
            value_from: None,
        }
    }

    pub fn from_source(name: impl Into<String>, value_from: Value) -> EnvVar {
        EnvVar {
            name: name.into(),
            value: None,
            value_from: Some(value_from),
        }
    }
}

/// Labels common to every child kf creates for an App
pub fn app_component_labels(app_name: &str, component: &str) -> Labels {
    let mut labels = Labels::new();
    labels.insert(NAME_LABEL.to_owned(), app_name.to_owned());
    labels.insert(MANAGED_BY_LABEL.to_owned(), MANAGED_BY_KF.to_owned());
    labels.insert(COMPONENT_LABEL.to_owned(), component.to_owned());
    labels
}

/// Merges the maps in order, so later maps win on conflicts
pub fn union_maps<'a, I>(maps: I) -> Labels
where
    I: IntoIterator<Item = &'a Labels>,
{
    let mut result = Labels::new();
    for map in maps {
        for (k, v) in map {
            result.insert(k.clone(), v.clone());
        }
    }
    result
}

lazy_static! {
    static ref INVALID_DNS_CHARS: Regex = Regex::new("[^a-z0-9_-]").unwrap();
}

const CHECKSUM_ALGORITHM: crc::Crc<u64> = crc::Crc::<u64>::new(&crc::CRC_64_XZ);

const MAX_GENERATED_NAME_LEN: usize = 64;

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_owned();
    }
    let mut out = Vec::with_capacity(13);
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    out.into_iter().map(char::from).collect()
}

/// The base 36 CRC-64 of the string, used where a label value has to stand in for text that
/// isn't a valid label
pub(crate) fn checksum_base36(s: &str) -> String {
    to_base36(CHECKSUM_ALGORITHM.checksum(s.as_bytes()))
}

/// Deterministically builds a DNS safe name from the given parts. The result is
/// `<prefix>-<checksum>`, where the checksum is the base 36 CRC-64 of the parts. The prefix is
/// truncated so the whole name never exceeds 64 characters.
pub fn generate_name(parts: &[&str]) -> String {
    let checksum = to_base36(CHECKSUM_ALGORITHM.checksum(parts.concat().as_bytes()));

    let prefix = parts.join("-").to_lowercase();
    let prefix = INVALID_DNS_CHARS.replace_all(prefix.as_str(), "-");
    let prefix = prefix.trim_start_matches(|c: char| !c.is_ascii_alphanumeric());

    let max_prefix_len = MAX_GENERATED_NAME_LEN - 1 - checksum.len();
    let prefix = if prefix.len() > max_prefix_len {
        &prefix[..max_prefix_len]
    } else {
        prefix
    };

    if prefix.is_empty() {
        checksum
    } else {
        format!("{}-{}", prefix, checksum)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn generate_name_is_deterministic() {
        let a = generate_name(&["host-1", "example1.com"]);
        assert_eq!(a, generate_name(&["host-1", "example1.com"]));
        assert_ne!(a, generate_name(&["host-2", "example1.com"]));
        assert_ne!(a, generate_name(&["host-1", "example2.com"]));
        assert!(a.starts_with("host-1-example1-com-"));
    }

    #[test]
    fn generate_name_is_dns_safe() {
        let valid = Regex::new("^[a-z0-9]([-a-z0-9_]*[a-z0-9])?$").unwrap();
        let long = "X".repeat(200);
        for parts in vec![
            vec![],
            vec![".", "-", "$"],
            vec!["My.App", "Some Space"],
            vec![long.as_str(), "suffix"],
        ] {
            let name = generate_name(parts.as_slice());
            assert!(name.len() <= 64, "name too long: {}", name);
            assert!(valid.is_match(&name), "invalid name: {}", name);
        }
    }

    #[test]
    fn checksum_is_base36_crc64() {
        assert_eq!("2uusd3k2mp26d", checksum_base36("/some/path"));
        assert_eq!("1vx3db3z8u2rf", checksum_base36("host-1example1.com"));
    }

    #[test]
    fn union_maps_prefers_later_maps() {
        let first = app_component_labels("my-app", "build");
        let mut second = Labels::new();
        second.insert(COMPONENT_LABEL.to_owned(), "app-server".to_owned());
        let merged = union_maps(vec![&first, &second]);
        assert_eq!("app-server", merged[COMPONENT_LABEL]);
        assert_eq!("my-app", merged[NAME_LABEL]);
        assert_eq!("kf", merged[MANAGED_BY_LABEL]);
    }

    #[test]
    fn controller_ref_points_at_owner() {
        let mut meta = ObjectMeta::named(Some("ns"), "my-app");
        meta.uid = Some("1234".to_owned());
        let owner = OwnerReference::new_controller_ref(
            crate::k8s_types::kf_dev::v1alpha1::App,
            &meta,
        );
        assert_eq!("kf.dev/v1alpha1", owner.api_version);
        assert_eq!("App", owner.kind);
        assert_eq!("1234", owner.uid);
        assert_eq!(Some(true), owner.controller);
    }

    #[test]
    fn dynamic_object_preserves_unknown_fields() {
        let value = serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "cm", "namespace": "ns"},
            "data": {"a": "b"}
        });
        let obj = DynamicObject::from_value(value.clone()).unwrap();
        assert!(obj.is_type(crate::k8s_types::core::v1::ConfigMap));
        assert_eq!(value, obj.to_value().unwrap());
    }
}
