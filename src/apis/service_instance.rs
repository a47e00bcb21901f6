use super::{CommonStatus, LocalObjectReference, ObjectMeta};
use crate::k8s_types::kf_dev::v1alpha1;

use serde::de::{self, Deserializer, Visitor};

use std::fmt::{self, Display};
use std::num::ParseIntError;

pub const USER_PROVIDED_SERVICE_CLASS_NAME: &str = "user-provided";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ServiceInstanceSpec,
    #[serde(default)]
    pub status: ServiceInstanceStatus,
}

kube_object!(ServiceInstance, v1alpha1::ServiceInstance);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstanceSpec {
    #[serde(flatten)]
    pub service_type: ServiceType,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub parameters_from: LocalObjectReference,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub delete_requests: i64,
}

fn is_zero(i: &i64) -> bool {
    *i == 0
}

/// Exactly one of the fields should be set. Validation rejects anything else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceType {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_provided: Option<UserProvidedInstance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brokered: Option<BrokeredInstance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osb: Option<OsbInstance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<OsbInstance>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProvidedInstance {
    #[serde(default, rename = "routeServiceURL", skip_serializing_if = "Option::is_none")]
    pub route_service_url: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mock_class_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mock_plan_name: String,
}

/// An instance provisioned through the service catalog
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokeredInstance {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub broker: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub class_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub plan_name: String,
    #[serde(default, skip_serializing_if = "super::is_false")]
    pub namespaced: bool,
}

/// An instance provisioned by kf talking to an Open Service Broker directly
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsbInstance {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub broker_name: String,
    #[serde(default, skip_serializing_if = "super::is_false")]
    pub namespaced: bool,
    #[serde(default, rename = "classUID", skip_serializing_if = "String::is_empty")]
    pub class_uid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub class_name: String,
    #[serde(default, rename = "planUID", skip_serializing_if = "String::is_empty")]
    pub plan_uid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub plan_name: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub progress_deadline_seconds: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstanceStatus {
    #[serde(flatten)]
    pub common: CommonStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub class_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub plan_name: String,
}

impl ServiceInstance {
    pub fn is_user_provided(&self) -> bool {
        self.spec.service_type.user_provided.is_some()
    }

    /// The name of the broker providing this instance, along with whether that broker is
    /// namespaced. User provided instances have no broker.
    pub fn broker_ref(&self) -> Option<(&str, bool)> {
        let service_type = &self.spec.service_type;
        if let Some(brokered) = service_type.brokered.as_ref() {
            return Some((brokered.broker.as_str(), brokered.namespaced));
        }
        service_type
            .osb
            .as_ref()
            .or_else(|| service_type.volume.as_ref())
            .map(|osb| (osb.broker_name.as_str(), osb.namespaced))
    }
}

/// A user or group id for a mounted volume. Accepts either a string or an integer when
/// decoded, and is always kept as a string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Id(pub String);

impl Id {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Id {
        Id(s.to_owned())
    }
}

struct IdVisitor;

impl<'de> Visitor<'de> for IdVisitor {
    type Value = Id;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a string or integer id")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Id, E> {
        Ok(Id(v.to_owned()))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Id, E> {
        Ok(Id(v.to_string()))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Id, E> {
        Ok(Id(v.to_string()))
    }

    fn visit_f64<E: de::Error>(self, _: f64) -> Result<Id, E> {
        Ok(Id::default())
    }

    fn visit_bool<E: de::Error>(self, _: bool) -> Result<Id, E> {
        Ok(Id::default())
    }

    fn visit_unit<E: de::Error>(self) -> Result<Id, E> {
        Ok(Id::default())
    }
}

impl<'de> serde::Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Id, D::Error> {
        deserializer.deserialize_any(IdVisitor)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InvalidIdError {
    Parse(ParseIntError),
    Negative,
}

impl Display for InvalidIdError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InvalidIdError::Parse(e) => Display::fmt(e, f),
            InvalidIdError::Negative => f.write_str("must be greater than or equal to 0"),
        }
    }
}

impl std::error::Error for InvalidIdError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InvalidIdError::Parse(e) => Some(e),
            InvalidIdError::Negative => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UidGid {
    #[serde(rename = "UID", default, skip_serializing_if = "Id::is_empty")]
    pub uid: Id,
    #[serde(rename = "GID", default, skip_serializing_if = "Id::is_empty")]
    pub gid: Id,
}

fn parse_id(id: &Id) -> Result<i64, InvalidIdError> {
    let parsed = id.0.parse::<i64>().map_err(InvalidIdError::Parse)?;
    if parsed < 0 {
        return Err(InvalidIdError::Negative);
    }
    Ok(parsed)
}

impl UidGid {
    pub fn uid_i64(&self) -> Result<i64, InvalidIdError> {
        parse_id(&self.uid)
    }

    pub fn gid_i64(&self) -> Result<i64, InvalidIdError> {
        parse_id(&self.gid)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstanceBinding {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ServiceInstanceBindingSpec,
    #[serde(default)]
    pub status: ServiceInstanceBindingStatus,
}

kube_object!(ServiceInstanceBinding, v1alpha1::ServiceInstanceBinding);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstanceBindingSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<LocalObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<super::RouteSpecFields>,
    #[serde(default)]
    pub instance_ref: LocalObjectReference,
    #[serde(default)]
    pub parameters_from: LocalObjectReference,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub binding_name_override: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub progress_deadline_seconds: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub unbind_requests: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstanceBindingStatus {
    #[serde(flatten)]
    pub common: CommonStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub binding_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_status: Option<BindingVolumeStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingVolumeStatus {
    pub mount: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub volume_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub claim_name: String,
    #[serde(default, rename = "readonly", skip_serializing_if = "super::is_false")]
    pub read_only: bool,
    #[serde(flatten)]
    pub ids: UidGid,
}

impl ServiceInstanceBinding {
    pub fn app_name(&self) -> Option<&str> {
        self.spec.app.as_ref().map(|app| app.name.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonServiceBrokerSpec {
    #[serde(default)]
    pub update_requests: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceBrokerSpec {
    #[serde(flatten)]
    pub common: CommonServiceBrokerSpec,
    #[serde(default)]
    pub credentials: LocalObjectReference,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceBroker {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ServiceBrokerSpec,
    #[serde(default)]
    pub status: CommonStatus,
}

kube_object!(ServiceBroker, v1alpha1::ServiceBroker);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespacedObjectReference {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterServiceBrokerSpec {
    #[serde(flatten)]
    pub common: CommonServiceBrokerSpec,
    #[serde(default)]
    pub credentials: NamespacedObjectReference,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterServiceBroker {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ClusterServiceBrokerSpec,
    #[serde(default)]
    pub status: CommonStatus,
}

kube_object!(ClusterServiceBroker, v1alpha1::ClusterServiceBroker);

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_accept_strings_and_integers() {
        let ids: UidGid = serde_json::from_value(json!({"UID": "2001", "GID": 2002})).unwrap();
        assert_eq!(Id::from("2001"), ids.uid);
        assert_eq!(Id::from("2002"), ids.gid);
        assert_eq!(Ok(2001), ids.uid_i64());
        assert_eq!(Ok(2002), ids.gid_i64());

        let odd: UidGid = serde_json::from_value(json!({"UID": true, "GID": null})).unwrap();
        assert!(odd.uid.is_empty());
        assert!(odd.gid.is_empty());
    }

    #[test]
    fn negative_and_malformed_ids_are_rejected() {
        let ids = UidGid {
            uid: Id::from("-1"),
            gid: Id::from("abc"),
        };
        assert_eq!(
            "must be greater than or equal to 0",
            ids.uid_i64().unwrap_err().to_string()
        );
        match ids.gid_i64() {
            Err(InvalidIdError::Parse(_)) => {}
            other => panic!("expected a parse error, got: {:?}", other),
        }
    }

    #[test]
    fn broker_ref_covers_brokered_and_osb_instances() {
        let mut instance = ServiceInstance::default();
        assert_eq!(None, instance.broker_ref());

        instance.spec.service_type.osb = Some(OsbInstance {
            broker_name: "cats".to_owned(),
            namespaced: true,
            ..Default::default()
        });
        assert_eq!(Some(("cats", true)), instance.broker_ref());

        instance.spec.service_type.osb = None;
        instance.spec.service_type.brokered = Some(BrokeredInstance {
            broker: "dogs".to_owned(),
            ..Default::default()
        });
        assert_eq!(Some(("dogs", false)), instance.broker_ref());
    }

    #[test]
    fn service_type_is_inlined_in_spec() {
        let instance: ServiceInstance = serde_json::from_value(json!({
            "metadata": {"name": "db", "namespace": "dev"},
            "spec": {
                "osb": {"brokerName": "b", "classUID": "c-1", "planUID": "p-1"},
                "tags": ["sql"],
                "parametersFrom": {"name": "db-params"}
            }
        }))
        .unwrap();
        let osb = instance.spec.service_type.osb.as_ref().unwrap();
        assert_eq!("c-1", osb.class_uid);
        assert_eq!("p-1", osb.plan_uid);
        assert_eq!("db-params", instance.spec.parameters_from.name);
    }
}
