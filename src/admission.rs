//! Admission time checks that span more than one kind of resource. They exist to fail fast: the
//! reconcilers reach the same failed state eventually, the webhook just reports it before the
//! object is stored.
//!
//! Each check implements `AdmissionCallback` and is registered for the kinds it validates in a
//! `ValidatorRegistry`. Related objects are read through lister traits that are passed to the
//! validator constructors, normally backed by an in-memory cache.
mod listers;
pub mod server;
mod validators;

pub use self::listers::{
    AppLister, CacheLister, ListerError, ServiceInstanceBindingLister, ServiceInstanceLister,
    SpaceLister,
};
pub use self::validators::{
    invalid_domains, AppDomainValidator, RouteDomainValidator, ServiceBrokerDeletionValidator,
    ServiceInstanceBindingValidator, ServiceInstanceDeletionValidator,
};

use crate::k8s_types::K8sType;

use serde::de::DeserializeOwned;
use serde_json::Value;

use std::collections::HashMap;
use std::fmt::{self, Display};
use std::sync::Arc;

#[derive(Debug)]
pub enum Error {
    /// The object didn't match the shape of the type it's supposed to be
    Decode(serde_json::Error),
    Lister(ListerError),
    /// The request would break an invariant
    Rejected(String),
}

impl Error {
    pub fn rejected(message: impl Into<String>) -> Error {
        Error::Rejected(message.into())
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Error::Rejected(_))
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Decode(e) => write!(f, "couldn't decode the object: {}", e),
            Error::Lister(e) => Display::fmt(e, f),
            Error::Rejected(msg) => f.write_str(msg.as_str()),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Decode(e) => Some(e),
            Error::Lister(e) => Some(e),
            Error::Rejected(_) => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Error {
        Error::Decode(e)
    }
}

impl From<ListerError> for Error {
    fn from(e: ListerError) -> Error {
        Error::Lister(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AdmissionOperation {
    Create,
    Update,
    Delete,
    Connect,
}

/// The group, version and kind of the object being admitted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestKind {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub kind: String,
}

impl RequestKind {
    pub fn from_type(k8s_type: &K8sType) -> RequestKind {
        RequestKind {
            group: k8s_type.group().to_owned(),
            version: k8s_type.version().to_owned(),
            kind: k8s_type.kind.to_owned(),
        }
    }
}

/// The parts of an `admission.k8s.io/v1` request the validators use. Deletes carry the object
/// being deleted in `old_object` and nothing in `object`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub kind: RequestKind,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    pub operation: AdmissionOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_object: Option<Value>,
}

impl AdmissionRequest {
    pub fn new(k8s_type: &K8sType, operation: AdmissionOperation, object: Value) -> AdmissionRequest {
        let namespace = crate::resource::str_value(&object, "/metadata/namespace")
            .unwrap_or("")
            .to_owned();
        let name = crate::resource::str_value(&object, "/metadata/name")
            .unwrap_or("")
            .to_owned();
        let (object, old_object) = match operation {
            AdmissionOperation::Delete => (None, Some(object)),
            _ => (Some(object), None),
        };
        AdmissionRequest {
            uid: String::new(),
            kind: RequestKind::from_type(k8s_type),
            namespace,
            name,
            operation,
            object,
            old_object,
        }
    }

    /// Decodes the new object, or the old one for deletes
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let value = self
            .object
            .as_ref()
            .filter(|v| !v.is_null())
            .or_else(|| self.old_object.as_ref())
            .ok_or_else(|| Error::rejected("the request has no object to validate"))?;
        Ok(serde_json::from_value(value.clone())?)
    }
}

pub trait AdmissionCallback: Send + Sync {
    /// Returns an error to block the request
    fn validate(&self, request: &AdmissionRequest) -> Result<(), Error>;
}

impl<F> AdmissionCallback for F
where
    F: Fn(&AdmissionRequest) -> Result<(), Error> + Send + Sync,
{
    fn validate(&self, request: &AdmissionRequest) -> Result<(), Error> {
        self(request)
    }
}

/// Callbacks keyed by the group and kind they validate
#[derive(Default, Clone)]
pub struct ValidatorRegistry {
    callbacks: HashMap<(String, String), Vec<Arc<dyn AdmissionCallback>>>,
}

impl fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ValidatorRegistry")
            .field("kinds", &self.callbacks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ValidatorRegistry {
    pub fn new() -> ValidatorRegistry {
        ValidatorRegistry::default()
    }

    pub fn register(&mut self, k8s_type: &K8sType, callback: Arc<dyn AdmissionCallback>) {
        let key = (k8s_type.group().to_owned(), k8s_type.kind.to_owned());
        self.callbacks.entry(key).or_insert_with(Vec::new).push(callback);
    }

    /// Runs every callback registered for the request's kind and stops at the first error.
    /// Kinds with nothing registered are allowed.
    pub fn validate(&self, request: &AdmissionRequest) -> Result<(), Error> {
        let key = (request.kind.group.clone(), request.kind.kind.clone());
        match self.callbacks.get(&key) {
            Some(callbacks) => callbacks.iter().try_for_each(|cb| cb.validate(request)),
            None => Ok(()),
        }
    }
}

/// Registers the standard kf checks
pub fn standard_registry(
    spaces: Arc<dyn SpaceLister>,
    apps: Arc<dyn AppLister>,
    instances: Arc<dyn ServiceInstanceLister>,
    bindings: Arc<dyn ServiceInstanceBindingLister>,
) -> ValidatorRegistry {
    use crate::k8s_types::kf_dev::v1alpha1;

    let mut registry = ValidatorRegistry::new();
    registry.register(
        v1alpha1::App,
        Arc::new(AppDomainValidator::new(spaces.clone())),
    );
    registry.register(v1alpha1::Route, Arc::new(RouteDomainValidator::new(spaces)));

    let broker_check = Arc::new(ServiceBrokerDeletionValidator::new(instances.clone()));
    registry.register(v1alpha1::ServiceBroker, broker_check.clone());
    registry.register(v1alpha1::ClusterServiceBroker, broker_check);

    registry.register(
        v1alpha1::ServiceInstance,
        Arc::new(ServiceInstanceDeletionValidator::new(bindings)),
    );
    registry.register(
        v1alpha1::ServiceInstanceBinding,
        Arc::new(ServiceInstanceBindingValidator::new(apps, instances)),
    );
    registry
}
