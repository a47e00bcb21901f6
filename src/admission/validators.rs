use super::{
    AdmissionCallback, AdmissionOperation, AdmissionRequest, AppLister, Error, ListerError,
    ServiceInstanceBindingLister, ServiceInstanceLister, SpaceLister,
};
use crate::apis::{App, Route, ServiceInstance, ServiceInstanceBinding, Space};
use crate::k8s_types::kf_dev::v1alpha1;
use crate::resource::str_value;

use serde_json::Value;

use std::collections::BTreeSet;
use std::sync::Arc;

fn format_list<S: AsRef<str>>(items: &[S]) -> String {
    let joined: Vec<&str> = items.iter().map(AsRef::as_ref).collect();
    format!("[{}]", joined.join(", "))
}

/// Returns the requested domains that aren't in the allowed set, sorted and without
/// duplicates. Empty domains are ignored since they get the Space's default domain.
pub fn invalid_domains<'a>(allowed: &[&str], requested: &[&'a str]) -> Vec<&'a str> {
    let allowed: BTreeSet<&str> = allowed.iter().copied().collect();
    requested
        .iter()
        .copied()
        .filter(|domain| !domain.is_empty() && !allowed.contains(domain))
        .collect::<BTreeSet<&str>>()
        .into_iter()
        .collect()
}

fn check_domains(spaces: &dyn SpaceLister, namespace: &str, requested: &[&str]) -> Result<(), Error> {
    if requested.iter().all(|d| d.is_empty()) {
        return Ok(());
    }
    let space: Space = spaces.get_space(namespace)?;
    let mut allowed = space.domain_names();
    let invalid = invalid_domains(allowed.as_slice(), requested);
    if invalid.is_empty() {
        return Ok(());
    }
    allowed.sort_unstable();
    allowed.dedup();
    Err(Error::rejected(format!(
        "the domains {} are not permitted in Space \"{}\", valid domains are {}",
        format_list(invalid.as_slice()),
        namespace,
        format_list(allowed.as_slice())
    )))
}

/// Every route domain on an App must be one of its Space's domains
pub struct AppDomainValidator {
    spaces: Arc<dyn SpaceLister>,
}

impl AppDomainValidator {
    pub fn new(spaces: Arc<dyn SpaceLister>) -> AppDomainValidator {
        AppDomainValidator { spaces }
    }
}

impl AdmissionCallback for AppDomainValidator {
    fn validate(&self, request: &AdmissionRequest) -> Result<(), Error> {
        if request.operation == AdmissionOperation::Delete {
            return Ok(());
        }
        let app: App = request.decode()?;
        let domains: Vec<&str> = app
            .spec
            .routes
            .iter()
            .map(|binding| binding.route.domain.as_str())
            .collect();
        let namespace = app.metadata.namespace().unwrap_or(request.namespace.as_str());
        check_domains(self.spaces.as_ref(), namespace, domains.as_slice())
    }
}

/// A Route's domain must be one of its Space's domains. Only checked on create, so a Route
/// whose domain was later removed from the Space can still be updated and cleaned up.
pub struct RouteDomainValidator {
    spaces: Arc<dyn SpaceLister>,
}

impl RouteDomainValidator {
    pub fn new(spaces: Arc<dyn SpaceLister>) -> RouteDomainValidator {
        RouteDomainValidator { spaces }
    }
}

impl AdmissionCallback for RouteDomainValidator {
    fn validate(&self, request: &AdmissionRequest) -> Result<(), Error> {
        if request.operation != AdmissionOperation::Create {
            return Ok(());
        }
        let route: Route = request.decode()?;
        let namespace = route.metadata.namespace().unwrap_or(request.namespace.as_str());
        check_domains(
            self.spaces.as_ref(),
            namespace,
            &[route.spec.fields.domain.as_str()],
        )
    }
}

/// The names of the instances provided by the broker, sorted
fn instances_using_broker(
    instances: &[ServiceInstance],
    broker_name: &str,
    namespaced: bool,
) -> Vec<String> {
    let mut names: Vec<String> = instances
        .iter()
        .filter(|instance| instance.broker_ref() == Some((broker_name, namespaced)))
        .map(|instance| instance.metadata.name.clone())
        .collect();
    names.sort();
    names
}

/// Blocks deleting a ServiceBroker or ClusterServiceBroker that still provides instances
pub struct ServiceBrokerDeletionValidator {
    instances: Arc<dyn ServiceInstanceLister>,
}

impl ServiceBrokerDeletionValidator {
    pub fn new(instances: Arc<dyn ServiceInstanceLister>) -> ServiceBrokerDeletionValidator {
        ServiceBrokerDeletionValidator { instances }
    }
}

impl AdmissionCallback for ServiceBrokerDeletionValidator {
    fn validate(&self, request: &AdmissionRequest) -> Result<(), Error> {
        if request.operation != AdmissionOperation::Delete {
            return Ok(());
        }
        let broker: Value = request.decode()?;
        let name = str_value(&broker, "/metadata/name").unwrap_or(request.name.as_str());

        let cluster_scoped = request.kind.kind == v1alpha1::ClusterServiceBroker.kind;
        let (namespace, kind) = if cluster_scoped {
            (None, v1alpha1::ClusterServiceBroker.kind)
        } else {
            let ns = str_value(&broker, "/metadata/namespace").unwrap_or(request.namespace.as_str());
            (Some(ns), v1alpha1::ServiceBroker.kind)
        };

        let instances = self.instances.list_instances(namespace)?;
        let in_use = instances_using_broker(instances.as_slice(), name, !cluster_scoped);
        if in_use.is_empty() {
            return Ok(());
        }
        Err(Error::rejected(format!(
            "the {} \"{}\" can't be deleted while it provides the ServiceInstances {}",
            kind,
            name,
            format_list(in_use.as_slice())
        )))
    }
}

/// What each binding to the instance is bound to, sorted. App bindings use the App's name
/// and route bindings the route's URL.
fn bound_to(bindings: &[ServiceInstanceBinding], instance_name: &str) -> Vec<String> {
    let bound: BTreeSet<String> = bindings
        .iter()
        .filter(|b| b.spec.instance_ref.name == instance_name)
        .filter_map(|b| match (b.spec.app.as_ref(), b.spec.route.as_ref()) {
            (Some(app), _) => Some(app.name.clone()),
            (None, Some(route)) => Some(route.to_string()),
            (None, None) => None,
        })
        .collect();
    bound.into_iter().collect()
}

/// Blocks deleting a ServiceInstance that's still bound
pub struct ServiceInstanceDeletionValidator {
    bindings: Arc<dyn ServiceInstanceBindingLister>,
}

impl ServiceInstanceDeletionValidator {
    pub fn new(bindings: Arc<dyn ServiceInstanceBindingLister>) -> ServiceInstanceDeletionValidator {
        ServiceInstanceDeletionValidator { bindings }
    }
}

impl AdmissionCallback for ServiceInstanceDeletionValidator {
    fn validate(&self, request: &AdmissionRequest) -> Result<(), Error> {
        if request.operation != AdmissionOperation::Delete {
            return Ok(());
        }
        let instance: ServiceInstance = request.decode()?;
        let namespace = instance.metadata.namespace().unwrap_or(request.namespace.as_str());
        let bindings = self.bindings.list_bindings(namespace)?;
        let bound = bound_to(bindings.as_slice(), instance.metadata.name.as_str());
        if bound.is_empty() {
            return Ok(());
        }
        Err(Error::rejected(format!(
            "the ServiceInstance \"{}\" can't be deleted while it's bound to {}, unbind it first",
            instance.metadata.name,
            format_list(bound.as_slice())
        )))
    }
}

/// Not found becomes a rejection naming the missing object, anything else is passed through
fn require_exists<T>(result: Result<T, ListerError>, kind: &str, name: &str, namespace: &str) -> Result<(), Error> {
    match result {
        Ok(_) => Ok(()),
        Err(err) if err.is_not_found() => Err(Error::rejected(format!(
            "the {} \"{}\" doesn't exist in Space \"{}\"",
            kind, name, namespace
        ))),
        Err(err) => Err(err.into()),
    }
}

/// A binding must point at an App (if it's an App binding) and a ServiceInstance that exist.
/// Bindings that are being deleted aren't checked, so finalizers can clean them up after the
/// App or instance is gone.
pub struct ServiceInstanceBindingValidator {
    apps: Arc<dyn AppLister>,
    instances: Arc<dyn ServiceInstanceLister>,
}

impl ServiceInstanceBindingValidator {
    pub fn new(
        apps: Arc<dyn AppLister>,
        instances: Arc<dyn ServiceInstanceLister>,
    ) -> ServiceInstanceBindingValidator {
        ServiceInstanceBindingValidator { apps, instances }
    }
}

impl AdmissionCallback for ServiceInstanceBindingValidator {
    fn validate(&self, request: &AdmissionRequest) -> Result<(), Error> {
        if request.operation == AdmissionOperation::Delete {
            return Ok(());
        }
        let binding: ServiceInstanceBinding = request.decode()?;
        if binding.metadata.is_being_deleted() {
            return Ok(());
        }
        let namespace = binding.metadata.namespace().unwrap_or(request.namespace.as_str());

        if let Some(app_name) = binding.app_name() {
            require_exists(
                self.apps.get_app(namespace, app_name),
                v1alpha1::App.kind,
                app_name,
                namespace,
            )?;
        }
        let instance_name = binding.spec.instance_ref.name.as_str();
        require_exists(
            self.instances.get_instance(namespace, instance_name),
            v1alpha1::ServiceInstance.kind,
            instance_name,
            namespace,
        )
    }
}
