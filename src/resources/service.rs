use super::{
    injected_env_secret_name, make_app_labels, owned_by, pod_labels, USER_PORT_NAME,
    DATABASE_URL_ENV_VAR, VCAP_SERVICES_ENV_VAR,
};
use crate::apis::{App, DEFAULT_ROUTE_DESTINATION_PORT};
use crate::k8s_types::core::v1::{Secret, Service, ServiceAccount};

use serde_json::{json, Map, Value};

use std::collections::BTreeMap;

pub const SERVICE_COMPONENT: &str = "service";
pub const SERVICE_ACCOUNT_COMPONENT: &str = "serviceaccount";
pub const INJECTED_ENV_COMPONENT: &str = "injected-envs";

/// Image pull secrets copied from the build ServiceAccount start with this
pub const KF_REGISTRY_SECRET_PREFIX: &str = "kf-registry-";

pub fn service_name(app: &App) -> String {
    app.metadata.name.clone()
}

pub fn service_account_name(app: &App) -> String {
    format!("sa-{}", app.metadata.name)
}

/// The cluster local Service that routes send traffic to
pub fn make_service(app: &App) -> Value {
    json!({
        "apiVersion": Service.api_version,
        "kind": Service.kind,
        "metadata": {
            "name": service_name(app),
            "namespace": app.metadata.namespace(),
            "labels": make_app_labels(app, SERVICE_COMPONENT),
            "ownerReferences": owned_by(app),
        },
        "spec": {
            "selector": pod_labels(app),
            "ports": [{
                "name": USER_PORT_NAME,
                "protocol": "TCP",
                "port": DEFAULT_ROUTE_DESTINATION_PORT,
                "targetPort": app.user_port(),
            }],
        },
    })
}

/// Names of the secrets kf copied into the Space for pulling images, sorted
pub fn filter_and_sort_kf_secrets<'a, I>(secret_names: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut names = secret_names
        .into_iter()
        .filter(|name| name.starts_with(KF_REGISTRY_SECRET_PREFIX))
        .map(str::to_owned)
        .collect::<Vec<_>>();
    names.sort();
    names.dedup();
    names
}

/// The ServiceAccount the App's pods run as. It can pull from the same registries as the
/// Space's build ServiceAccount.
pub fn make_service_account(app: &App, image_pull_secrets: &[String]) -> Value {
    let refs = image_pull_secrets
        .iter()
        .map(|name| json!({ "name": name }))
        .collect::<Vec<_>>();
    json!({
        "apiVersion": ServiceAccount.api_version,
        "kind": ServiceAccount.kind,
        "metadata": {
            "name": service_account_name(app),
            "namespace": app.metadata.namespace(),
            "labels": make_app_labels(app, SERVICE_ACCOUNT_COMPONENT),
            "ownerReferences": owned_by(app),
        },
        "secrets": refs,
        "imagePullSecrets": refs,
    })
}

/// A service instance bound to the App, as it appears in `VCAP_SERVICES`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BoundService {
    pub binding_name: String,
    pub instance_name: String,
    pub name: String,
    pub label: String,
    pub plan: String,
    pub tags: Vec<String>,
    pub credentials: Map<String, Value>,
}

/// `VCAP_SERVICES` groups bindings by the label of their service class. Bindings within a
/// group keep the order they were given in.
pub fn vcap_services(services: &[BoundService]) -> Value {
    let mut grouped: BTreeMap<&str, Vec<&BoundService>> = BTreeMap::new();
    for service in services {
        grouped
            .entry(service.label.as_str())
            .or_default()
            .push(service);
    }
    json!(grouped)
}

/// The first `uri` credential of any binding, which apps built for Heroku style platforms
/// expect in `DATABASE_URL`
pub fn database_url(services: &[BoundService]) -> Option<&str> {
    services
        .iter()
        .filter_map(|s| s.credentials.get("uri"))
        .filter_map(Value::as_str)
        .next()
}

/// The Secret the App's `VCAP_SERVICES` and `DATABASE_URL` variables are read from
pub fn make_injected_env_secret(app: &App, services: &[BoundService]) -> Value {
    let mut data = Map::new();
    data.insert(
        VCAP_SERVICES_ENV_VAR.to_owned(),
        Value::from(base64::encode(vcap_services(services).to_string())),
    );
    if let Some(url) = database_url(services) {
        data.insert(
            DATABASE_URL_ENV_VAR.to_owned(),
            Value::from(base64::encode(url)),
        );
    }

    json!({
        "apiVersion": Secret.api_version,
        "kind": Secret.kind,
        "metadata": {
            "name": injected_env_secret_name(app),
            "namespace": app.metadata.namespace(),
            "labels": make_app_labels(app, INJECTED_ENV_COMPONENT),
            "ownerReferences": owned_by(app),
        },
        "type": "Opaque",
        "data": data,
    })
}
