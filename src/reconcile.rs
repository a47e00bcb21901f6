//! Glue between derivation and the api server: writes derived children and summarizes their
//! readiness for the parent's status.
use crate::apis::{Condition, DynamicObject, Resource};
use crate::client::compare::compare_values;
use crate::client::{self, ApiServer, ResourceClient, Upserted};
use crate::conditions::{
    check_conditions, find_condition, generation_is_stale, nested_field, ConditionStatus,
};
use crate::k8s_types::{self, K8sType};
use crate::resource::{InvalidResourceError, K8sResource};

use serde_json::Value;

use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::Instant;

/// Every type the derivation functions produce
fn child_types() -> [&'static K8sType; 12] {
    [
        k8s_types::core::v1::Namespace,
        k8s_types::core::v1::Secret,
        k8s_types::core::v1::Service,
        k8s_types::core::v1::ServiceAccount,
        k8s_types::apps::v1::Deployment,
        k8s_types::autoscaling::v1::HorizontalPodAutoscaler,
        k8s_types::networking_k8s_io::v1::NetworkPolicy,
        k8s_types::rbac_authorization_k8s_io::v1::Role,
        k8s_types::rbac_authorization_k8s_io::v1::ClusterRoleBinding,
        k8s_types::kf_dev::v1alpha1::Build,
        k8s_types::kf_dev::v1alpha1::Route,
        k8s_types::iam_cnrm_cloud_google_com::v1beta1::IAMPolicy,
    ]
}

pub fn child_type(api_version: &str, kind: &str) -> Option<&'static K8sType> {
    child_types()
        .iter()
        .copied()
        .find(|t| t.matches(api_version, kind))
}

/// Serializes a typed child for `sync_children`, adding its apiVersion and kind and
/// leaving out the status, which belongs to the child's own controller
pub fn typed_child<T: Resource>(obj: &T) -> Result<Value, serde_json::Error> {
    let mut value = serde_json::to_value(obj)?;
    if let Some(fields) = value.as_object_mut() {
        fields.insert("apiVersion".to_owned(), Value::from(T::k8s_type().api_version));
        fields.insert("kind".to_owned(), Value::from(T::k8s_type().kind));
        fields.remove("status");
    }
    Ok(value)
}

#[derive(Debug)]
pub enum Error {
    InvalidChild(InvalidResourceError),
    UnknownChildType { api_version: String, kind: String },
    Client(client::Error),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidChild(e) => Display::fmt(e, f),
            Error::UnknownChildType { api_version, kind } => write!(
                f,
                "no child configuration for apiVersion: {}, kind: {}",
                api_version, kind
            ),
            Error::Client(e) => Display::fmt(e, f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::InvalidChild(e) => Some(e),
            Error::Client(e) => Some(e),
            Error::UnknownChildType { .. } => None,
        }
    }
}

impl From<InvalidResourceError> for Error {
    fn from(e: InvalidResourceError) -> Error {
        Error::InvalidChild(e)
    }
}

impl From<client::Error> for Error {
    fn from(e: client::Error) -> Error {
        Error::Client(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Error {
        Error::Client(e.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildAction {
    Created,
    Updated,
    Unchanged,
    /// The existing child is being deleted, so it's left alone until it's gone
    SkippedTerminating,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncedChild {
    pub k8s_type: &'static K8sType,
    pub namespace: Option<String>,
    pub name: String,
    pub action: ChildAction,
}

/// The desired child with the existing object's resourceVersion, so the update is checked
/// against what was read. None when the existing child needs no write, either because it's
/// being deleted or because it already has everything the desired one has.
fn merge_child(
    k8s_type: &K8sType,
    mut desired: DynamicObject,
    existing: &DynamicObject,
) -> Option<DynamicObject> {
    if existing.metadata.is_being_deleted() {
        log::debug!(
            "Will skip updating {} '{}' because it is currently being deleted",
            k8s_type,
            existing.metadata.name
        );
        return None;
    }
    match (existing.to_value(), desired.to_value()) {
        (Ok(existing_value), Ok(desired_value)) => {
            let diffs = compare_values(&existing_value, &desired_value);
            if diffs.is_empty() {
                log::debug!("No difference in {} '{}'", k8s_type, existing.metadata.name);
                return None;
            }
            log::info!(
                "Found {} diffs in {} '{}', diffs: {}",
                diffs.len(),
                k8s_type,
                existing.metadata.name,
                diffs
            );
        }
        (Err(err), _) | (_, Err(err)) => {
            log::warn!(
                "Couldn't compare {} '{}', updating it anyway: {}",
                k8s_type,
                existing.metadata.name,
                err
            );
        }
    }
    desired.metadata.resource_version = existing.metadata.resource_version.clone();
    Some(desired)
}

/// Upserts each desired child, in order, and stops at the first failure.
///
/// Children that already have everything the desired object has are left alone, so
/// fields filled in by the api server or other controllers don't cause a write.
pub async fn sync_children(
    api: Arc<dyn ApiServer>,
    desired: Vec<Value>,
) -> Result<Vec<SyncedChild>, Error> {
    let mut synced = Vec::with_capacity(desired.len());
    for child in desired {
        synced.push(sync_child(&api, child).await?);
    }
    Ok(synced)
}

async fn sync_child(api: &Arc<dyn ApiServer>, desired: Value) -> Result<SyncedChild, Error> {
    let desired = K8sResource::from_value(desired)?;
    let k8s_type = child_type(desired.api_version(), desired.kind()).ok_or_else(|| {
        Error::UnknownChildType {
            api_version: desired.api_version().to_owned(),
            kind: desired.kind().to_owned(),
        }
    })?;
    let namespace = desired.namespace().map(str::to_owned);
    let name = desired.name().to_owned();
    let ns = namespace.as_deref().unwrap_or("");
    let desired = DynamicObject::from_value(desired.into_value())?;

    let start_time = Instant::now();
    let client = ResourceClient::for_type(api.clone(), k8s_type);
    let outcome = client
        .upsert_with(ns, &desired, |desired, existing| {
            merge_child(k8s_type, desired, existing)
        })
        .await?;
    let action = match outcome {
        Upserted::Created(_) => ChildAction::Created,
        Upserted::Updated(_) => ChildAction::Updated,
        Upserted::Unchanged(existing) if existing.metadata.is_being_deleted() => {
            ChildAction::SkippedTerminating
        }
        Upserted::Unchanged(_) => ChildAction::Unchanged,
    };
    log::debug!(
        "Finished syncing {} '{}' in {}ms: {:?}",
        k8s_type,
        name,
        start_time.elapsed().as_millis(),
        action
    );
    Ok(SyncedChild {
        k8s_type,
        namespace,
        name,
        action,
    })
}

/// Summarizes the readiness of a child as a condition of type `destination` on the parent.
///
/// The status comes from the child's aggregated conditions. When the child isn't ready, the
/// reason and message are copied from its Ready condition, or from the first condition that
/// isn't True if it has no Ready condition. A missing child is Unknown.
pub fn propagate_child_condition(destination: &str, child: Option<&Value>) -> Condition {
    let child = match child {
        Some(child) => child,
        None => {
            return Condition {
                condition_type: destination.to_owned(),
                status: ConditionStatus::Unknown.to_string(),
                reason: "Unknown".to_owned(),
                message: "the child doesn't exist yet".to_owned(),
                last_transition_time: None,
            };
        }
    };

    let status = check_conditions(child);
    let (reason, message) = if status.is_true() {
        (String::new(), String::new())
    } else {
        explain(child, status)
    };
    Condition {
        condition_type: destination.to_owned(),
        status: status.to_string(),
        reason,
        message,
        last_transition_time: None,
    }
}

fn explain(child: &Value, status: ConditionStatus) -> (String, String) {
    let from_condition = find_condition(child, "Ready").or_else(|| {
        child
            .pointer("/status/conditions")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|c| c.get("type").and_then(Value::as_str))
            .filter_map(|t| find_condition(child, t))
            .find(|(s, _, _)| *s != ConditionStatus::True.as_str())
    });
    match from_condition {
        Some((_, reason, message)) if reason.is_some() || message.is_some() => (
            reason.unwrap_or("").to_owned(),
            message.unwrap_or("").to_owned(),
        ),
        _ => fallback_explanation(child, status),
    }
}

fn fallback_explanation(child: &Value, status: ConditionStatus) -> (String, String) {
    let message = match nested_field(child, &["status", "conditions"]) {
        Ok(None) => return ("Unknown".to_owned(), "the child has no status yet".to_owned()),
        _ if generation_is_stale(child) => "the child hasn't reconciled the latest generation",
        _ if status.is_false() => "the child's status is malformed or has a condition that isn't True",
        _ => "the child has conditions that aren't True yet",
    };
    (status.to_string(), message.to_owned())
}
