//! Derives the Kubernetes objects kf manages from the App and Space that own them. Every
//! function here is pure: the same inputs always produce the same objects, so they can be
//! called on every reconcile and compared against what's in the cluster.
//!
//! Derived objects are plain `serde_json::Value`s in the shape of the native Kubernetes type.
mod autoscaler;
mod build;
mod deployment;
mod env;
mod routes;
mod service;
mod space;
mod volumes;

pub use self::autoscaler::*;
pub use self::build::*;
pub use self::deployment::*;
pub use self::env::*;
pub use self::routes::*;
pub use self::service::*;
pub use self::space::*;
pub use self::volumes::*;

use crate::apis::{ExactScaleRequired, InvalidIdError, OwnerReference, Resource};
use crate::resource::FieldPathError;

use serde_json::{json, Value};

use std::fmt::{self, Display};

/// `ownerReferences` naming `owner` as the controller, so the child is garbage collected
/// along with it
pub(crate) fn owned_by<T: Resource>(owner: &T) -> Value {
    json!([OwnerReference::new_controller_ref(T::k8s_type(), owner.meta())])
}

/// Why an object couldn't be derived. Most of these mean some upstream state isn't there
/// yet, and deriving again later is expected to succeed.
#[derive(Debug)]
pub enum Error {
    WaitingForImage,
    Scale(ExactScaleRequired),
    TooManyAutoscalingRules,
    InvalidAutoscalingRule,
    InvalidId {
        field: &'static str,
        mount_path: String,
        source: InvalidIdError,
    },
    FieldPath(FieldPathError),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::WaitingForImage => f.write_str("waiting for build image in latestReadyBuild"),
            Error::Scale(e) => Display::fmt(e, f),
            Error::TooManyAutoscalingRules => f.write_str("too many autoscaling rules"),
            Error::InvalidAutoscalingRule => f.write_str("invalid autoscaling rule"),
            Error::InvalidId {
                field,
                mount_path,
                source,
            } => write!(
                f,
                "invalid {} for volume mounted at {}: {}",
                field, mount_path, source
            ),
            Error::FieldPath(e) => Display::fmt(e, f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Scale(e) => Some(e),
            Error::InvalidId { source, .. } => Some(source),
            Error::FieldPath(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ExactScaleRequired> for Error {
    fn from(e: ExactScaleRequired) -> Error {
        Error::Scale(e)
    }
}

impl From<FieldPathError> for Error {
    fn from(e: FieldPathError) -> Error {
        Error::FieldPath(e)
    }
}
