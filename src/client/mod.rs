//! A small, uniform client for a single kind of Kubernetes resource. Every backend implements
//! `ApiServer`, which executes one `Operation` at a time. `ResourceClient` builds the kf
//! specific behavior (friendly error messages, membership checks, mutators, upsert and polling)
//! on top of that.
pub mod compare;
#[cfg(any(test, feature = "testkit"))]
pub mod fake;
pub mod http;
mod predicate;
mod request;
mod typed;
mod wait;

pub use self::predicate::{
    all_predicates, diff_wrapper, filter, format_diff, label_equals_predicate,
    label_set_mutator, labels_contains_predicate, Merger, Mutator, MutatorList, Predicate,
};
pub use self::typed::{ResourceClient, Upserted};
pub use self::wait::{condition_deleted, wrap_predicate, ConditionFuncE};

use crate::k8s_types::K8sType;

use futures::future::BoxFuture;
use serde_json::Value;

use std::fmt::{self, Display};

/// A `Status` object returned by the api server for a failed request
#[derive(Deserialize, Serialize, Debug, Clone, Eq, PartialEq)]
pub struct ApiError {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub reason: String,
    pub code: u16,
}

impl ApiError {
    pub fn new(code: u16, reason: &str, message: impl Into<String>) -> ApiError {
        ApiError {
            status: "Failure".to_owned(),
            message: message.into(),
            reason: reason.to_owned(),
            code,
        }
    }

    pub fn not_found(k8s_type: &K8sType, name: &str) -> ApiError {
        ApiError::new(
            404,
            "NotFound",
            format!("{} \"{}\" not found", k8s_type.plural_kind, name),
        )
    }

    pub fn conflict(k8s_type: &K8sType, name: &str) -> ApiError {
        ApiError::new(
            409,
            "Conflict",
            format!(
                "Operation cannot be fulfilled on {} \"{}\": the object has been modified; please apply your changes to the latest version and try again",
                k8s_type.plural_kind, name
            ),
        )
    }

    pub fn already_exists(k8s_type: &K8sType, name: &str) -> ApiError {
        ApiError::new(
            409,
            "AlreadyExists",
            format!("{} \"{}\" already exists", k8s_type.plural_kind, name),
        )
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "api error: code: {}, reason: '{}'", self.code, self.reason)
        } else {
            f.write_str(self.message.as_str())
        }
    }
}

impl std::error::Error for ApiError {}

#[derive(Debug)]
pub enum Error {
    Io(hyper::Error),
    Serde(serde_json::Error),
    Api(ApiError),
    /// Another error with a message describing what was being attempted
    Context {
        message: String,
        source: Box<Error>,
    },
    Membership {
        kind: String,
        name: String,
    },
    Mutate(crate::error::Error),
    Timeout {
        kind: String,
    },
    Cancelled {
        kind: String,
    },
    /// The object reported a condition that it can't recover from
    Failed {
        kind: String,
        message: String,
    },
    /// The request couldn't be built, usually because of a malformed endpoint url
    InvalidRequest(String),
}

impl Error {
    pub fn context(message: impl Into<String>, source: Error) -> Error {
        Error::Context {
            message: message.into(),
            source: Box::new(source),
        }
    }

    /// The api error at the root of this error, if there is one
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Error::Api(e) => Some(e),
            Error::Context { source, .. } => source.api_error(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.api_error().map(|e| e.code == 404).unwrap_or(false)
    }

    pub fn is_conflict(&self) -> bool {
        self.api_error()
            .map(|e| e.code == 409 && e.reason != "AlreadyExists")
            .unwrap_or(false)
    }

    pub fn is_already_exists(&self) -> bool {
        self.api_error()
            .map(|e| e.code == 409 && e.reason == "AlreadyExists")
            .unwrap_or(false)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "Io Error: {}", e),
            Error::Serde(e) => write!(f, "(De)Serialization error: {}", e),
            Error::Api(e) => Display::fmt(e, f),
            Error::Context { message, source } => write!(f, "{}: {}", message, source),
            Error::Membership { kind, name } => write!(
                f,
                "an object with the name {} exists, but it doesn't appear to be a {}",
                name, kind
            ),
            Error::Mutate(e) => Display::fmt(e, f),
            Error::Timeout { kind } => write!(f, "waiting for {} timed out", kind),
            Error::Cancelled { kind } => write!(f, "waiting for {} was cancelled", kind),
            Error::Failed { kind, message } => {
                write!(f, "checking {} Ready condition failed: {}", kind, message)
            }
            Error::InvalidRequest(msg) => write!(f, "invalid request: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Serde(e) => Some(e),
            Error::Api(e) => Some(e),
            Error::Context { source, .. } => Some(source.as_ref()),
            Error::Mutate(e) => Some(e.as_std_error()),
            _ => None,
        }
    }
}

impl From<hyper::Error> for Error {
    fn from(e: hyper::Error) -> Error {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Error {
        Error::Serde(e)
    }
}

impl From<ApiError> for Error {
    fn from(e: ApiError) -> Error {
        Error::Api(e)
    }
}

/// Server side list parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
    pub field_selector: Option<String>,
    pub label_selector: Option<String>,
}

/// Options for `ResourceClient::list`. The selectors are sent to the server, which may ignore
/// them for some kinds. The filters always run on the client afterwards.
pub struct ListOptions<T> {
    pub field_selector: Option<String>,
    pub label_selector: Option<String>,
    pub filters: Vec<Predicate<T>>,
}

impl<T> Default for ListOptions<T> {
    fn default() -> ListOptions<T> {
        ListOptions {
            field_selector: None,
            label_selector: None,
            filters: Vec::new(),
        }
    }
}

impl<T> ListOptions<T> {
    pub fn with_field_selector(mut self, selector: impl Into<String>) -> ListOptions<T> {
        self.field_selector = Some(selector.into());
        self
    }

    pub fn with_label_selector(mut self, selector: impl Into<String>) -> ListOptions<T> {
        self.label_selector = Some(selector.into());
        self
    }

    pub fn with_filter(mut self, predicate: Predicate<T>) -> ListOptions<T> {
        self.filters.push(predicate);
        self
    }

    pub(crate) fn params(&self) -> ListParams {
        ListParams {
            field_selector: self.field_selector.clone(),
            label_selector: self.label_selector.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// sends `propagationPolicy: Foreground`
    pub foreground_deletion: bool,
    /// sends `gracePeriodSeconds: 0`
    pub delete_immediately: bool,
}

impl DeleteOptions {
    pub fn foreground() -> DeleteOptions {
        DeleteOptions {
            foreground_deletion: true,
            delete_immediately: false,
        }
    }

    pub fn immediately(mut self) -> DeleteOptions {
        self.delete_immediately = true;
        self
    }

    pub(crate) fn to_body(&self) -> Option<Value> {
        if !self.foreground_deletion && !self.delete_immediately {
            return None;
        }
        let mut body = serde_json::json!({
            "apiVersion": "v1",
            "kind": "DeleteOptions",
        });
        if self.foreground_deletion {
            body["propagationPolicy"] = Value::from("Foreground");
        }
        if self.delete_immediately {
            body["gracePeriodSeconds"] = Value::from(0);
        }
        Some(body)
    }
}

/// A single request to the api server
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Get {
        k8s_type: &'static K8sType,
        namespace: Option<String>,
        name: String,
    },
    List {
        k8s_type: &'static K8sType,
        namespace: Option<String>,
        params: ListParams,
    },
    Create {
        k8s_type: &'static K8sType,
        namespace: Option<String>,
        object: Value,
    },
    Update {
        k8s_type: &'static K8sType,
        namespace: Option<String>,
        name: String,
        object: Value,
    },
    Delete {
        k8s_type: &'static K8sType,
        namespace: Option<String>,
        name: String,
        options: DeleteOptions,
    },
}

impl Operation {
    pub fn k8s_type(&self) -> &'static K8sType {
        match self {
            Operation::Get { k8s_type, .. }
            | Operation::List { k8s_type, .. }
            | Operation::Create { k8s_type, .. }
            | Operation::Update { k8s_type, .. }
            | Operation::Delete { k8s_type, .. } => k8s_type,
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        match self {
            Operation::Get { namespace, .. }
            | Operation::List { namespace, .. }
            | Operation::Create { namespace, .. }
            | Operation::Update { namespace, .. }
            | Operation::Delete { namespace, .. } => namespace.as_deref(),
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Operation::Get { .. } => "get",
            Operation::List { .. } => "list",
            Operation::Create { .. } => "create",
            Operation::Update { .. } => "update",
            Operation::Delete { .. } => "delete",
        }
    }
}

/// Executes operations against some store of Kubernetes objects. List operations return an
/// object with an `items` array.
pub trait ApiServer: Send + Sync {
    fn execute(&self, op: Operation) -> BoxFuture<'_, Result<Value, Error>>;
}

#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct ObjectList<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::k8s_types::kf_dev::v1alpha1::Build;

    #[test]
    fn error_predicates_look_through_context() {
        let err = Error::context(
            "couldn't get the Build with the name \"b\"",
            ApiError::not_found(Build, "b").into(),
        );
        assert!(err.is_not_found());
        assert!(!err.is_conflict());
        assert_eq!(
            "couldn't get the Build with the name \"b\": builds \"b\" not found",
            err.to_string()
        );

        let exists: Error = ApiError::already_exists(Build, "b").into();
        assert!(exists.is_already_exists());
        assert!(!exists.is_conflict());

        let conflict: Error = ApiError::conflict(Build, "b").into();
        assert!(conflict.is_conflict());
        assert!(!conflict.is_already_exists());
    }

    #[test]
    fn wait_errors_name_the_kind() {
        let timeout = Error::Timeout {
            kind: "Build".to_owned(),
        };
        assert_eq!("waiting for Build timed out", timeout.to_string());
        let cancelled = Error::Cancelled {
            kind: "Build".to_owned(),
        };
        assert_eq!("waiting for Build was cancelled", cancelled.to_string());
        assert!(cancelled.is_cancelled() && !cancelled.is_timeout());
    }

    #[test]
    fn delete_options_body() {
        assert_eq!(None, DeleteOptions::default().to_body());
        let body = DeleteOptions::foreground().immediately().to_body().unwrap();
        assert_eq!(Some("Foreground"), body["propagationPolicy"].as_str());
        assert_eq!(Some(0), body["gracePeriodSeconds"].as_i64());
    }
}
