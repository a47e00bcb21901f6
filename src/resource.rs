//! Schema-free access to Kubernetes objects. Everything kf doesn't have a typed model for is
//! handled as a `serde_json::Value`, and every accessor here returns an `Option` rather than
//! assuming the shape of the data.
mod json_ext;

pub use self::json_ext::ResourceJson;

use crate::k8s_types::K8sType;

use serde_json::Value;

use std::fmt::{self, Display};

pub type JsonObject = serde_json::Map<String, Value>;

#[derive(Debug, PartialEq, Clone)]
pub struct InvalidResourceError {
    pub message: &'static str,
    pub value: Value,
}

impl InvalidResourceError {
    pub fn new(message: &'static str, value: Value) -> Self {
        InvalidResourceError { message, value }
    }
}

impl Display for InvalidResourceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Invalid Resource: {}", self.message)
    }
}

impl std::error::Error for InvalidResourceError {}

/// A Kubernetes object of any type. The only thing that's guaranteed is that it is a json
/// object with an `apiVersion`, `kind` and `metadata.name`.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct K8sResource(Value);

impl K8sResource {
    pub fn from_value(value: Value) -> Result<K8sResource, InvalidResourceError> {
        match K8sResource::validate(&value) {
            Ok(()) => Ok(K8sResource(value)),
            Err(message) => Err(InvalidResourceError { message, value }),
        }
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn as_value_mut(&mut self) -> &mut Value {
        &mut self.0
    }

    pub fn name(&self) -> &str {
        self.0.get_name().unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.0.get_namespace().filter(|ns| !ns.is_empty())
    }

    pub fn api_version(&self) -> &str {
        self.0.get_api_version().unwrap_or_default()
    }

    pub fn kind(&self) -> &str {
        self.0.get_kind().unwrap_or_default()
    }

    pub fn uid(&self) -> Option<&str> {
        self.str_value("/metadata/uid")
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.str_value("/metadata/resourceVersion")
    }

    pub fn generation(&self) -> Option<i64> {
        self.0.pointer("/metadata/generation").and_then(Value::as_i64)
    }

    pub fn get_label_value(&self, label: &str) -> Option<&str> {
        self.0.get_label(label)
    }

    pub fn status(&self) -> Option<&Value> {
        self.0.pointer("/status")
    }

    pub fn is_type(&self, k8s_type: &K8sType) -> bool {
        k8s_type.matches(self.api_version(), self.kind())
    }

    pub fn str_value(&self, pointer: &str) -> Option<&str> {
        str_value(&self.0, pointer)
    }

    fn validate(value: &Value) -> Result<(), &'static str> {
        if !value.is_object() {
            return Err("not a json object");
        }
        value.get_api_version().ok_or("missing apiVersion")?;
        value.get_kind().ok_or("missing kind")?;
        value.get_name().ok_or("missing metadata.name")?;
        Ok(())
    }
}

impl AsRef<Value> for K8sResource {
    fn as_ref(&self) -> &Value {
        &self.0
    }
}

impl From<K8sResource> for Value {
    fn from(resource: K8sResource) -> Value {
        resource.into_value()
    }
}

impl Display for K8sResource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

pub fn str_value<'a>(json: &'a Value, pointer: &str) -> Option<&'a str> {
    json.pointer(pointer).and_then(Value::as_str)
}

/// Returned when a nested field can't be set because something along the path isn't an object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPathError {
    pub path: String,
}

impl Display for FieldPathError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "value cannot be set because {} is not an object",
            self.path
        )
    }
}

impl std::error::Error for FieldPathError {}

/// Sets `value` at the given path, creating any intermediate objects that are missing. Fails
/// without modifying anything if an intermediate value exists but isn't an object.
pub fn set_nested_field(
    target: &mut Value,
    path: &[&str],
    value: Value,
) -> Result<(), FieldPathError> {
    let (last, parents) = match path.split_last() {
        Some(split) => split,
        None => {
            *target = value;
            return Ok(());
        }
    };

    // check the whole path first so a failure doesn't leave a half written object behind
    let mut current = &*target;
    let mut traversed = String::new();
    for (i, segment) in path.iter().enumerate() {
        match current {
            Value::Object(map) => {
                if i == path.len() - 1 {
                    break;
                }
                traversed.push('.');
                traversed.push_str(segment);
                match map.get(*segment) {
                    Some(next) => current = next,
                    None => break,
                }
            }
            _ => {
                let path = if traversed.is_empty() {
                    ".".to_owned()
                } else {
                    traversed
                };
                return Err(FieldPathError { path });
            }
        }
    }

    let mut current = target;
    for segment in parents {
        current = current
            .as_object_mut()
            .map(|map| {
                map.entry(segment.to_string())
                    .or_insert_with(|| Value::Object(JsonObject::new()))
            })
            .ok_or_else(|| FieldPathError {
                path: segment.to_string(),
            })?;
    }
    current
        .as_object_mut()
        .map(|map| {
            map.insert(last.to_string(), value);
        })
        .ok_or_else(|| FieldPathError {
            path: path.join("."),
        })
}

/// Builds an object of the given type from a list of `(dotted.path, value)` pairs.
pub fn unstructured(
    k8s_type: &K8sType,
    fields: Vec<(&str, Value)>,
) -> Result<Value, FieldPathError> {
    let mut obj = serde_json::json!({
        "apiVersion": k8s_type.api_version,
        "kind": k8s_type.kind,
    });
    for (path, value) in fields {
        let segments = path.split('.').collect::<Vec<_>>();
        set_nested_field(&mut obj, segments.as_slice(), value)?;
    }
    Ok(obj)
}
