use serde_json::Value;

use std::collections::BTreeMap;

pub static API_VERSION_POINTER: &str = "/apiVersion";
pub static KIND_POINTER: &str = "/kind";
pub static NAMESPACE_POINTER: &str = "/metadata/namespace";
pub static NAME_POINTER: &str = "/metadata/name";
pub static LABELS_POINTER: &str = "/metadata/labels";
pub static RESOURCE_VERSION_POINTER: &str = "/metadata/resourceVersion";

/// Accessors for the well known fields of any json encoded Kubernetes object. None of these
/// panic: a missing field and a field of the wrong type both come back as `None`.
pub trait ResourceJson {
    fn get_api_version(&self) -> Option<&str>;
    fn get_kind(&self) -> Option<&str>;
    fn get_namespace(&self) -> Option<&str>;
    fn get_name(&self) -> Option<&str>;
    fn get_resource_version(&self) -> Option<&str>;
    fn get_label(&self, key: &str) -> Option<&str>;

    /// Returns all string valued labels. Non-string values are skipped.
    fn get_labels(&self) -> BTreeMap<String, String>;

    /// Sets `metadata.resourceVersion`, creating `metadata` if needed. Does nothing if the
    /// value isn't an object.
    fn set_resource_version(&mut self, resource_version: &str);
}

fn str_value<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

impl ResourceJson for Value {
    fn get_api_version(&self) -> Option<&str> {
        str_value(self, API_VERSION_POINTER)
    }

    fn get_kind(&self) -> Option<&str> {
        str_value(self, KIND_POINTER)
    }

    fn get_namespace(&self) -> Option<&str> {
        str_value(self, NAMESPACE_POINTER)
    }

    fn get_name(&self) -> Option<&str> {
        str_value(self, NAME_POINTER)
    }

    fn get_resource_version(&self) -> Option<&str> {
        str_value(self, RESOURCE_VERSION_POINTER)
    }

    fn get_label(&self, key: &str) -> Option<&str> {
        self.pointer(LABELS_POINTER)?
            .as_object()?
            .get(key)
            .and_then(Value::as_str)
    }

    fn get_labels(&self) -> BTreeMap<String, String> {
        self.pointer(LABELS_POINTER)
            .and_then(Value::as_object)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_owned())))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn set_resource_version(&mut self, resource_version: &str) {
        if let Some(obj) = self.as_object_mut() {
            let meta = obj
                .entry("metadata")
                .or_insert_with(|| Value::Object(Default::default()));
            if let Some(meta) = meta.as_object_mut() {
                meta.insert(
                    "resourceVersion".to_owned(),
                    Value::String(resource_version.to_owned()),
                );
            }
        }
    }
}
