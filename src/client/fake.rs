//! An in-memory `ApiServer` for tests. It keeps objects in a map, assigns uids and resource
//! versions, and enforces optimistic concurrency the way the real api server does. Reactors can
//! be prepended to fail or short circuit specific operations.
use super::{ApiError, ApiServer, Error, ListParams, Operation};
use crate::k8s_types::K8sType;
use crate::resource::{str_value, JsonObject, ResourceJson};

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use serde_json::Value;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Returns `Some` to handle the operation instead of the fake, or `None` to let it through
pub type Reactor = Arc<dyn Fn(&Operation) -> Option<Result<Value, Error>> + Send + Sync>;

/// apiVersion/kind, namespace, name
type Key = (String, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, Value>,
    operations: Vec<Operation>,
    reactors: Vec<Reactor>,
    counter: u64,
    ignore_field_selectors: bool,
}

#[derive(Default)]
pub struct FakeApiServer {
    state: Mutex<State>,
}

fn type_key(k8s_type: &K8sType) -> String {
    format!("{}/{}", k8s_type.api_version, k8s_type.kind)
}

fn key(k8s_type: &K8sType, namespace: Option<&str>, name: &str) -> Key {
    (
        type_key(k8s_type),
        namespace.unwrap_or("").to_owned(),
        name.to_owned(),
    )
}

fn invalid(message: String) -> Error {
    ApiError::new(422, "Invalid", message).into()
}

fn metadata_mut(obj: &mut Value) -> Option<&mut JsonObject> {
    let fields = obj.as_object_mut()?;
    fields
        .entry("metadata")
        .or_insert_with(|| Value::Object(JsonObject::new()))
        .as_object_mut()
}

/// Selectors in the form `a=b,c` where a bare key only has to exist. `!=` is supported too.
fn labels_match(selector: &str, obj: &Value) -> bool {
    let labels = obj.get_labels();
    selector
        .split(',')
        .map(str::trim)
        .filter(|req| !req.is_empty())
        .all(|req| {
            if let Some(idx) = req.find("!=") {
                let (k, v) = (&req[..idx], &req[idx + 2..]);
                labels.get(k.trim()).map(String::as_str) != Some(v.trim())
            } else if let Some(idx) = req.find('=') {
                let (k, v) = (&req[..idx], req[idx + 1..].trim_start_matches('='));
                labels.get(k.trim()).map(String::as_str) == Some(v.trim())
            } else {
                labels.contains_key(req)
            }
        })
}

fn fields_match(selector: &str, obj: &Value) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|req| !req.is_empty())
        .all(|req| match req.find('=') {
            Some(idx) => {
                let (field, expected) = (&req[..idx], req[idx + 1..].trim_start_matches('='));
                let pointer = format!("/{}", field.trim().replace('.', "/"));
                str_value(obj, pointer.as_str()).unwrap_or("") == expected.trim()
            }
            None => false,
        })
}

impl FakeApiServer {
    pub fn new() -> FakeApiServer {
        FakeApiServer::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reactors run in reverse order of being added, and the first one to return `Some` wins
    pub fn prepend_reactor<F>(&self, reactor: F)
    where
        F: Fn(&Operation) -> Option<Result<Value, Error>> + Send + Sync + 'static,
    {
        self.lock().reactors.insert(0, Arc::new(reactor));
    }

    /// Makes list operations ignore field selectors, like some kinds do on a real cluster
    pub fn ignore_field_selectors(&self, ignore: bool) {
        self.lock().ignore_field_selectors = ignore;
    }

    /// Every operation executed so far, including ones handled by reactors
    pub fn operations(&self) -> Vec<Operation> {
        self.lock().operations.clone()
    }

    pub fn clear_operations(&self) {
        self.lock().operations.clear();
    }

    /// Stores the object as is apart from the server assigned metadata, bypassing reactors and
    /// conflict checks. Returns what was stored.
    pub fn add_object(&self, k8s_type: &K8sType, mut obj: Value) -> Value {
        let mut state = self.lock();
        state.fill_server_fields(k8s_type, &mut obj, None);
        let name = obj.get_name().unwrap_or("").to_owned();
        let k = key(k8s_type, obj.get_namespace(), name.as_str());
        state.objects.insert(k, obj.clone());
        obj
    }

    pub fn get_object(&self, k8s_type: &K8sType, namespace: Option<&str>, name: &str) -> Option<Value> {
        self.lock()
            .objects
            .get(&key(k8s_type, namespace, name))
            .cloned()
    }

    /// All stored objects of the given type, ordered by namespace then name
    pub fn objects(&self, k8s_type: &K8sType) -> Vec<Value> {
        let type_key = type_key(k8s_type);
        self.lock()
            .objects
            .iter()
            .filter(|(k, _)| k.0 == type_key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn handle(&self, op: Operation) -> Result<Value, Error> {
        let reactors = {
            let mut state = self.lock();
            state.operations.push(op.clone());
            state.reactors.clone()
        };
        for reactor in reactors.iter() {
            if let Some(result) = reactor(&op) {
                log::debug!("Reactor handled {} of {}", op.verb(), op.k8s_type());
                return result;
            }
        }
        self.lock().apply(op)
    }
}

impl State {
    fn next_counter(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    /// Sets apiVersion and kind when missing, and assigns a new resourceVersion. The uid,
    /// generation and creation time are carried over from `existing` or generated.
    fn fill_server_fields(&mut self, k8s_type: &K8sType, obj: &mut Value, existing: Option<&Value>) {
        let counter = self.next_counter();
        if let Some(fields) = obj.as_object_mut() {
            fields
                .entry("apiVersion")
                .or_insert_with(|| Value::from(k8s_type.api_version));
            fields
                .entry("kind")
                .or_insert_with(|| Value::from(k8s_type.kind));
        }

        let spec_changed = existing.map(|old| old.get("spec") != obj.get("spec"));
        let meta = match metadata_mut(obj) {
            Some(meta) => meta,
            None => return,
        };
        let generation = match existing {
            Some(old) => {
                let old_generation = old.pointer("/metadata/generation").and_then(Value::as_i64).unwrap_or(1);
                if spec_changed == Some(true) {
                    old_generation + 1
                } else {
                    old_generation
                }
            }
            None => meta.get("generation").and_then(Value::as_i64).unwrap_or(1),
        };
        meta.insert("generation".to_owned(), Value::from(generation));
        meta.insert("resourceVersion".to_owned(), Value::from(counter.to_string()));

        let inherited = |pointer: &str| existing.and_then(|old| old.pointer(pointer)).cloned();
        let uid = inherited("/metadata/uid")
            .or_else(|| meta.get("uid").cloned())
            .unwrap_or_else(|| Value::from(format!("00000000-0000-0000-0000-{:012}", counter)));
        meta.insert("uid".to_owned(), uid);
        let created = inherited("/metadata/creationTimestamp")
            .or_else(|| meta.get("creationTimestamp").cloned())
            .unwrap_or_else(|| Value::from("2020-01-01T00:00:00Z"));
        meta.insert("creationTimestamp".to_owned(), created);
    }

    fn apply(&mut self, op: Operation) -> Result<Value, Error> {
        match op {
            Operation::Get {
                k8s_type,
                namespace,
                name,
            } => self
                .objects
                .get(&key(k8s_type, namespace.as_deref(), name.as_str()))
                .cloned()
                .ok_or_else(|| ApiError::not_found(k8s_type, name.as_str()).into()),
            Operation::List {
                k8s_type,
                namespace,
                params,
            } => Ok(self.list(k8s_type, namespace.as_deref(), &params)),
            Operation::Create {
                k8s_type,
                namespace,
                object,
            } => self.create(k8s_type, namespace, object),
            Operation::Update {
                k8s_type,
                namespace,
                name,
                object,
            } => self.update(k8s_type, namespace, name, object),
            Operation::Delete {
                k8s_type,
                namespace,
                name,
                ..
            } => self
                .objects
                .remove(&key(k8s_type, namespace.as_deref(), name.as_str()))
                .ok_or_else(|| ApiError::not_found(k8s_type, name.as_str()).into()),
        }
    }

    fn list(&self, k8s_type: &K8sType, namespace: Option<&str>, params: &ListParams) -> Value {
        let type_key = type_key(k8s_type);
        let items: Vec<Value> = self
            .objects
            .iter()
            .filter(|((t, ns, _), _)| {
                *t == type_key && namespace.map(|n| n == ns.as_str()).unwrap_or(true)
            })
            .map(|(_, obj)| obj)
            .filter(|obj| {
                params
                    .label_selector
                    .as_deref()
                    .map(|s| labels_match(s, obj))
                    .unwrap_or(true)
            })
            .filter(|obj| {
                self.ignore_field_selectors
                    || params
                        .field_selector
                        .as_deref()
                        .map(|s| fields_match(s, obj))
                        .unwrap_or(true)
            })
            .cloned()
            .collect();

        serde_json::json!({
            "apiVersion": k8s_type.api_version,
            "kind": format!("{}List", k8s_type.kind),
            "metadata": {"resourceVersion": self.counter.to_string()},
            "items": items,
        })
    }

    fn create(
        &mut self,
        k8s_type: &K8sType,
        namespace: Option<String>,
        mut object: Value,
    ) -> Result<Value, Error> {
        let mut name = object.get_name().unwrap_or("").to_owned();
        if name.is_empty() {
            let prefix = str_value(&object, "/metadata/generateName").unwrap_or("").to_owned();
            if prefix.is_empty() {
                return Err(invalid(format!(
                    "{} is invalid: metadata.name: Required value: name or generateName is required",
                    k8s_type.kind
                )));
            }
            name = format!("{}{:05}", prefix, self.counter + 1);
        }

        let k = key(k8s_type, namespace.as_deref(), name.as_str());
        if self.objects.contains_key(&k) {
            return Err(ApiError::already_exists(k8s_type, name.as_str()).into());
        }

        if let Some(meta) = metadata_mut(&mut object) {
            meta.insert("name".to_owned(), Value::from(name.as_str()));
            if let Some(ns) = namespace.as_ref() {
                meta.insert("namespace".to_owned(), Value::from(ns.as_str()));
            }
            meta.remove("resourceVersion");
        }
        self.fill_server_fields(k8s_type, &mut object, None);
        self.objects.insert(k, object.clone());
        Ok(object)
    }

    /// An update without a resourceVersion always wins, like it does for most built in kinds
    fn update(
        &mut self,
        k8s_type: &K8sType,
        namespace: Option<String>,
        name: String,
        mut object: Value,
    ) -> Result<Value, Error> {
        if object.get_name() != Some(name.as_str()) {
            return Err(ApiError::new(
                400,
                "BadRequest",
                format!(
                    "the name of the object ({}) does not match the name on the URL ({})",
                    object.get_name().unwrap_or(""),
                    name
                ),
            )
            .into());
        }

        let k = key(k8s_type, namespace.as_deref(), name.as_str());
        let existing = match self.objects.get(&k) {
            Some(existing) => existing.clone(),
            None => return Err(ApiError::not_found(k8s_type, name.as_str()).into()),
        };
        if let Some(version) = object.get_resource_version() {
            if !version.is_empty() && Some(version) != existing.get_resource_version() {
                return Err(ApiError::conflict(k8s_type, name.as_str()).into());
            }
        }

        if let (Some(ns), Some(meta)) = (namespace.as_ref(), metadata_mut(&mut object)) {
            meta.insert("namespace".to_owned(), Value::from(ns.as_str()));
        }
        self.fill_server_fields(k8s_type, &mut object, Some(&existing));
        self.objects.insert(k, object.clone());
        Ok(object)
    }
}

impl ApiServer for FakeApiServer {
    fn execute(&self, op: Operation) -> BoxFuture<'_, Result<Value, Error>> {
        future::ready(self.handle(op)).boxed()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::k8s_types::core::v1::Secret;
    use crate::k8s_types::kf_dev::v1alpha1::App;

    use serde_json::json;

    fn create(fake: &FakeApiServer, ns: &str, obj: Value) -> Result<Value, Error> {
        fake.handle(Operation::Create {
            k8s_type: App,
            namespace: Some(ns.to_owned()),
            object: obj,
        })
    }

    fn list(fake: &FakeApiServer, params: ListParams) -> Vec<Value> {
        let result = fake
            .handle(Operation::List {
                k8s_type: App,
                namespace: Some("dev".to_owned()),
                params,
            })
            .unwrap();
        result["items"].as_array().unwrap().clone()
    }

    #[test]
    fn create_assigns_server_fields() {
        let fake = FakeApiServer::new();
        let created = create(&fake, "dev", json!({"metadata": {"name": "a"}, "spec": {}})).unwrap();
        assert_eq!(Some("kf.dev/v1alpha1"), created.get_api_version());
        assert_eq!(Some("App"), created.get_kind());
        assert_eq!(Some("dev"), created.get_namespace());
        assert_eq!(Some("1"), created.get_resource_version());
        assert_eq!(Some(1), created.pointer("/metadata/generation").and_then(Value::as_i64));

        let err = create(&fake, "dev", json!({"metadata": {"name": "a"}})).unwrap_err();
        assert!(err.is_already_exists());
        // same name in another namespace is fine
        assert!(create(&fake, "prod", json!({"metadata": {"name": "a"}})).is_ok());

        let err = create(&fake, "dev", json!({"metadata": {}})).unwrap_err();
        assert_eq!(Some(422), err.api_error().map(|e| e.code));
        let generated = create(&fake, "dev", json!({"metadata": {"generateName": "a-"}})).unwrap();
        assert!(generated.get_name().unwrap().starts_with("a-"));
    }

    #[test]
    fn stale_updates_conflict() {
        let fake = FakeApiServer::new();
        let created = create(&fake, "dev", json!({"metadata": {"name": "a"}, "spec": {"x": 1}})).unwrap();

        let mut first = created.clone();
        first["spec"]["x"] = json!(2);
        let updated = fake
            .handle(Operation::Update {
                k8s_type: App,
                namespace: Some("dev".to_owned()),
                name: "a".to_owned(),
                object: first,
            })
            .unwrap();
        assert_eq!(Some(2), updated.pointer("/metadata/generation").and_then(Value::as_i64));
        assert_eq!(created.pointer("/metadata/uid"), updated.pointer("/metadata/uid"));

        let mut stale = created;
        stale["spec"]["x"] = json!(3);
        let err = fake
            .handle(Operation::Update {
                k8s_type: App,
                namespace: Some("dev".to_owned()),
                name: "a".to_owned(),
                object: stale,
            })
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn missing_objects_are_not_found() {
        let fake = FakeApiServer::new();
        let get = Operation::Get {
            k8s_type: Secret,
            namespace: Some("dev".to_owned()),
            name: "s".to_owned(),
        };
        assert!(fake.handle(get).unwrap_err().is_not_found());
        let delete = Operation::Delete {
            k8s_type: Secret,
            namespace: Some("dev".to_owned()),
            name: "s".to_owned(),
            options: Default::default(),
        };
        assert!(fake.handle(delete).unwrap_err().is_not_found());
        assert_eq!(2, fake.operations().len());
    }

    #[test]
    fn list_selectors() {
        let fake = FakeApiServer::new();
        create(&fake, "dev", json!({"metadata": {"name": "a", "labels": {"team": "x", "tier": "web"}}})).unwrap();
        create(&fake, "dev", json!({"metadata": {"name": "b", "labels": {"team": "y"}}})).unwrap();
        create(&fake, "other", json!({"metadata": {"name": "c", "labels": {"team": "x"}}})).unwrap();

        assert_eq!(2, list(&fake, ListParams::default()).len());
        let by_label = ListParams {
            label_selector: Some("team=x,tier".to_owned()),
            ..Default::default()
        };
        assert_eq!(1, list(&fake, by_label).len());
        let not_x = ListParams {
            label_selector: Some("team!=x".to_owned()),
            ..Default::default()
        };
        assert_eq!(Some("b"), list(&fake, not_x)[0].get_name());

        let by_name = ListParams {
            field_selector: Some("metadata.name=b".to_owned()),
            ..Default::default()
        };
        assert_eq!(1, list(&fake, by_name.clone()).len());
        fake.ignore_field_selectors(true);
        assert_eq!(2, list(&fake, by_name).len());
    }

    #[test]
    fn reactors_run_first() {
        let fake = FakeApiServer::new();
        fake.prepend_reactor(|op| match op {
            Operation::Create { k8s_type, .. } => {
                Some(Err(ApiError::new(403, "Forbidden", format!("no {} for you", k8s_type.plural_kind)).into()))
            }
            _ => None,
        });
        let err = create(&fake, "dev", json!({"metadata": {"name": "a"}})).unwrap_err();
        assert_eq!("no apps for you", err.to_string());
        assert!(fake.objects(App).is_empty());
        assert_eq!("create", fake.operations()[0].verb());
    }
}
