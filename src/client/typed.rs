use super::wait::{condition_deleted, poll_until, wrap_predicate, ConditionFuncE};
use super::{
    all_predicates, ApiError, ApiServer, DeleteOptions, Error, ListOptions, Mutator, MutatorList,
    ObjectList, Operation, Predicate,
};
use crate::apis::{DynamicObject, KubeObject, Resource};
use crate::conditions::{check_conditions, find_condition, ConditionStatus};
use crate::config::{ConflictBackoff, RetryPolicy, WaitOptions};
use crate::k8s_types::K8sType;
use crate::metrics::ClientMetrics;

use serde_json::Value;

use std::sync::Arc;

const READY_CONDITION: &str = "Ready";

/// What an upsert did, along with the object as the server has it afterwards
#[derive(Debug, Clone, PartialEq)]
pub enum Upserted<T> {
    Created(T),
    Updated(T),
    Unchanged(T),
}

impl<T> Upserted<T> {
    pub fn into_inner(self) -> T {
        match self {
            Upserted::Created(obj) | Upserted::Updated(obj) | Upserted::Unchanged(obj) => obj,
        }
    }
}

/// Typed operations on a single kind of resource. Namespaces are passed as `&str`, and an empty
/// namespace means the resource is cluster scoped. Cloning is cheap.
pub struct ResourceClient<T> {
    api: Arc<dyn ApiServer>,
    k8s_type: &'static K8sType,
    kind: String,
    upsert_mutate: MutatorList<T>,
    membership: Predicate<T>,
    retry: RetryPolicy,
    metrics: Option<ClientMetrics>,
}

impl<T> Clone for ResourceClient<T> {
    fn clone(&self) -> ResourceClient<T> {
        ResourceClient {
            api: self.api.clone(),
            k8s_type: self.k8s_type,
            kind: self.kind.clone(),
            upsert_mutate: self.upsert_mutate.clone(),
            membership: self.membership.clone(),
            retry: self.retry.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<T: Resource> ResourceClient<T> {
    pub fn new(api: Arc<dyn ApiServer>) -> ResourceClient<T> {
        ResourceClient::with_type(api, T::k8s_type())
    }
}

impl ResourceClient<DynamicObject> {
    /// A client for a type that has no struct. Objects that report a different apiVersion and
    /// kind fail the membership check.
    pub fn for_type(api: Arc<dyn ApiServer>, k8s_type: &'static K8sType) -> ResourceClient<DynamicObject> {
        let mut client = ResourceClient::with_type(api, k8s_type);
        client.membership = Arc::new(move |obj: &DynamicObject| {
            obj.api_version.is_empty() || obj.is_type(k8s_type)
        });
        client
    }
}

fn namespace_param(namespace: &str) -> Option<String> {
    if namespace.is_empty() {
        None
    } else {
        Some(namespace.to_owned())
    }
}

impl<T: KubeObject> ResourceClient<T> {
    fn with_type(api: Arc<dyn ApiServer>, k8s_type: &'static K8sType) -> ResourceClient<T> {
        ResourceClient {
            api,
            k8s_type,
            kind: k8s_type.kind.to_owned(),
            upsert_mutate: MutatorList::default(),
            membership: Arc::new(|_: &T| true),
            retry: RetryPolicy::never(),
            metrics: None,
        }
    }

    /// Sets the friendly name used in error messages, which defaults to the kind
    pub fn with_kind(mut self, kind: impl Into<String>) -> ResourceClient<T> {
        self.kind = kind.into();
        self
    }

    /// Adds a mutator that runs on every object before it's created or updated
    pub fn with_upsert_mutator(mut self, mutator: Mutator<T>) -> ResourceClient<T> {
        self.upsert_mutate.push(mutator);
        self
    }

    /// Objects that don't match are hidden from `list` and make `get` fail
    pub fn with_membership(mut self, membership: Predicate<T>) -> ResourceClient<T> {
        self.membership = membership;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> ResourceClient<T> {
        self.retry = retry;
        self
    }

    pub fn with_metrics(mut self, metrics: ClientMetrics) -> ResourceClient<T> {
        self.metrics = Some(metrics);
        self
    }

    pub fn k8s_type(&self) -> &'static K8sType {
        self.k8s_type
    }

    pub fn kind(&self) -> &str {
        self.kind.as_str()
    }

    fn decode(&self, value: Value) -> Result<T, Error> {
        serde_json::from_value(value).map_err(Error::from)
    }

    fn prepare(&self, obj: &T) -> Result<Value, Error> {
        let mut obj = obj.clone();
        self.upsert_mutate.apply(&mut obj).map_err(Error::Mutate)?;
        let mut value = serde_json::to_value(&obj)?;
        if let Some(fields) = value.as_object_mut() {
            fields
                .entry("apiVersion")
                .or_insert_with(|| Value::from(self.k8s_type.api_version));
            fields
                .entry("kind")
                .or_insert_with(|| Value::from(self.k8s_type.kind));
        }
        Ok(value)
    }

    /// Runs the upsert mutators on a copy of the object, then creates it
    pub async fn create(&self, namespace: &str, obj: &T) -> Result<T, Error> {
        let name = obj.name().to_owned();
        let result = async {
            let object = self.prepare(obj)?;
            let op = Operation::Create {
                k8s_type: self.k8s_type,
                namespace: namespace_param(namespace),
                object,
            };
            let created = self.api.execute(op).await?;
            self.decode(created)
        };
        result.await.map_err(|e| {
            Error::context(
                format!("couldn't create the {} with the name \"{}\"", self.kind, name),
                e,
            )
        })
    }

    /// Replaces the whole object. The object's resourceVersion is sent as is, so a stale
    /// version fails with a conflict.
    pub async fn update(&self, namespace: &str, obj: &T) -> Result<T, Error> {
        let name = obj.name().to_owned();
        let result = async {
            let object = self.prepare(obj)?;
            let op = Operation::Update {
                k8s_type: self.k8s_type,
                namespace: namespace_param(namespace),
                name: name.clone(),
                object,
            };
            let updated = self.api.execute(op).await?;
            self.decode(updated)
        };
        result.await.map_err(|e| {
            Error::context(
                format!("couldn't update the {} with the name \"{}\"", self.kind, name),
                e,
            )
        })
    }

    /// Gets an object, failing if it exists but doesn't pass the membership check
    pub async fn get(&self, namespace: &str, name: &str) -> Result<T, Error> {
        let result = async {
            let op = Operation::Get {
                k8s_type: self.k8s_type,
                namespace: namespace_param(namespace),
                name: name.to_owned(),
            };
            let obj = self.decode(self.api.execute(op).await?)?;
            if !(self.membership)(&obj) {
                return Err(Error::Membership {
                    kind: self.kind.clone(),
                    name: name.to_owned(),
                });
            }
            Ok(obj)
        };
        result.await.map_err(|e| {
            Error::context(
                format!("couldn't get the {} with the name \"{}\"", self.kind, name),
                e,
            )
        })
    }

    /// Deletes without checking membership first
    pub async fn delete(
        &self,
        namespace: &str,
        name: &str,
        options: DeleteOptions,
    ) -> Result<(), Error> {
        log::debug!("Deleting {} '{}' in namespace '{}'", self.kind, name, namespace);
        let op = Operation::Delete {
            k8s_type: self.k8s_type,
            namespace: namespace_param(namespace),
            name: name.to_owned(),
            options,
        };
        self.api.execute(op).await.map(|_| ()).map_err(|e| {
            Error::context(
                format!("couldn't delete the {} with the name \"{}\"", self.kind, name),
                e,
            )
        })
    }

    /// Lists objects, then drops the ones that fail the membership check or any of the
    /// filters in the options
    pub async fn list(&self, namespace: &str, options: ListOptions<T>) -> Result<Vec<T>, Error> {
        let op = Operation::List {
            k8s_type: self.k8s_type,
            namespace: namespace_param(namespace),
            params: options.params(),
        };
        let result = async {
            let value = self.api.execute(op).await?;
            let list: ObjectList<T> = serde_json::from_value(value)?;
            Ok::<_, Error>(list)
        };
        let list = result
            .await
            .map_err(|e| Error::context(format!("couldn't list {}s", self.kind), e))?;

        let filter = all_predicates(options.filters);
        Ok(list
            .items
            .into_iter()
            .filter(|obj| (self.membership)(obj) && filter(obj))
            .collect())
    }

    /// Returns how long to sleep before trying again, or None if the error shouldn't be
    /// retried.
    fn should_retry(
        &self,
        err: &Error,
        backoff: &mut ConflictBackoff,
        retry_exists: bool,
    ) -> Option<std::time::Duration> {
        let retryable = err.is_conflict() || (retry_exists && err.is_already_exists());
        if !retryable {
            return None;
        }
        let delay = backoff.next_delay();
        if let Some(delay) = delay {
            log::info!(
                "Retrying write of {} in {}ms after: {}",
                self.kind,
                delay.as_millis(),
                err
            );
        }
        delay
    }

    /// Read, modify, write. A conflict on the write is retried with a fresh read according to
    /// the retry policy, which never retries by default.
    pub async fn transform(
        &self,
        namespace: &str,
        name: &str,
        mutator: Mutator<T>,
    ) -> Result<T, Error> {
        let mut backoff = self.retry.start();
        loop {
            let mut obj = self.get(namespace, name).await?;
            mutator(&mut obj).map_err(Error::Mutate)?;
            match self.update(namespace, &obj).await {
                Err(err) => match self.should_retry(&err, &mut backoff, false) {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => return Err(err),
                },
                ok => return ok,
            }
        }
    }

    /// Creates the object if nothing with the same name exists. Otherwise writes
    /// `merge(new, existing)` as an update.
    ///
    /// Existing objects are found with a field selector and then checked for an exact name
    /// match, since some kinds ignore field selectors. Nothing stops two concurrent upserts
    /// from both trying to create, in which case one of them gets an already exists error
    /// unless the retry policy allows another attempt.
    pub async fn upsert<M>(&self, namespace: &str, new_obj: &T, merge: M) -> Result<T, Error>
    where
        M: Fn(T, &T) -> T + Send + Sync,
    {
        let outcome = self
            .upsert_with(namespace, new_obj, |new, old| Some(merge(new, old)))
            .await?;
        Ok(outcome.into_inner())
    }

    /// Like `upsert`, but the merge can return None to leave the existing object as it is.
    pub async fn upsert_with<M>(
        &self,
        namespace: &str,
        new_obj: &T,
        merge: M,
    ) -> Result<Upserted<T>, Error>
    where
        M: Fn(T, &T) -> Option<T> + Send + Sync,
    {
        let name = new_obj.name();
        let mut backoff = self.retry.start();
        loop {
            let options =
                ListOptions::default().with_field_selector(format!("metadata.name={}", name));
            let existing = self
                .list(namespace, options)
                .await?
                .into_iter()
                .find(|obj| obj.name() == name);

            let result = match existing {
                Some(old_obj) => match merge(new_obj.clone(), &old_obj) {
                    Some(merged) => {
                        log::debug!("Updating existing {} '{}'", self.kind, name);
                        self.update(namespace, &merged).await.map(Upserted::Updated)
                    }
                    None => {
                        log::debug!("Leaving existing {} '{}' as it is", self.kind, name);
                        return Ok(Upserted::Unchanged(old_obj));
                    }
                },
                None => {
                    log::debug!("Creating new {} '{}'", self.kind, name);
                    self.create(namespace, new_obj).await.map(Upserted::Created)
                }
            };
            match result {
                Err(err) => match self.should_retry(&err, &mut backoff, true) {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => return Err(err),
                },
                ok => return ok,
            }
        }
    }

    /// Polls the object until the condition is done. The first check is immediate. Returns the
    /// last object fetched, or None if the condition finished on an error.
    pub async fn wait_for_e(
        &self,
        namespace: &str,
        name: &str,
        options: &WaitOptions,
        condition: ConditionFuncE<T>,
    ) -> Result<Option<T>, Error> {
        poll_until(
            self.k8s_type,
            self.kind.as_str(),
            options,
            self.metrics.as_ref(),
            || self.get(namespace, name),
            condition,
        )
        .await
    }

    /// Polls until the predicate matches. Any error while fetching ends the wait.
    pub async fn wait_for(
        &self,
        namespace: &str,
        name: &str,
        options: &WaitOptions,
        predicate: Predicate<T>,
    ) -> Result<T, Error> {
        let found = self
            .wait_for_e(namespace, name, options, wrap_predicate(predicate))
            .await?;
        self.require(found, name)
    }

    pub async fn wait_for_deletion(
        &self,
        namespace: &str,
        name: &str,
        options: &WaitOptions,
    ) -> Result<(), Error> {
        self.wait_for_e(namespace, name, options, condition_deleted())
            .await
            .map(|_| ())
    }

    /// Polls until the object's conditions are all True. The wait fails as soon as they
    /// aggregate to False. Changes to the Ready message are passed to the options' reporter.
    pub async fn wait_for_condition_ready_true(
        &self,
        namespace: &str,
        name: &str,
        options: &WaitOptions,
    ) -> Result<T, Error> {
        let condition = ready_condition(self.kind.clone(), options.clone());
        let found = self.wait_for_e(namespace, name, options, condition).await?;
        self.require(found, name)
    }

    fn require(&self, found: Option<T>, name: &str) -> Result<T, Error> {
        found.ok_or_else(|| ApiError::not_found(self.k8s_type, name).into())
    }
}

fn ready_condition<T: KubeObject>(kind: String, options: WaitOptions) -> ConditionFuncE<T> {
    let mut last_message: Option<String> = None;
    Box::new(move |result: Result<&T, Error>| {
        let value = serde_json::to_value(result?)?;
        let ready = find_condition(&value, READY_CONDITION);

        if let Some(message) = ready.and_then(|(_, _, message)| message) {
            if !message.is_empty() && last_message.as_deref() != Some(message) {
                options.report(message);
                last_message = Some(message.to_owned());
            }
        }

        match check_conditions(&value) {
            ConditionStatus::True => Ok(true),
            ConditionStatus::Unknown => Ok(false),
            ConditionStatus::False => {
                let message = match ready {
                    Some((status, reason, message)) => format!(
                        "status: {} message: {} reason: {}",
                        status,
                        message.unwrap_or(""),
                        reason.unwrap_or("")
                    ),
                    None => "a condition is not True".to_owned(),
                };
                Err(Error::Failed {
                    kind: kind.clone(),
                    message,
                })
            }
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::apis::{App, Build};
    use crate::apis::Labels;
    use crate::client::fake::FakeApiServer;
    use crate::client::label_set_mutator;

    use serde_json::json;

    use std::sync::Mutex;
    use std::time::Duration;

    fn setup() -> (Arc<FakeApiServer>, ResourceClient<App>) {
        let fake = Arc::new(FakeApiServer::new());
        let client = ResourceClient::<App>::new(fake.clone());
        (fake, client)
    }

    #[tokio::test]
    async fn create_runs_the_upsert_mutators() {
        let (fake, client) = setup();
        let mut labels = Labels::new();
        labels.insert("team".to_owned(), "payments".to_owned());
        let client = client.with_upsert_mutator(label_set_mutator(labels));

        let app = App::new("dev", "my-app");
        let created = client.create("dev", &app).await.unwrap();
        assert_eq!("payments", created.metadata.labels["team"]);
        assert!(created.metadata.resource_version.is_some());

        let stored = fake.get_object(App::k8s_type(), Some("dev"), "my-app").unwrap();
        assert_eq!(Some("payments"), stored.pointer("/metadata/labels/team").and_then(Value::as_str));
        // the caller's copy is left alone
        assert!(app.metadata.labels.is_empty());
    }

    #[tokio::test]
    async fn get_errors_are_friendly() {
        let (_fake, client) = setup();
        let err = client.get("dev", "missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(
            "couldn't get the App with the name \"missing\": apps \"missing\" not found",
            err.to_string()
        );

        let err = client
            .with_kind("Application")
            .delete("dev", "missing", DeleteOptions::default())
            .await
            .unwrap_err();
        assert!(err
            .to_string()
            .starts_with("couldn't delete the Application with the name \"missing\""));
    }

    #[tokio::test]
    async fn membership_hides_objects() {
        let (fake, client) = setup();
        fake.add_object(App::k8s_type(), serde_json::to_value(App::new("dev", "theirs")).unwrap());
        let client = client.with_membership(crate::client::labels_contains_predicate("mine"));

        let err = client.get("dev", "theirs").await.unwrap_err();
        assert_eq!(
            "couldn't get the App with the name \"theirs\": an object with the name theirs exists, but it doesn't appear to be a App",
            err.to_string()
        );
        assert!(client.list("dev", ListOptions::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn transform_retries_conflicts_when_allowed() {
        let (fake, client) = setup();
        fake.add_object(App::k8s_type(), serde_json::to_value(App::new("dev", "my-app")).unwrap());

        let conflicts = Arc::new(Mutex::new(1));
        let remaining = conflicts.clone();
        fake.prepend_reactor(move |op| match op {
            Operation::Update { k8s_type, name, .. } => {
                let mut remaining = remaining.lock().unwrap();
                if *remaining > 0 {
                    *remaining -= 1;
                    Some(Err(ApiError::conflict(k8s_type, name).into()))
                } else {
                    None
                }
            }
            _ => None,
        });

        let stop: Mutator<App> = Arc::new(|app: &mut App| {
            app.spec.instances.stopped = true;
            Ok(())
        });
        let err = client.transform("dev", "my-app", stop.clone()).await.unwrap_err();
        assert!(err.is_conflict());

        *conflicts.lock().unwrap() = 1;
        let client = client.with_retry(
            RetryPolicy::on_conflict(3).with_intervals(Duration::from_millis(1), Duration::from_millis(2)),
        );
        let app = client.transform("dev", "my-app", stop).await.unwrap();
        assert!(app.spec.instances.stopped);
    }

    #[tokio::test]
    async fn dynamic_clients_check_the_type() {
        let fake = Arc::new(FakeApiServer::new());
        fake.add_object(
            Build::k8s_type(),
            json!({"apiVersion": "kf.dev/v1alpha1", "kind": "Build", "metadata": {"name": "b", "namespace": "dev"}}),
        );
        let builds = ResourceClient::for_type(fake.clone(), Build::k8s_type());
        let build = builds.get("dev", "b").await.unwrap();
        assert_eq!("Build", build.kind);

        // stored under the App type, but it says it's a Build
        fake.add_object(
            App::k8s_type(),
            json!({"apiVersion": "kf.dev/v1alpha1", "kind": "Build", "metadata": {"name": "x", "namespace": "dev"}}),
        );
        let apps = ResourceClient::for_type(fake.clone(), App::k8s_type());
        let err = apps.get("dev", "x").await.unwrap_err();
        assert!(matches!(err, Error::Context { ref source, .. } if matches!(**source, Error::Membership { .. })));
        assert!(apps.list("dev", ListOptions::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ready_condition_reports_and_fails() {
        let messages = Arc::new(Mutex::new(Vec::new()));
        let reported = messages.clone();
        let options = WaitOptions::new(Duration::from_millis(1))
            .with_reporter(move |msg| reported.lock().unwrap().push(msg.to_owned()));
        let mut condition = ready_condition::<DynamicObject>("App".to_owned(), options);

        let object = |status: &str, message: &str| {
            DynamicObject::from_value(json!({
                "metadata": {"name": "a", "generation": 1},
                "status": {
                    "observedGeneration": 1,
                    "conditions": [{"type": "Ready", "status": status, "message": message, "reason": "Deploying"}],
                },
            }))
            .unwrap()
        };

        assert!(!condition(Ok(&object("Unknown", "waiting for build"))).unwrap());
        assert!(!condition(Ok(&object("Unknown", "waiting for build"))).unwrap());
        assert!(condition(Ok(&object("True", "ready"))).unwrap());
        let err = condition(Ok(&object("False", "image pull failed"))).unwrap_err();
        assert_eq!(
            "checking App Ready condition failed: status: False message: image pull failed reason: Deploying",
            err.to_string()
        );
        assert_eq!(
            vec!["waiting for build", "ready", "image pull failed"],
            *messages.lock().unwrap()
        );
    }
}
