use crate::apis::{App, KubeObject, Resource, ServiceInstance, ServiceInstanceBinding, Space};
use crate::client::{self, ListOptions, ResourceClient};

use std::collections::HashMap;
use std::fmt::{self, Display};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListerError {
    NotFound { kind: String, name: String },
    Other(String),
}

impl ListerError {
    pub fn not_found(kind: &str, name: &str) -> ListerError {
        ListerError::NotFound {
            kind: kind.to_owned(),
            name: name.to_owned(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ListerError::NotFound { .. })
    }
}

impl Display for ListerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ListerError::NotFound { kind, name } => write!(f, "{} \"{}\" not found", kind, name),
            ListerError::Other(msg) => f.write_str(msg.as_str()),
        }
    }
}

impl std::error::Error for ListerError {}

pub trait SpaceLister: Send + Sync {
    fn get_space(&self, name: &str) -> Result<Space, ListerError>;
}

pub trait AppLister: Send + Sync {
    fn get_app(&self, namespace: &str, name: &str) -> Result<App, ListerError>;
}

pub trait ServiceInstanceLister: Send + Sync {
    fn get_instance(&self, namespace: &str, name: &str) -> Result<ServiceInstance, ListerError>;

    /// Lists instances in one namespace, or in all of them when `namespace` is None
    fn list_instances(&self, namespace: Option<&str>) -> Result<Vec<ServiceInstance>, ListerError>;
}

pub trait ServiceInstanceBindingLister: Send + Sync {
    fn list_bindings(&self, namespace: &str) -> Result<Vec<ServiceInstanceBinding>, ListerError>;
}

/// A read-through cache of one kind of object, keyed by namespace and name. Cluster scoped
/// objects use an empty namespace.
pub struct CacheLister<T> {
    objects: RwLock<HashMap<(String, String), T>>,
}

impl<T> Default for CacheLister<T> {
    fn default() -> CacheLister<T> {
        CacheLister {
            objects: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: Resource> CacheLister<T> {
    pub fn new() -> CacheLister<T> {
        CacheLister::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<(String, String), T>> {
        self.objects
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<(String, String), T>> {
        self.objects
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn key(obj: &T) -> (String, String) {
        let meta = obj.meta();
        (
            meta.namespace().unwrap_or("").to_owned(),
            meta.name.clone(),
        )
    }

    /// Adds or replaces the object
    pub fn insert(&self, obj: T) {
        self.write().insert(Self::key(&obj), obj);
    }

    pub fn remove(&self, namespace: &str, name: &str) -> Option<T> {
        self.write()
            .remove(&(namespace.to_owned(), name.to_owned()))
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn get(&self, namespace: &str, name: &str) -> Result<T, ListerError> {
        self.read()
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned()
            .ok_or_else(|| ListerError::not_found(T::k8s_type().kind, name))
    }

    /// Objects in one namespace, or all of them, sorted by namespace then name
    pub fn list(&self, namespace: Option<&str>) -> Vec<T> {
        let objects = self.read();
        let mut keys: Vec<&(String, String)> = objects
            .keys()
            .filter(|(ns, _)| namespace.map(|n| n == ns.as_str()).unwrap_or(true))
            .collect();
        keys.sort();
        keys.into_iter()
            .filter_map(|k| objects.get(k).cloned())
            .collect()
    }

    /// Replaces the cached objects of a namespace (or every namespace, if it's empty) with a
    /// fresh list from the api server. Returns the number of objects cached.
    pub async fn refresh(
        &self,
        client: &ResourceClient<T>,
        namespace: &str,
    ) -> Result<usize, client::Error> {
        let fresh = client.list(namespace, ListOptions::default()).await?;
        let count = fresh.len();
        let mut objects = self.write();
        objects.retain(|(ns, _), _| !namespace.is_empty() && ns.as_str() != namespace);
        for obj in fresh {
            objects.insert(Self::key(&obj), obj);
        }
        log::debug!(
            "Refreshed {} cache for namespace '{}' with {} objects",
            T::k8s_type().kind,
            namespace,
            count
        );
        Ok(count)
    }
}

impl SpaceLister for CacheLister<Space> {
    fn get_space(&self, name: &str) -> Result<Space, ListerError> {
        self.get("", name)
    }
}

impl AppLister for CacheLister<App> {
    fn get_app(&self, namespace: &str, name: &str) -> Result<App, ListerError> {
        self.get(namespace, name)
    }
}

impl ServiceInstanceLister for CacheLister<ServiceInstance> {
    fn get_instance(&self, namespace: &str, name: &str) -> Result<ServiceInstance, ListerError> {
        self.get(namespace, name)
    }

    fn list_instances(&self, namespace: Option<&str>) -> Result<Vec<ServiceInstance>, ListerError> {
        Ok(self.list(namespace))
    }
}

impl ServiceInstanceBindingLister for CacheLister<ServiceInstanceBinding> {
    fn list_bindings(&self, namespace: &str) -> Result<Vec<ServiceInstanceBinding>, ListerError> {
        Ok(self.list(Some(namespace)))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::client::fake::FakeApiServer;

    use std::sync::Arc;

    #[test]
    fn cache_get_and_list() {
        let cache = CacheLister::new();
        cache.insert(App::new("b-ns", "x"));
        cache.insert(App::new("a-ns", "y"));
        cache.insert(App::new("a-ns", "x"));

        assert_eq!("y", cache.get_app("a-ns", "y").unwrap().metadata.name);
        let err = cache.get_app("a-ns", "z").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!("App \"z\" not found", err.to_string());

        let names: Vec<String> = cache
            .list(None)
            .into_iter()
            .map(|a| format!("{}/{}", a.metadata.namespace.unwrap(), a.metadata.name))
            .collect();
        assert_eq!(vec!["a-ns/x", "a-ns/y", "b-ns/x"], names);
        assert_eq!(2, cache.list(Some("a-ns")).len());

        assert!(cache.remove("a-ns", "x").is_some());
        assert_eq!(2, cache.len());
    }

    #[test]
    fn spaces_are_cluster_scoped() {
        let cache = CacheLister::new();
        cache.insert(Space::new("dev"));
        assert!(cache.get_space("dev").is_ok());
    }

    #[tokio::test]
    async fn refresh_replaces_a_namespace() {
        let fake = Arc::new(FakeApiServer::new());
        fake.add_object(App::k8s_type(), serde_json::to_value(App::new("dev", "fresh")).unwrap());
        let client = ResourceClient::<App>::new(fake.clone());

        let cache = CacheLister::new();
        cache.insert(App::new("dev", "stale"));
        cache.insert(App::new("other", "kept"));
        assert_eq!(1, cache.refresh(&client, "dev").await.unwrap());

        assert!(cache.get_app("dev", "stale").is_err());
        assert!(cache.get_app("dev", "fresh").is_ok());
        assert!(cache.get_app("other", "kept").is_ok());
    }
}
