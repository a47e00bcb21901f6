//! kf runs Cloud Foundry style applications on Kubernetes. This crate holds the parts of kf
//! that don't depend on a controller runtime:
//!
//! * `apis`: typed models of the kf custom resources (App, Space, Route, ServiceInstance, ...)
//! * `resources`: pure functions that derive the Kubernetes objects kf manages from those models
//! * `client`: a small typed client with upsert, read-modify-write and polling helpers
//! * `admission`: cross-resource checks and the webhook that serves them
//! * `reconcile`: writes derived children and summarizes their readiness
//!
//! Deriving the Deployment for an App:
//! ```
//! use kf::apis::{App, Space};
//! use kf::resources::make_deployment;
//!
//! let space = Space::new("dev");
//! let mut app = App::new("dev", "hello");
//! app.spec.instances.replicas = Some(2);
//! app.status.image = "gcr.io/example/hello@sha256:abc".to_owned();
//!
//! let deployment = make_deployment(&app, &space).unwrap();
//! assert_eq!("hello", deployment["metadata"]["name"]);
//! assert_eq!(2, deployment["spec"]["replicas"]);
//! ```

#[macro_use]
extern crate serde_derive;

pub mod admission;
pub mod apis;
pub mod client;
pub mod conditions;
pub mod config;
pub mod error;
pub mod k8s_types;
pub mod metrics;
pub mod reconcile;
pub mod resource;
pub mod resources;

pub use serde;
pub use serde_json;
pub use serde_yaml;

pub mod prelude {
    pub use crate::apis::{App, KubeObject, Resource, Route, ServiceInstance, Space};
    pub use crate::client::{ApiServer, ResourceClient};
    pub use crate::config::{ClientConfig, RetryPolicy, WaitOptions};
    pub use crate::error::Error;
    pub use crate::k8s_types::{self, K8sType};
    pub use crate::resource::K8sResource;
    pub use serde::{Deserialize, Serialize};
}
