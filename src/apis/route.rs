use super::{CommonStatus, ObjectMeta};
use crate::k8s_types::kf_dev::v1alpha1;

use std::fmt::{self, Display};

pub const ROUTE_HOSTNAME_LABEL: &str = "kf.dev/route-hostname";
pub const ROUTE_DOMAIN_LABEL: &str = "kf.dev/route-domain";
pub const ROUTE_PATH_LABEL: &str = "kf.dev/route-path";
pub const ROUTE_APP_NAME_LABEL: &str = "kf.dev/route-appname";

pub const DEFAULT_ROUTE_WEIGHT: i32 = 1;
pub const DEFAULT_ROUTE_DESTINATION_PORT: i32 = 80;

/// The hostname, domain and path that identify a route. A route is identified by its
/// string form, so two routes with paths `a` and `/a/` are the same route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpecFields {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

/// Joins the path onto `/` and cleans it, so `a//b/./c/` becomes `/a/b/c`
pub fn clean_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}

impl RouteSpecFields {
    pub fn new(hostname: &str, domain: &str, path: &str) -> RouteSpecFields {
        RouteSpecFields {
            hostname: hostname.to_owned(),
            domain: domain.to_owned(),
            path: path.to_owned(),
        }
    }

    /// `hostname.domain`, or just the domain if there's no hostname
    pub fn host(&self) -> String {
        if self.hostname.is_empty() {
            self.domain.clone()
        } else {
            format!("{}.{}", self.hostname, self.domain)
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.hostname == "*"
    }

    /// Fills in the domain if it's blank
    pub fn qualify(&self, default_domain: &str) -> RouteSpecFields {
        let mut out = self.clone();
        if out.domain.is_empty() {
            out.domain = default_domain.to_owned();
        }
        out
    }

    pub fn equals(&self, other: &RouteSpecFields) -> bool {
        self.to_string() == other.to_string()
    }

    pub fn url(&self, scheme: &str) -> Result<url::Url, url::ParseError> {
        let mut url = url::Url::parse(&format!("{}://{}", scheme, self.host()))?;
        url.set_path(clean_path(self.path.as_str()).as_str());
        Ok(url)
    }
}

impl Display for RouteSpecFields {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.path.is_empty() || self.path == "/" {
            f.write_str(self.host().as_str())
        } else {
            write!(f, "{}{}", self.host(), clean_path(self.path.as_str()))
        }
    }
}

/// A route an App wants traffic from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteWeightBinding {
    #[serde(flatten)]
    pub route: RouteSpecFields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_port: Option<i32>,
}

impl RouteWeightBinding {
    pub fn new(route: RouteSpecFields) -> RouteWeightBinding {
        RouteWeightBinding {
            route,
            weight: None,
            destination_port: None,
        }
    }

    fn effective_port(&self) -> i32 {
        self.destination_port
            .unwrap_or(DEFAULT_ROUTE_DESTINATION_PORT)
    }

    fn effective_weight(&self) -> i32 {
        self.weight.unwrap_or(DEFAULT_ROUTE_WEIGHT)
    }

    /// Bindings are equal if they route the same traffic to the same port, weights aside
    pub fn equals_binding(&self, other: &RouteWeightBinding) -> bool {
        self.route.equals(&other.route) && self.effective_port() == other.effective_port()
    }

    pub fn qualify(&self, default_domain: &str, service_name: &str) -> QualifiedRouteBinding {
        QualifiedRouteBinding {
            source: self.route.qualify(default_domain),
            destination: RouteDestination {
                service_name: service_name.to_owned(),
                port: self.effective_port(),
                weight: self.effective_weight(),
            },
        }
    }
}

/// Combines bindings for the same route and port by adding up their weights
pub fn merge_bindings(bindings: &[RouteWeightBinding]) -> Vec<RouteWeightBinding> {
    let mut merged: Vec<RouteWeightBinding> = Vec::new();
    for binding in bindings {
        match merged.iter_mut().find(|m| m.equals_binding(binding)) {
            Some(existing) => {
                existing.weight = Some(existing.effective_weight() + binding.effective_weight());
            }
            None => merged.push(binding.clone()),
        }
    }
    merged
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDestination {
    pub service_name: String,
    pub port: i32,
    pub weight: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualifiedRouteBinding {
    pub source: RouteSpecFields,
    pub destination: RouteDestination,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Route {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: RouteSpec,
    #[serde(default)]
    pub status: RouteStatus,
}

kube_object!(Route, v1alpha1::Route);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteSpec {
    #[serde(flatten)]
    pub fields: RouteSpecFields,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStatus {
    #[serde(flatten)]
    pub common: CommonStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bindings: Vec<RouteDestination>,
}

impl Route {
    /// A route whose controller has caught up and found nothing bound to it
    pub fn is_orphaned(&self) -> bool {
        match self.metadata.generation {
            None | Some(0) => false,
            Some(generation) if Some(generation) != self.status.common.observed_generation => {
                false
            }
            Some(_) => self.status.bindings.is_empty(),
        }
    }
}
