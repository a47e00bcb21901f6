use std::fmt::{self, Display};
use std::hash::{self, Hash};

/// A basic description of a Kubernetes resource type, with just enough information to talk to
/// the api server about it. Everything is a `&'static str` so references can be passed around
/// freely. New types are declared as statics:
///
/// ```
/// use kf::k8s_types::K8sType;
///
/// #[allow(non_upper_case_globals)]
/// pub static Widget: &K8sType = &K8sType {
///     api_version: "example.com/v1",
///     kind: "Widget",
///     plural_kind: "widgets",
/// };
/// assert_eq!("example.com", Widget.group());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct K8sType {
    pub api_version: &'static str,
    pub kind: &'static str,
    pub plural_kind: &'static str,
}

impl Hash for K8sType {
    fn hash<H: hash::Hasher>(&self, hasher: &mut H) {
        self.api_version.hash(hasher);
        self.kind.hash(hasher);
    }
}

impl K8sType {
    pub fn as_group_and_version(&self) -> (&'static str, &'static str) {
        match self.api_version.find('/') {
            Some(slash_idx) => (
                &self.api_version[..slash_idx],
                &self.api_version[(slash_idx + 1)..],
            ),
            None => ("", self.api_version),
        }
    }

    pub fn group(&self) -> &'static str {
        self.as_group_and_version().0
    }

    pub fn version(&self) -> &'static str {
        self.as_group_and_version().1
    }

    /// Returns true if the given apiVersion and kind describe this type
    pub fn matches(&self, api_version: &str, kind: &str) -> bool {
        self.api_version == api_version && self.kind == kind
    }
}

impl Display for K8sType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.api_version, self.plural_kind)
    }
}

macro_rules! k8s_type {
    ($ref_name:ident, $api_version:expr, $kind:expr, $plural_kind:expr) => {
        #[allow(non_upper_case_globals)]
        pub static $ref_name: &crate::k8s_types::K8sType = &crate::k8s_types::K8sType {
            api_version: $api_version,
            kind: $kind,
            plural_kind: $plural_kind,
        };
    };
}

macro_rules! def_types {
    (@group $group:expr, [
        $( $version:ident => [
            $( $kind:ident ~ $plural_kind:ident ),*
        ]),*
    ]) => {
        $(
            pub mod $version {
                $(
                    k8s_type!($kind, concat!($group, "/", stringify!($version)), stringify!($kind), stringify!($plural_kind));
                )*
            }
        )*
    };
    (@core => [
        $( $version:ident => [
            $( $kind:ident ~ $plural_kind:ident ),*
        ]),*
    ]) => {
        pub mod core {
            $(pub mod $version {
                $(
                    k8s_type!($kind, stringify!($version), stringify!($kind), stringify!($plural_kind));
                )*
            })*
        }
    };
}

def_types! {
    @core => [
        v1 => [
            Namespace ~ namespaces,
            Pod ~ pods,
            Service ~ services,
            Secret ~ secrets,
            ConfigMap ~ configmaps,
            PersistentVolumeClaim ~ persistentvolumeclaims,
            ResourceQuota ~ resourcequotas,
            ServiceAccount ~ serviceaccounts
        ]
    ]
}

pub mod apps {
    def_types! {
        @group "apps", [
            v1 => [
                Deployment ~ deployments
            ]
        ]
    }
}

pub mod autoscaling {
    def_types! {
        @group "autoscaling", [
            v1 => [
                HorizontalPodAutoscaler ~ horizontalpodautoscalers
            ]
        ]
    }
}

pub mod networking_k8s_io {
    def_types! {
        @group "networking.k8s.io", [
            v1 => [
                NetworkPolicy ~ networkpolicies
            ]
        ]
    }
}

pub mod rbac_authorization_k8s_io {
    def_types! {
        @group "rbac.authorization.k8s.io", [
            v1 => [
                ClusterRoleBinding ~ clusterrolebindings,
                ClusterRole ~ clusterroles,
                RoleBinding ~ rolebindings,
                Role ~ roles
            ]
        ]
    }
}

/// The custom resources owned by kf
pub mod kf_dev {
    def_types! {
        @group "kf.dev", [
            v1alpha1 => [
                App ~ apps,
                Space ~ spaces,
                Build ~ builds,
                Source ~ sources,
                Route ~ routes,
                ServiceInstance ~ serviceinstances,
                ServiceInstanceBinding ~ serviceinstancebindings,
                ServiceBroker ~ servicebrokers,
                ClusterServiceBroker ~ clusterservicebrokers
            ]
        ]
    }
}

/// Config Connector types used for workload identity
pub mod iam_cnrm_cloud_google_com {
    def_types! {
        @group "iam.cnrm.cloud.google.com", [
            v1beta1 => [
                IAMPolicy ~ iampolicies
            ]
        ]
    }
}
