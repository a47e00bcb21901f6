use super::{owned_by, Error};
use crate::apis::{
    union_maps, Labels, NetworkPolicyConfig, Space, DENY_ALL_NETWORK_POLICY, MANAGED_BY_KF,
    MANAGED_BY_LABEL, NETWORK_POLICY_APP, NETWORK_POLICY_BUILD, NETWORK_POLICY_LABEL,
};
use crate::k8s_types::core::v1::{Namespace, Secret, ServiceAccount};
use crate::k8s_types::iam_cnrm_cloud_google_com::v1beta1::IAMPolicy;
use crate::k8s_types::networking_k8s_io::v1::NetworkPolicy;
use crate::k8s_types::rbac_authorization_k8s_io::v1::{ClusterRole, ClusterRoleBinding, Role};
use crate::resource::{str_value, unstructured, ResourceJson};

use serde_json::{json, Value};

use std::fmt::{self, Display};

pub const DEVELOPER_ROLE_NAME: &str = "space-developer";
pub const AUDITOR_ROLE_NAME: &str = "space-auditor";
pub const GCP_SERVICE_ACCOUNT_ANNOTATION: &str = "iam.gke.io/gcp-service-account";
pub const DOCKER_CONFIG_JSON_SECRET_TYPE: &str = "kubernetes.io/dockerconfigjson";
pub const WORKLOAD_IDENTITY_ROLE: &str = "roles/iam.workloadIdentityUser";

/// Config Connector objects live in this namespace rather than the Space's
pub const CONFIG_CONNECTOR_NAMESPACE: &str = "kf";

const READ_ONLY_VERBS: &[&str] = &["get", "list", "watch"];
const EDIT_VERBS: &[&str] = &["create", "update", "patch", "delete"];

fn space_labels(space: &Space) -> Labels {
    let mut managed = Labels::new();
    managed.insert(MANAGED_BY_LABEL.to_owned(), MANAGED_BY_KF.to_owned());
    union_maps(vec![&space.metadata.labels, &managed])
}

/// Every Space owns the Namespace of the same name
pub fn namespace_name(space: &Space) -> String {
    space.metadata.name.clone()
}

pub fn make_namespace(space: &Space) -> Value {
    json!({
        "apiVersion": Namespace.api_version,
        "kind": Namespace.kind,
        "metadata": {
            "name": namespace_name(space),
            "labels": space_labels(space),
            "ownerReferences": owned_by(space),
        },
    })
}

fn policy_rule(api_group: &str, resources: &[&str], verbs: &[&[&str]]) -> Value {
    json!({
        "apiGroups": [api_group],
        "resources": resources,
        "verbs": verbs.concat(),
    })
}

fn auditor_policy_rules() -> Vec<Value> {
    vec![
        policy_rule("kf.dev", &["*"], &[READ_ONLY_VERBS]),
        policy_rule("serving.knative.dev", &["*"], &[READ_ONLY_VERBS]),
        policy_rule("build.knative.dev", &["*"], &[READ_ONLY_VERBS]),
        policy_rule("servicecatalog.k8s.io", &["*"], &[READ_ONLY_VERBS]),
        policy_rule(
            "",
            &["pods", "resourcequotas", "services"],
            &[READ_ONLY_VERBS],
        ),
    ]
}

fn developer_policy_rules() -> Vec<Value> {
    let mut rules = auditor_policy_rules();
    rules.push(policy_rule(
        "kf.dev",
        &[
            "apps",
            "routes",
            "serviceinstances",
            "serviceinstancebindings",
            "sources",
        ],
        &[EDIT_VERBS],
    ));
    rules.push(policy_rule(
        "servicecatalog.k8s.io",
        &["serviceinstances", "servicebindings"],
        &[EDIT_VERBS],
    ));
    rules.push(policy_rule(
        "",
        &["secrets"],
        &[READ_ONLY_VERBS, EDIT_VERBS],
    ));
    rules.push(policy_rule(
        "serving.knative.dev",
        &["services"],
        &[EDIT_VERBS],
    ));
    rules
}

fn make_role(space: &Space, name: &str, rules: Vec<Value>) -> Value {
    json!({
        "apiVersion": Role.api_version,
        "kind": Role.kind,
        "metadata": {
            "name": name,
            "namespace": namespace_name(space),
            "labels": space_labels(space),
            "ownerReferences": owned_by(space),
        },
        "rules": rules,
    })
}

/// Developers can do everything auditors can, and can also push Apps and manage services
pub fn make_developer_role(space: &Space) -> Value {
    make_role(space, DEVELOPER_ROLE_NAME, developer_policy_rules())
}

/// Read only access to the Space
pub fn make_auditor_role(space: &Space) -> Value {
    make_role(space, AUDITOR_ROLE_NAME, auditor_policy_rules())
}

pub fn build_service_account_name(space: &Space) -> String {
    space.status.build_config.service_account.clone()
}

pub fn build_image_push_secret_name(secret_name: &str) -> String {
    format!("{}{}", super::KF_REGISTRY_SECRET_PREFIX, secret_name)
}

/// The ServiceAccount builds in the Space run as, along with copies of the registry
/// credentials it needs. `registry_secrets` are the source secrets, typically from the kf
/// namespace; the copies keep their data but are renamed and placed in the Space. When
/// `gsa_name` isn't empty the account is bound to that Google service account through
/// workload identity.
pub fn make_build_service_account(
    space: &Space,
    registry_secrets: &[Value],
    gsa_name: &str,
    container_registry: &str,
) -> (Value, Vec<Value>) {
    let namespace = namespace_name(space);
    let labels = space_labels(space);

    let secrets = registry_secrets
        .iter()
        .enumerate()
        .map(|(i, source)| {
            let mut annotations = serde_json::Map::new();
            annotations.insert(
                format!("tekton.dev/docker-{}", i),
                Value::from(container_registry),
            );
            json!({
                "apiVersion": Secret.api_version,
                "kind": Secret.kind,
                "metadata": {
                    "name": build_image_push_secret_name(source.get_name().unwrap_or_default()),
                    "namespace": namespace,
                    "labels": labels,
                    "annotations": annotations,
                },
                "type": DOCKER_CONFIG_JSON_SECRET_TYPE,
                "data": source.get("data").cloned().unwrap_or_else(|| json!({})),
            })
        })
        .collect::<Vec<_>>();

    let refs = secrets
        .iter()
        .filter_map(|s| s.get_name())
        .map(|name| json!({ "name": name }))
        .collect::<Vec<_>>();

    let mut service_account = json!({
        "apiVersion": ServiceAccount.api_version,
        "kind": ServiceAccount.kind,
        "metadata": {
            "name": build_service_account_name(space),
            "namespace": namespace,
            "labels": labels,
        },
        "secrets": refs,
        "imagePullSecrets": refs,
    });
    if !gsa_name.is_empty() {
        service_account["metadata"]["annotations"] =
            json!({ GCP_SERVICE_ACCOUNT_ANNOTATION: gsa_name });
    }

    (service_account, secrets)
}

fn network_policy_rules(setting: &str) -> Value {
    if setting == DENY_ALL_NETWORK_POLICY {
        json!([])
    } else {
        json!([{}])
    }
}

pub fn network_policy_name(pod_type: &str) -> String {
    format!("kf-{}-network-policy", pod_type)
}

fn make_network_policy(space: &Space, pod_type: &str, config: &NetworkPolicyConfig) -> Value {
    json!({
        "apiVersion": NetworkPolicy.api_version,
        "kind": NetworkPolicy.kind,
        "metadata": {
            "name": network_policy_name(pod_type),
            "namespace": namespace_name(space),
            "labels": space_labels(space),
            "ownerReferences": owned_by(space),
        },
        "spec": {
            "podSelector": {
                "matchLabels": { NETWORK_POLICY_LABEL: pod_type },
            },
            "policyTypes": ["Ingress", "Egress"],
            "ingress": network_policy_rules(config.ingress.as_str()),
            "egress": network_policy_rules(config.egress.as_str()),
        },
    })
}

/// One NetworkPolicy for App pods and one for build pods. Anything other than `DenyAll`
/// permits all traffic in that direction, including an unset policy.
pub fn make_network_policies(space: &Space) -> Vec<Value> {
    let network = &space.spec.network_config;
    vec![
        make_network_policy(space, NETWORK_POLICY_APP, &network.app_network_policy),
        make_network_policy(space, NETWORK_POLICY_BUILD, &network.build_network_policy),
    ]
}

/// The Config Connector policy letting the Space's build ServiceAccount act as the Google
/// service account `gsa_name` in `project_id`
pub fn make_iam_policy(space: &Space, gsa_name: &str, project_id: &str) -> Result<Value, Error> {
    let member = format!(
        "serviceAccount:{}.svc.id.goog[{}/{}]",
        project_id,
        namespace_name(space),
        build_service_account_name(space)
    );
    let policy = unstructured(
        IAMPolicy,
        vec![
            ("metadata.name", Value::from(namespace_name(space))),
            ("metadata.namespace", Value::from(CONFIG_CONNECTOR_NAMESPACE)),
            ("metadata.labels", json!(space_labels(space))),
            ("spec.resourceRef.apiVersion", Value::from(IAMPolicy.api_version)),
            ("spec.resourceRef.kind", Value::from("IAMServiceAccount")),
            ("spec.resourceRef.name", Value::from(gsa_name)),
            (
                "spec.bindings",
                json!([{ "role": WORKLOAD_IDENTITY_ROLE, "members": [member] }]),
            ),
        ],
    )?;
    Ok(policy)
}

/// The cluster wide roles kf grants to members of a Space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleName {
    SpaceManager,
    SpaceDeveloper,
    SpaceAuditor,
}

impl RoleName {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleName::SpaceManager => "space-manager",
            RoleName::SpaceDeveloper => DEVELOPER_ROLE_NAME,
            RoleName::SpaceAuditor => AUDITOR_ROLE_NAME,
        }
    }
}

impl Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An RBAC subject. Ordering is by kind, then name, then namespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Subject {
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl Subject {
    pub fn new(kind: &str, name: &str) -> Subject {
        Subject {
            kind: kind.to_owned(),
            name: name.to_owned(),
            namespace: None,
        }
    }
}

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// The distinct subjects of every RoleBinding that grants one of the `include` ClusterRoles,
/// sorted. Bindings to namespaced Roles or to roles outside the RBAC group are ignored.
pub fn filter_subjects_by_cluster_role(include: &[RoleName], role_bindings: &[Value]) -> Vec<Subject> {
    let mut subjects = role_bindings
        .iter()
        .filter(|rb| {
            str_value(rb, "/roleRef/apiGroup") == Some(RBAC_API_GROUP)
                && str_value(rb, "/roleRef/kind") == Some(ClusterRole.kind)
                && str_value(rb, "/roleRef/name")
                    .map(|name| include.iter().any(|role| role.as_str() == name))
                    .unwrap_or(false)
        })
        .filter_map(|rb| rb.get("subjects").cloned())
        .filter_map(|subjects| serde_json::from_value::<Vec<Subject>>(subjects).ok())
        .flatten()
        .collect::<Vec<_>>();
    subjects.sort();
    subjects.dedup();
    subjects
}

pub fn cluster_role_binding_name(space: &Space, role: RoleName) -> String {
    format!("kf-{}-{}", namespace_name(space), role)
}

/// Grants the subjects the cluster scoped part of `role` for this Space. Subjects are
/// deduplicated and sorted so the binding is stable across reconciles.
pub fn make_cluster_role_binding(space: &Space, role: RoleName, subjects: &[Subject]) -> Value {
    let mut subjects = subjects.to_vec();
    subjects.sort();
    subjects.dedup();
    json!({
        "apiVersion": ClusterRoleBinding.api_version,
        "kind": ClusterRoleBinding.kind,
        "metadata": {
            "name": cluster_role_binding_name(space, role),
            "labels": space_labels(space),
            "ownerReferences": owned_by(space),
        },
        "roleRef": {
            "apiGroup": RBAC_API_GROUP,
            "kind": ClusterRole.kind,
            "name": role.as_str(),
        },
        "subjects": subjects,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::apis::PERMIT_ALL_NETWORK_POLICY;

    fn space() -> Space {
        let mut space = Space::new("some-space");
        space.metadata.uid = Some("space-uid".to_owned());
        space
            .metadata
            .labels
            .insert("team".to_owned(), "payments".to_owned());
        space.status.build_config.service_account = "build-creds".to_owned();
        space
    }

    fn secret(name: &str, data: Value) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {"name": name, "namespace": "kf"},
            "data": data,
        })
    }

    #[test]
    fn namespace_is_owned_by_space() {
        let ns = make_namespace(&space());
        assert_eq!("some-space", ns["metadata"]["name"]);
        assert_eq!("kf", ns["metadata"]["labels"][MANAGED_BY_LABEL]);
        assert_eq!("payments", ns["metadata"]["labels"]["team"]);
        assert_eq!("Space", ns["metadata"]["ownerReferences"][0]["kind"]);
        assert_eq!("space-uid", ns["metadata"]["ownerReferences"][0]["uid"]);
    }

    #[test]
    fn developer_role_extends_auditor_role() {
        let auditor = make_auditor_role(&space());
        let developer = make_developer_role(&space());
        assert_eq!("space-auditor", auditor["metadata"]["name"]);
        assert_eq!("space-developer", developer["metadata"]["name"]);
        assert_eq!("some-space", developer["metadata"]["namespace"]);

        let auditor_rules = auditor["rules"].as_array().unwrap();
        let developer_rules = developer["rules"].as_array().unwrap();
        assert_eq!(auditor_rules[..], developer_rules[..auditor_rules.len()]);
        for rule in auditor_rules {
            assert_eq!(json!(["get", "list", "watch"]), rule["verbs"]);
        }

        let secrets = developer_rules
            .iter()
            .find(|r| r["resources"] == json!(["secrets"]))
            .unwrap();
        assert_eq!(
            json!(["get", "list", "watch", "create", "update", "patch", "delete"]),
            secrets["verbs"]
        );
    }

    #[test]
    fn build_service_account_without_gsa() {
        let (sa, secrets) = make_build_service_account(
            &space(),
            &[
                secret("gcr-key", json!({"key-1": "dmFsdWUtMQ=="})),
                secret("ar-key", json!({"key-3": "dmFsdWUtMw=="})),
            ],
            "",
            "ContainerRegistry",
        );

        assert_eq!("build-creds", sa["metadata"]["name"]);
        assert_eq!("some-space", sa["metadata"]["namespace"]);
        assert_eq!("kf", sa["metadata"]["labels"][MANAGED_BY_LABEL]);
        assert_eq!(None, sa["metadata"].get("annotations"));
        assert_eq!(
            json!([{"name": "kf-registry-gcr-key"}, {"name": "kf-registry-ar-key"}]),
            sa["secrets"]
        );
        assert_eq!(sa["secrets"], sa["imagePullSecrets"]);

        assert_eq!(2, secrets.len());
        assert_eq!("kf-registry-gcr-key", secrets[0]["metadata"]["name"]);
        assert_eq!("some-space", secrets[0]["metadata"]["namespace"]);
        assert_eq!("kubernetes.io/dockerconfigjson", secrets[0]["type"]);
        assert_eq!("dmFsdWUtMQ==", secrets[0]["data"]["key-1"]);
        assert_eq!(
            "ContainerRegistry",
            secrets[0]["metadata"]["annotations"]["tekton.dev/docker-0"]
        );
        assert_eq!(
            "ContainerRegistry",
            secrets[1]["metadata"]["annotations"]["tekton.dev/docker-1"]
        );
    }

    #[test]
    fn build_service_account_with_gsa() {
        let (sa, secrets) = make_build_service_account(&space(), &[], "some-gsa", "");
        assert_eq!(
            "some-gsa",
            sa["metadata"]["annotations"][GCP_SERVICE_ACCOUNT_ANNOTATION]
        );
        assert_eq!(json!([]), sa["secrets"]);
        assert!(secrets.is_empty());
    }

    #[test]
    fn network_policies_follow_space_settings() {
        let mut space = space();
        space.spec.network_config.app_network_policy =
            NetworkPolicyConfig::new(DENY_ALL_NETWORK_POLICY, PERMIT_ALL_NETWORK_POLICY);

        let policies = make_network_policies(&space);
        assert_eq!(2, policies.len());

        let app = &policies[0];
        assert_eq!("kf-app-network-policy", app["metadata"]["name"]);
        assert_eq!(
            json!({"kf.dev/networkpolicy": "app"}),
            app["spec"]["podSelector"]["matchLabels"]
        );
        assert_eq!(json!([]), app["spec"]["ingress"]);
        assert_eq!(json!([{}]), app["spec"]["egress"]);

        let build = &policies[1];
        assert_eq!("build", build["spec"]["podSelector"]["matchLabels"][NETWORK_POLICY_LABEL]);
        assert_eq!(json!([{}]), build["spec"]["ingress"]);
        assert_eq!(json!([{}]), build["spec"]["egress"]);
    }

    #[test]
    fn iam_policy_binds_build_account() {
        let policy = make_iam_policy(&space(), "kf-builds", "my-project").unwrap();
        assert_eq!(Some("IAMPolicy"), policy.get_kind());
        assert_eq!(Some("iam.cnrm.cloud.google.com/v1beta1"), policy.get_api_version());
        assert_eq!(Some("some-space"), policy.get_name());
        assert_eq!("kf-builds", policy["spec"]["resourceRef"]["name"]);
        assert_eq!(
            json!([{
                "role": "roles/iam.workloadIdentityUser",
                "members": ["serviceAccount:my-project.svc.id.goog[some-space/build-creds]"]
            }]),
            policy["spec"]["bindings"]
        );
    }

    fn role_binding(role: RoleName, subjects: Vec<Subject>) -> Value {
        json!({
            "roleRef": {"apiGroup": RBAC_API_GROUP, "kind": "ClusterRole", "name": role.as_str()},
            "subjects": subjects,
        })
    }

    #[test]
    fn subjects_filtered_by_cluster_role() {
        let user = Subject::new("User", "manager@example.com");
        let group = Subject::new("Group", "developer-group@example.com");
        let mut ksa = Subject::new("ServiceAccount", "auditor.test");
        ksa.namespace = Some("test".to_owned());

        let bindings = vec![
            role_binding(RoleName::SpaceManager, vec![user.clone()]),
            role_binding(RoleName::SpaceDeveloper, vec![user.clone(), group.clone()]),
            role_binding(RoleName::SpaceAuditor, vec![ksa.clone(), user.clone(), group.clone()]),
        ];

        assert!(filter_subjects_by_cluster_role(&[], &bindings).is_empty());
        assert_eq!(
            vec![user.clone()],
            filter_subjects_by_cluster_role(&[RoleName::SpaceManager], &bindings[..1])
        );
        assert_eq!(
            vec![group.clone(), ksa.clone(), user.clone()],
            filter_subjects_by_cluster_role(
                &[RoleName::SpaceManager, RoleName::SpaceAuditor, RoleName::SpaceDeveloper],
                &bindings
            )
        );

        let mut namespaced = role_binding(RoleName::SpaceManager, vec![user.clone()]);
        namespaced["roleRef"]["kind"] = json!("Role");
        let mut other_group = role_binding(RoleName::SpaceManager, vec![user]);
        other_group["roleRef"]["apiGroup"] = json!("kf.dev");
        assert!(
            filter_subjects_by_cluster_role(&[RoleName::SpaceManager], &[namespaced, other_group])
                .is_empty()
        );
    }

    #[test]
    fn cluster_role_binding_dedupes_subjects() {
        let subjects = vec![
            Subject::new("User", "someone@example.com"),
            Subject::new("Group", "group@example.com"),
            Subject::new("User", "someone@example.com"),
        ];
        let binding = make_cluster_role_binding(&space(), RoleName::SpaceManager, &subjects);
        assert_eq!("kf-some-space-space-manager", binding["metadata"]["name"]);
        assert_eq!("space-manager", binding["roleRef"]["name"]);
        assert_eq!(
            json!([
                {"kind": "Group", "name": "group@example.com"},
                {"kind": "User", "name": "someone@example.com"}
            ]),
            binding["subjects"]
        );
    }
}
