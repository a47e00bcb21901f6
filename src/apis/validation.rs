//! Field level validation of the kf resources. Validators never stop at the first problem,
//! they collect everything wrong with an object into one `FieldError` whose paths point at
//! the offending fields, like `spec.instances.replicas`.
use super::{
    App, AppSpecAutoscaling, AppSpecInstances, Build, BuildSpec, NetworkPolicyConfig,
    OsbInstance, Route, RouteSpecFields, ServiceInstance, ServiceType, Space, SpaceDomain,
    BUILTIN_TASK_KIND, DENY_ALL_NETWORK_POLICY, KANIKO_BUILD_TASK, PERMIT_ALL_NETWORK_POLICY,
    SOURCE_IMAGE_PARAM, TASK_KIND,
};
use crate::client::compare::symmetric_diff;
use crate::config::FeatureFlags;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display};

pub const DISABLE_CUSTOM_BUILDS_FLAG: &str = "disable_custom_builds";
pub const ENABLE_DOCKERFILE_BUILDS_FLAG: &str = "enable_dockerfile_builds";

const RESERVED_SPACE_NAMES: &[&str] = &["kf", "default"];
const GATEWAY_NAMESPACE: &str = "kf";
const DNS1123_LABEL_MAX_LENGTH: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq)]
struct ErrorEntry {
    message: String,
    paths: Vec<String>,
    details: String,
}

/// One or more problems with an object. An empty `FieldError` means the object is valid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldError {
    errors: Vec<ErrorEntry>,
}

impl FieldError {
    pub fn new(message: impl Into<String>, paths: &[&str], details: impl Into<String>) -> FieldError {
        FieldError {
            errors: vec![ErrorEntry {
                message: message.into(),
                paths: paths.iter().map(|p| p.to_string()).collect(),
                details: details.into(),
            }],
        }
    }

    pub fn missing_field(paths: &[&str]) -> FieldError {
        FieldError::new("missing field(s)", paths, "")
    }

    pub fn invalid_value(value: impl Display, path: &str) -> FieldError {
        FieldError::new(format!("invalid value: {}", value), &[path], "")
    }

    pub fn invalid_array_value(value: impl Display, field: &str, index: usize) -> FieldError {
        FieldError::invalid_value(value, "").via_field_index(field, index)
    }

    pub fn invalid_enum_value(value: impl Display, path: &str, acceptable: &[&str]) -> FieldError {
        FieldError::new(
            format!("invalid value: {}", value),
            &[path],
            format!("value must be one of: {}", acceptable.join(", ")),
        )
    }

    pub fn missing_one_of(paths: &[&str]) -> FieldError {
        FieldError::new("expected exactly one, got neither", paths, "")
    }

    pub fn multiple_one_of(paths: &[&str]) -> FieldError {
        FieldError::new("expected exactly one, got both", paths, "")
    }

    pub fn disallowed(paths: &[&str]) -> FieldError {
        FieldError::new("must not set the field(s)", paths, "")
    }

    pub fn out_of_bounds(value: i64, lower: i64, upper: i64, path: &str) -> FieldError {
        FieldError::new(
            format!("expected {} <= {} <= {}", lower, value, upper),
            &[path],
            "",
        )
    }

    pub fn generic(message: impl Into<String>, paths: &[&str]) -> FieldError {
        FieldError::new(message, paths, "")
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Combines the errors of both
    pub fn also(mut self, other: FieldError) -> FieldError {
        self.errors.extend(other.errors);
        self
    }

    /// Nests every path under `prefix`
    pub fn via_field(mut self, prefix: &str) -> FieldError {
        for entry in self.errors.iter_mut() {
            for path in entry.paths.iter_mut() {
                *path = if path.is_empty() {
                    prefix.to_owned()
                } else if path.starts_with('[') {
                    format!("{}{}", prefix, path)
                } else {
                    format!("{}.{}", prefix, path)
                };
            }
        }
        self
    }

    pub fn via_index(self, index: usize) -> FieldError {
        self.via_field(&format!("[{}]", index))
    }

    pub fn via_field_index(self, field: &str, index: usize) -> FieldError {
        self.via_index(index).via_field(field)
    }

    pub fn into_result(self) -> Result<(), FieldError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Entries with the same message and details are merged, with their paths sorted
    fn merged(&self) -> Vec<ErrorEntry> {
        let mut grouped: BTreeMap<(String, String), BTreeSet<String>> = BTreeMap::new();
        for entry in self.errors.iter() {
            grouped
                .entry((entry.message.clone(), entry.details.clone()))
                .or_default()
                .extend(entry.paths.iter().cloned());
        }
        grouped
            .into_iter()
            .map(|((message, details), paths)| ErrorEntry {
                message,
                paths: paths.into_iter().collect(),
                details,
            })
            .collect()
    }
}

impl Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut lines = self
            .merged()
            .into_iter()
            .map(|e| {
                let mut line = if e.paths.is_empty() {
                    e.message
                } else {
                    format!("{}: {}", e.message, e.paths.join(", "))
                };
                if !e.details.is_empty() {
                    line.push('\n');
                    line.push_str(e.details.as_str());
                }
                line
            })
            .collect::<Vec<_>>();
        lines.sort();
        f.write_str(lines.join("\n").as_str())
    }
}

impl std::error::Error for FieldError {}

lazy_static! {
    static ref DNS1123_LABEL: Regex = Regex::new("^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap();
}

/// The problems that keep `value` from being a DNS-1123 label
pub fn dns1123_label_errors(value: &str) -> Vec<String> {
    let mut errs = Vec::new();
    if value.len() > DNS1123_LABEL_MAX_LENGTH {
        errs.push(format!(
            "must be no more than {} characters",
            DNS1123_LABEL_MAX_LENGTH
        ));
    }
    if !DNS1123_LABEL.is_match(value) {
        errs.push(
            "a DNS-1123 label must consist of lower case alphanumeric characters or '-', and must start and end with an alphanumeric character"
                .to_owned(),
        );
    }
    errs
}

pub fn validate_app(app: &App) -> FieldError {
    let spec = &app.spec;
    let mut errs = validate_pod_spec(&spec.template.spec).via_field("template.spec");
    errs = errs.also(validate_instances(&spec.instances).via_field("instances"));
    for (i, binding) in spec.routes.iter().enumerate() {
        errs = errs.also(validate_hostname(&binding.route).via_field_index("routes", i));
    }
    errs.via_field("spec")
}

/// Checks that the update request counters of an App never go backwards
pub fn validate_app_update(app: &App, old: &App) -> FieldError {
    validate_app(app)
        .also(validate_update_requests(
            old.spec.build.update_requests,
            app.spec.build.update_requests,
        )
        .via_field("spec.build"))
        .also(validate_update_requests(
            old.spec.template.update_requests,
            app.spec.template.update_requests,
        )
        .via_field("spec.template"))
}

fn validate_update_requests(previous: i64, new: i64) -> FieldError {
    if previous > new {
        FieldError::generic(
            format!(
                "UpdateRequests must be nondecreasing, previous value: {} new value: {}",
                previous, new
            ),
            &["UpdateRequests"],
        )
    } else {
        FieldError::default()
    }
}

pub fn validate_pod_spec(pod_spec: &Value) -> FieldError {
    let containers = pod_spec
        .get("containers")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    match containers {
        [] => FieldError::missing_field(&["containers"]),
        [container] => {
            let has_image = container
                .get("image")
                .and_then(Value::as_str)
                .map(|image| !image.is_empty())
                .unwrap_or(false);
            if has_image {
                FieldError::disallowed(&["image"])
            } else {
                FieldError::default()
            }
        }
        _ => FieldError::multiple_one_of(&["containers"]),
    }
}

pub fn validate_instances(instances: &AppSpecInstances) -> FieldError {
    let mut errs = FieldError::default();
    if let Some(replicas) = instances.replicas {
        if replicas < 0 {
            errs = errs.also(FieldError::invalid_value(replicas, "replicas"));
        }
    }
    errs.also(validate_autoscaling(&instances.autoscaling).via_field("autoscaling"))
}

fn validate_autoscaling(autoscaling: &AppSpecAutoscaling) -> FieldError {
    let mut errs = FieldError::default();
    if let Some(min) = autoscaling.min_replicas.filter(|min| *min < 0) {
        errs = errs.also(FieldError::invalid_value(min, "minReplicas"));
    }
    if let Some(max) = autoscaling.max_replicas.filter(|max| *max < 0) {
        errs = errs.also(FieldError::invalid_value(max, "maxReplicas"));
    }
    if let (Some(min), Some(max)) = (autoscaling.min_replicas, autoscaling.max_replicas) {
        if min > max {
            errs = errs.also(FieldError::generic(
                "max must be >= min",
                &["minReplicas", "maxReplicas"],
            ));
        }
    }
    errs
}

fn validate_hostname(route: &RouteSpecFields) -> FieldError {
    if route.hostname == "www" {
        FieldError::invalid_value(route.hostname.as_str(), "hostname")
    } else {
        FieldError::default()
    }
}

pub fn validate_route_spec_fields(route: &RouteSpecFields) -> FieldError {
    let mut errs = FieldError::default();
    if route.domain.is_empty() {
        errs = errs.also(FieldError::missing_field(&["domain"]));
    }
    errs.also(validate_hostname(route))
}

pub fn validate_route(route: &Route) -> FieldError {
    let mut errs = FieldError::default();
    if route.metadata.name.is_empty() {
        errs = errs.also(FieldError::missing_field(&["name"]));
    }
    errs.also(validate_route_spec_fields(&route.spec.fields).via_field("spec"))
}

impl Space {
    /// Fills in the values a Space gets when they aren't set
    pub fn set_defaults(&mut self) {
        let network = &mut self.spec.network_config;
        for policy in vec![&mut network.app_network_policy, &mut network.build_network_policy] {
            if policy.ingress.is_empty() {
                policy.ingress = PERMIT_ALL_NETWORK_POLICY.to_owned();
            }
            if policy.egress.is_empty() {
                policy.egress = PERMIT_ALL_NETWORK_POLICY.to_owned();
            }
        }
    }
}

pub fn validate_space(space: &Space) -> FieldError {
    let mut errs = FieldError::default();
    if RESERVED_SPACE_NAMES.contains(&space.metadata.name.as_str()) {
        errs = errs.also(FieldError::invalid_value(space.metadata.name.as_str(), "name"));
    }

    let spec = &space.spec;
    let mut build = FieldError::default();
    if spec.build_config.container_registry.is_empty() {
        build = build.also(FieldError::missing_field(&["containerRegistry"]));
    }
    if spec.build_config.service_account.is_empty() {
        build = build.also(FieldError::missing_field(&["serviceAccount"]));
    }

    let network = &spec.network_config;
    let mut network_errs = FieldError::default();
    let mut seen = BTreeSet::new();
    for (i, domain) in network.domains.iter().enumerate() {
        if !seen.insert(domain.domain.as_str()) {
            network_errs = network_errs.also(
                FieldError::generic(format!("duplicate value: {}", domain.domain), &["domain"])
                    .via_field_index("domains", i),
            );
        }
        network_errs = network_errs.also(validate_gateway(domain).via_field_index("domains", i));
    }
    network_errs = network_errs
        .also(validate_network_policy(&network.app_network_policy).via_field("appNetworkPolicy"))
        .also(
            validate_network_policy(&network.build_network_policy)
                .via_field("buildNetworkPolicy"),
        );

    errs.also(
        build
            .via_field("buildConfig")
            .also(network_errs.via_field("networkConfig"))
            .via_field("spec"),
    )
}

fn gateway_error(message: &str, details: &str) -> FieldError {
    FieldError::new(message, &["gatewayName"], details)
}

fn validate_gateway(domain: &SpaceDomain) -> FieldError {
    if domain.gateway_name.is_empty() {
        return FieldError::missing_field(&["gatewayName"]);
    }
    let (namespace, name) = match domain.gateway_name.find('/') {
        Some(i) => (&domain.gateway_name[..i], &domain.gateway_name[i + 1..]),
        None => return gateway_error("Invalid gatewayName", "Namespace prefix is missing"),
    };

    let mut errs = FieldError::default();
    if namespace.is_empty() {
        errs = errs.also(gateway_error("Invalid gatewayName", "Gateway Namespace was missing"));
    } else {
        for msg in dns1123_label_errors(namespace) {
            errs = errs.also(gateway_error("Invalid namespace for gatewayName", &msg));
        }
        if namespace != GATEWAY_NAMESPACE {
            errs = errs.also(gateway_error(
                "Invalid namespace for gatewayName",
                "Only the kf namespace is allowed",
            ));
        }
    }

    if name.is_empty() {
        errs = errs.also(gateway_error("Invalid gatewayName", "Gateway name was missing"));
    } else {
        for msg in dns1123_label_errors(name) {
            errs = errs.also(gateway_error("Invalid name for gatewayName", &msg));
        }
    }
    errs
}

fn validate_network_policy(policy: &NetworkPolicyConfig) -> FieldError {
    let valid = [DENY_ALL_NETWORK_POLICY, PERMIT_ALL_NETWORK_POLICY];
    let mut errs = FieldError::default();
    if !valid.contains(&policy.ingress.as_str()) {
        errs = errs.also(FieldError::invalid_enum_value(&policy.ingress, "ingress", &valid));
    }
    if !valid.contains(&policy.egress.as_str()) {
        errs = errs.also(FieldError::invalid_enum_value(&policy.egress, "egress", &valid));
    }
    errs
}

pub fn validate_service_instance(instance: &ServiceInstance) -> FieldError {
    let spec = &instance.spec;
    let mut errs = validate_service_type(&spec.service_type);
    if spec.parameters_from.name.is_empty() {
        errs = errs.also(FieldError::missing_field(&["parametersFrom.name"]));
    }
    errs.via_field("spec")
}

/// Brokered instances can't change once provisioned, apart from requesting deletion
pub fn validate_service_instance_update(
    instance: &ServiceInstance,
    old: &ServiceInstance,
) -> FieldError {
    if instance.broker_ref().is_none() {
        return validate_service_instance(instance);
    }

    let mut new_spec = instance.spec.clone();
    new_spec.delete_requests = old.spec.delete_requests;
    let (old_value, new_value) = match (
        serde_json::to_value(&old.spec),
        serde_json::to_value(&new_spec),
    ) {
        (Ok(old_value), Ok(new_value)) => (old_value, new_value),
        (Err(e), _) | (_, Err(e)) => {
            return FieldError::new("Failed to diff", &["spec"], e.to_string());
        }
    };
    let diffs = symmetric_diff(&old_value, &new_value);
    if diffs.is_empty() {
        FieldError::default()
    } else {
        FieldError::new(
            "Immutable fields changed (-old +new)",
            &["spec"],
            diffs.to_string(),
        )
    }
}

fn validate_service_type(service_type: &ServiceType) -> FieldError {
    let mut defined = Vec::new();
    let mut errs = FieldError::default();

    if service_type.user_provided.is_some() {
        defined.push("userProvided");
    }
    if let Some(brokered) = service_type.brokered.as_ref() {
        defined.push("brokered");
        if brokered.class_name.is_empty() {
            errs = errs.also(FieldError::missing_field(&["class"]).via_field("brokered"));
        }
        if brokered.plan_name.is_empty() {
            errs = errs.also(FieldError::missing_field(&["plan"]).via_field("brokered"));
        }
    }
    if let Some(osb) = service_type.osb.as_ref() {
        defined.push("osb");
        errs = errs.also(validate_osb_instance(osb).via_field("osb"));
    }
    if let Some(volume) = service_type.volume.as_ref() {
        defined.push("volume");
        errs = errs.also(validate_osb_instance(volume).via_field("volume"));
    }

    match defined.len() {
        0 => FieldError::missing_one_of(&["brokered", "osb", "userProvided", "volume"]),
        1 => errs,
        _ => {
            defined.sort();
            FieldError::multiple_one_of(&defined)
        }
    }
}

fn validate_osb_instance(instance: &OsbInstance) -> FieldError {
    let mut errs = FieldError::default();
    for (name, value) in vec![
        ("brokerName", &instance.broker_name),
        ("classUID", &instance.class_uid),
        ("className", &instance.class_name),
        ("planUID", &instance.plan_uid),
        ("planName", &instance.plan_name),
    ] {
        if value.is_empty() {
            errs = errs.also(FieldError::missing_field(&[name]));
        }
    }
    if instance.progress_deadline_seconds < 0 {
        errs = errs.also(FieldError::out_of_bounds(
            instance.progress_deadline_seconds,
            1,
            i64::MAX,
            "progressDeadlineSeconds",
        ));
    }
    errs
}

/// Validates a Build. The feature flags restrict which kinds of builds may be created, and
/// only apply when `is_create` is set, so existing builds stay valid when flags change.
pub fn validate_build(build: &Build, flags: &FeatureFlags, is_create: bool) -> FieldError {
    validate_build_spec(&build.spec, flags, is_create).via_field("spec")
}

pub fn validate_build_spec(spec: &BuildSpec, flags: &FeatureFlags, is_create: bool) -> FieldError {
    let mut errs = FieldError::default();
    if spec.name.is_empty() {
        errs = errs.also(FieldError::missing_field(&["name"]));
    }

    if !spec.source_package.name.is_empty() {
        if let Some((i, param)) = spec
            .params
            .iter()
            .enumerate()
            .find(|(_, p)| p.name == SOURCE_IMAGE_PARAM)
        {
            errs = errs.also(FieldError::invalid_array_value(param.value.as_str(), "params", i));
        }
    }

    let valid_kinds = [BUILTIN_TASK_KIND, TASK_KIND];
    if !valid_kinds.contains(&spec.kind.as_str()) {
        errs = errs.also(FieldError::invalid_enum_value(&spec.kind, "kind", &valid_kinds));
    }

    if is_create && flags.is_enabled(DISABLE_CUSTOM_BUILDS_FLAG) && !spec.is_builtin() {
        errs = errs.also(FieldError::generic(
            format!(
                "Custom Builds are disabled, kind must be {:?} but was {:?}",
                BUILTIN_TASK_KIND, spec.kind
            ),
            &["kind"],
        ));
    } else if flags.is_disabled(ENABLE_DOCKERFILE_BUILDS_FLAG)
        && spec.is_builtin()
        && spec.name == KANIKO_BUILD_TASK
    {
        errs = errs.also(FieldError::generic(
            format!(
                "Dockerfile Builds are disabled, but BuildTaskRef name was {:?}",
                KANIKO_BUILD_TASK
            ),
            &["name"],
        ));
    }
    errs
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::apis::{BrokeredInstance, BuildParam, LocalObjectReference, RouteWeightBinding};
    use serde_json::json;

    fn valid_app() -> App {
        let mut app = App::new("dev", "my-app");
        app.spec.template.spec = json!({"containers": [{"name": "user-container"}]});
        app
    }

    fn valid_space() -> Space {
        let mut space = Space::new("dev");
        space.spec.build_config.container_registry = "gcr.io/proj".to_owned();
        space.spec.build_config.service_account = "kf-builder".to_owned();
        space.set_defaults();
        space
    }

    #[test]
    fn via_field_nests_paths() {
        let err = FieldError::missing_field(&["a", ""])
            .also(FieldError::invalid_value(1, "[2]"))
            .via_field("spec");
        assert_eq!(
            "invalid value: 1: spec[2]\nmissing field(s): spec, spec.a",
            err.to_string()
        );
        let indexed = FieldError::missing_field(&["name"]).via_field_index("routes", 3);
        assert_eq!("missing field(s): routes[3].name", indexed.to_string());
    }

    #[test]
    fn display_merges_entries_and_shows_details() {
        let err = FieldError::missing_field(&["b"])
            .also(FieldError::missing_field(&["a"]))
            .also(FieldError::invalid_enum_value("Sometimes", "ingress", &["DenyAll", "PermitAll"]));
        assert_eq!(
            "invalid value: Sometimes: ingress\nvalue must be one of: DenyAll, PermitAll\nmissing field(s): a, b",
            err.to_string()
        );
        assert!(FieldError::default().into_result().is_ok());
        assert!(err.into_result().is_err());
    }

    #[test]
    fn valid_app_passes() {
        assert!(validate_app(&valid_app()).is_empty());
    }

    #[test]
    fn app_container_rules() {
        let mut app = valid_app();
        app.spec.template.spec = json!({});
        assert_eq!(
            "missing field(s): spec.template.spec.containers",
            validate_app(&app).to_string()
        );

        app.spec.template.spec = json!({"containers": [{}, {}]});
        assert_eq!(
            "expected exactly one, got both: spec.template.spec.containers",
            validate_app(&app).to_string()
        );

        app.spec.template.spec = json!({"containers": [{"image": "nginx"}]});
        assert_eq!(
            "must not set the field(s): spec.template.spec.image",
            validate_app(&app).to_string()
        );
    }

    #[test]
    fn app_instance_rules() {
        let mut app = valid_app();
        app.spec.instances.replicas = Some(-1);
        app.spec.instances.autoscaling.min_replicas = Some(5);
        app.spec.instances.autoscaling.max_replicas = Some(2);
        assert_eq!(
            "invalid value: -1: spec.instances.replicas\nmax must be >= min: spec.instances.autoscaling.maxReplicas, spec.instances.autoscaling.minReplicas",
            validate_app(&app).to_string()
        );

        app.spec.instances.replicas = Some(1);
        app.spec.instances.autoscaling.min_replicas = Some(-3);
        assert_eq!(
            "invalid value: -3: spec.instances.autoscaling.minReplicas",
            validate_app(&app).to_string()
        );
    }

    #[test]
    fn app_routes_reject_www() {
        let mut app = valid_app();
        app.spec.routes = vec![
            RouteWeightBinding::new(RouteSpecFields::new("ok", "example.com", "")),
            RouteWeightBinding::new(RouteSpecFields::new("www", "example.com", "")),
        ];
        assert_eq!(
            "invalid value: www: spec.routes[1].hostname",
            validate_app(&app).to_string()
        );
    }

    #[test]
    fn update_requests_must_not_decrease() {
        let mut old = valid_app();
        old.spec.template.update_requests = 4;
        let mut app = old.clone();
        app.spec.template.update_requests = 3;
        assert_eq!(
            "UpdateRequests must be nondecreasing, previous value: 4 new value: 3: spec.template.UpdateRequests",
            validate_app_update(&app, &old).to_string()
        );
        app.spec.template.update_requests = 5;
        assert!(validate_app_update(&app, &old).is_empty());
    }

    #[test]
    fn route_requires_domain() {
        let mut route = Route::default();
        route.metadata.name = "r".to_owned();
        route.spec.fields = RouteSpecFields::new("www", "", "");
        assert_eq!(
            "invalid value: www: spec.hostname\nmissing field(s): spec.domain",
            validate_route(&route).to_string()
        );
    }

    #[test]
    fn valid_space_passes() {
        assert!(validate_space(&valid_space()).is_empty());
    }

    #[test]
    fn reserved_space_names() {
        for name in vec!["kf", "default"] {
            let mut space = valid_space();
            space.metadata.name = name.to_owned();
            assert_eq!(
                format!("invalid value: {}: name", name),
                validate_space(&space).to_string()
            );
        }
    }

    #[test]
    fn space_build_config_is_required() {
        let mut space = Space::new("dev");
        space.set_defaults();
        assert_eq!(
            "missing field(s): spec.buildConfig.containerRegistry, spec.buildConfig.serviceAccount",
            validate_space(&space).to_string()
        );
    }

    #[test]
    fn space_domains_must_be_unique_with_valid_gateways() {
        let mut space = valid_space();
        let domain = |d: &str, gw: &str| SpaceDomain {
            domain: d.to_owned(),
            gateway_name: gw.to_owned(),
        };
        space.spec.network_config.domains = vec![
            domain("example.com", "kf/external-gateway"),
            domain("example.com", "kf/external-gateway"),
            domain("other.com", "external-gateway"),
            domain("third.com", ""),
            domain("fourth.com", "istio-system/gw"),
            domain("fifth.com", "kf/"),
        ];
        assert_eq!(
            vec![
                "Invalid gatewayName: spec.networkConfig.domains[2].gatewayName",
                "Namespace prefix is missing",
                "Invalid gatewayName: spec.networkConfig.domains[5].gatewayName",
                "Gateway name was missing",
                "Invalid namespace for gatewayName: spec.networkConfig.domains[4].gatewayName",
                "Only the kf namespace is allowed",
                "duplicate value: example.com: spec.networkConfig.domains[1].domain",
                "missing field(s): spec.networkConfig.domains[3].gatewayName",
            ]
            .join("\n"),
            validate_space(&space).to_string()
        );
    }

    #[test]
    fn space_network_policies_must_be_known() {
        let mut space = valid_space();
        space.spec.network_config.app_network_policy.ingress = "Sometimes".to_owned();
        assert_eq!(
            "invalid value: Sometimes: spec.networkConfig.appNetworkPolicy.ingress\nvalue must be one of: DenyAll, PermitAll",
            validate_space(&space).to_string()
        );
    }

    fn brokered_instance() -> ServiceInstance {
        let mut instance = ServiceInstance::default();
        instance.metadata.name = "db".to_owned();
        instance.spec.parameters_from = LocalObjectReference::new("db-params");
        instance.spec.service_type.brokered = Some(BrokeredInstance {
            broker: "b".to_owned(),
            class_name: "mysql".to_owned(),
            plan_name: "small".to_owned(),
            namespaced: false,
        });
        instance
    }

    #[test]
    fn service_instance_needs_exactly_one_type() {
        let mut instance = brokered_instance();
        assert!(validate_service_instance(&instance).is_empty());

        instance.spec.service_type.osb = Some(OsbInstance::default());
        assert_eq!(
            "expected exactly one, got both: spec.brokered, spec.osb",
            validate_service_instance(&instance).to_string()
        );

        instance.spec.service_type = ServiceType::default();
        assert_eq!(
            "expected exactly one, got neither: spec.brokered, spec.osb, spec.userProvided, spec.volume",
            validate_service_instance(&instance).to_string()
        );
    }

    #[test]
    fn osb_instances_need_catalog_fields() {
        let mut instance = brokered_instance();
        instance.spec.service_type.brokered = None;
        instance.spec.service_type.osb = Some(OsbInstance {
            broker_name: "b".to_owned(),
            class_name: "c".to_owned(),
            plan_name: "p".to_owned(),
            progress_deadline_seconds: -1,
            ..Default::default()
        });
        instance.spec.parameters_from.name.clear();
        assert_eq!(
            vec![
                format!("expected 1 <= -1 <= {}: spec.osb.progressDeadlineSeconds", i64::MAX),
                "missing field(s): spec.osb.classUID, spec.osb.planUID, spec.parametersFrom.name"
                    .to_owned(),
            ]
            .join("\n"),
            validate_service_instance(&instance).to_string()
        );
    }

    #[test]
    fn brokered_instance_spec_is_immutable() {
        let old = brokered_instance();
        let mut updated = old.clone();
        updated.spec.delete_requests = 1;
        assert!(validate_service_instance_update(&updated, &old).is_empty());

        updated.spec.tags = vec!["new".to_owned()];
        assert_eq!(
            "Immutable fields changed (-old +new): spec\n.tags[0]: -null +\"new\"",
            validate_service_instance_update(&updated, &old).to_string()
        );
    }

    #[test]
    fn build_kind_and_params() {
        let mut spec = BuildSpec::builtin("buildpackv3", vec![BuildParam::new(SOURCE_IMAGE_PARAM, "img")]);
        spec.source_package = LocalObjectReference::new("pkg");
        spec.kind = "Pipeline".to_owned();
        assert_eq!(
            "invalid value: Pipeline: kind\nvalue must be one of: KfBuiltinTask, Task\ninvalid value: img: params[0]",
            validate_build_spec(&spec, &FeatureFlags::default(), true).to_string()
        );
    }

    #[test]
    fn build_feature_flags() {
        let mut flags = FeatureFlags::default();
        flags.set(DISABLE_CUSTOM_BUILDS_FLAG, true);
        let mut custom = BuildSpec::builtin("my-task", vec![]);
        custom.kind = TASK_KIND.to_owned();
        assert_eq!(
            "Custom Builds are disabled, kind must be \"KfBuiltinTask\" but was \"Task\": kind",
            validate_build_spec(&custom, &flags, true).to_string()
        );
        assert!(validate_build_spec(&custom, &flags, false).is_empty());

        let kaniko = BuildSpec::builtin(KANIKO_BUILD_TASK, vec![]);
        assert!(validate_build_spec(&kaniko, &flags, true).is_empty());
        flags.set(ENABLE_DOCKERFILE_BUILDS_FLAG, false);
        assert_eq!(
            "Dockerfile Builds are disabled, but BuildTaskRef name was \"kaniko\": name",
            validate_build_spec(&kaniko, &flags, true).to_string()
        );
    }
}
