use super::{build_volumes, fuse_start_script, owned_by, build_runtime_env_vars, EnvRuntime, Error};
use crate::apis::{
    union_maps, App, Labels, Space, APP_SERVER_COMPONENT, DEFAULT_USER_CONTAINER_NAME,
    NETWORK_POLICY_APP, NETWORK_POLICY_LABEL,
};
use crate::k8s_types::apps::v1::Deployment;

use serde_json::{json, Map, Value};

pub const USER_PORT_NAME: &str = "http-user-port";
pub const DEFAULT_REVISION_HISTORY_LIMIT: i32 = 10;
pub const APP_SCALER_COMPONENT: &str = "app-scaler";

/// Assumed when the user container doesn't set a command, which is the case for buildpack
/// images
const BUILDPACK_ENTRYPOINT: &str = "/lifecycle/entrypoint.bash";

const DEFAULT_MAX_SURGE: &str = "25%";
const DEFAULT_MAX_UNAVAILABLE: &str = "25%";

const PROBES: &[&str] = &["livenessProbe", "readinessProbe", "startupProbe"];

pub fn deployment_name(app: &App) -> String {
    app.metadata.name.clone()
}

/// Labels every pod of the App carries, also used as the Deployment and Service selectors
pub fn pod_labels(app: &App) -> Labels {
    app.component_labels(APP_SERVER_COMPONENT)
}

/// The App's own labels plus the kf labels for the given component
pub fn make_app_labels(app: &App, component: &str) -> Labels {
    union_maps(vec![&app.metadata.labels, &app.component_labels(component)])
}

pub fn build_container_ports(user_port: i32) -> Value {
    json!([{
        "name": USER_PORT_NAME,
        "containerPort": user_port,
        "protocol": "TCP",
    }])
}

fn pod_annotations(app: &App) -> Labels {
    let mut injected = Labels::new();
    injected.insert("sidecar.istio.io/inject".to_owned(), "true".to_owned());
    injected.insert(
        "traffic.sidecar.istio.io/includeOutboundIPRanges".to_owned(),
        "*".to_owned(),
    );
    injected.insert(
        "kubectl.kubernetes.io/default-container".to_owned(),
        DEFAULT_USER_CONTAINER_NAME.to_owned(),
    );
    union_maps(vec![&app.metadata.annotations, &injected])
}

/// Builds the Deployment that runs the App. Fails until the App has a built image, and for
/// Apps that aren't stopped but don't have an exact replica count.
pub fn make_deployment(app: &App, space: &Space) -> Result<Value, Error> {
    if app.status.image.is_empty() {
        return Err(Error::WaitingForImage);
    }
    let replicas = app.spec.instances.deployment_replicas()?;
    let pod_spec = make_pod_spec(app, space)?;

    let mut network_policy = Labels::new();
    network_policy.insert(
        NETWORK_POLICY_LABEL.to_owned(),
        NETWORK_POLICY_APP.to_owned(),
    );
    let template_labels = union_maps(vec![
        &app.metadata.labels,
        &pod_labels(app),
        &network_policy,
    ]);

    let mut deployment = json!({
        "apiVersion": Deployment.api_version,
        "kind": Deployment.kind,
        "metadata": {
            "name": deployment_name(app),
            "namespace": app.metadata.namespace(),
            "labels": make_app_labels(app, APP_SCALER_COMPONENT),
            "ownerReferences": owned_by(app),
        },
        "spec": {
            "replicas": replicas,
            "revisionHistoryLimit": DEFAULT_REVISION_HISTORY_LIMIT,
            "selector": {"matchLabels": pod_labels(app)},
            "template": {
                "metadata": {
                    "labels": template_labels,
                    "annotations": pod_annotations(app),
                },
                "spec": pod_spec,
            },
            "strategy": {
                "type": "RollingUpdate",
                "rollingUpdate": {
                    "maxUnavailable": DEFAULT_MAX_UNAVAILABLE,
                    "maxSurge": DEFAULT_MAX_SURGE,
                },
            },
        },
    });
    if let Some(deadline) = space.status.runtime_config.progress_deadline_seconds {
        deployment["spec"]["progressDeadlineSeconds"] = Value::from(deadline);
    }
    Ok(deployment)
}

fn string_array(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn is_empty_array(value: Option<&Value>) -> bool {
    value
        .and_then(Value::as_array)
        .map(Vec::is_empty)
        .unwrap_or(true)
}

fn rewrite_user_probe(probe: Option<&mut Value>, user_port: i32) {
    let probe = match probe.and_then(Value::as_object_mut) {
        Some(probe) => probe,
        None => return,
    };
    for handler in &["httpGet", "tcpSocket"] {
        if let Some(Value::Object(action)) = probe.get_mut(*handler) {
            action.insert("port".to_owned(), Value::from(user_port));
            return;
        }
    }
}

fn append_array(target: &mut Map<String, Value>, key: &str, items: Vec<Value>) {
    let entry = target
        .entry(key.to_owned())
        .or_insert_with(|| Value::Array(Vec::new()));
    match entry {
        Value::Array(existing) => existing.extend(items),
        other => *other = Value::Array(items),
    }
}

/// The pod spec for the App's pods: the App's template with kf's image, ports, env, probes
/// and volume mounts filled in on the first container.
pub fn make_pod_spec(app: &App, space: &Space) -> Result<Value, Error> {
    let mut spec = app
        .spec
        .template
        .spec
        .as_object()
        .cloned()
        .unwrap_or_default();

    // the old docker style service env vars would clash with the injected ones
    spec.insert("enableServiceLinks".to_owned(), Value::Bool(false));

    let mut containers = match spec.remove("containers") {
        Some(Value::Array(containers)) => containers,
        _ => Vec::new(),
    };
    if containers.is_empty() {
        containers.push(json!({}));
    }
    if !containers[0].is_object() {
        containers[0] = json!({});
    }

    let user_port = app.user_port();
    let mut container = match containers[0].take() {
        Value::Object(container) => container,
        _ => Map::new(),
    };

    container.insert("name".to_owned(), Value::from(DEFAULT_USER_CONTAINER_NAME));
    container.insert("image".to_owned(), Value::from(app.status.image.as_str()));
    if is_empty_array(container.get("ports")) {
        container.insert("ports".to_owned(), build_container_ports(user_port));
    }

    // space env comes first so the App can override it, and the injected vars come last so
    // nothing overrides them
    let mut env = space
        .status
        .runtime_config
        .env
        .iter()
        .map(|v| json!(v))
        .collect::<Vec<_>>();
    if let Some(Value::Array(user_env)) = container.remove("env") {
        env.extend(user_env);
    }
    env.extend(
        build_runtime_env_vars(EnvRuntime::Running, app)
            .iter()
            .map(|v| json!(v)),
    );
    // changes whenever a restart is requested, which rolls the pods
    env.push(json!({
        "name": format!("KF_UPDATE_REQUESTS_{}", app.metadata.uid.as_deref().unwrap_or_default()),
        "value": app.spec.template.update_requests.to_string(),
    }));
    container.insert("env".to_owned(), Value::Array(env));

    container.remove("stdin");
    container.remove("tty");
    container.insert("imagePullPolicy".to_owned(), Value::from("IfNotPresent"));
    container.insert(
        "terminationMessagePath".to_owned(),
        Value::from("/dev/termination-log"),
    );
    container.insert("terminationMessagePolicy".to_owned(), Value::from("File"));

    for probe in PROBES {
        rewrite_user_probe(container.get_mut(*probe), user_port);
    }

    spec.remove("serviceAccountName");
    spec.remove("serviceAccount");
    if !app.status.service_account_name.is_empty() {
        let name = Value::from(app.status.service_account_name.as_str());
        spec.insert("serviceAccountName".to_owned(), name.clone());
        spec.insert("serviceAccount".to_owned(), name);
    }

    let node_selector = make_node_selector(app, space);
    if node_selector.is_empty() {
        spec.remove("nodeSelector");
    } else {
        spec.insert("nodeSelector".to_owned(), json!(node_selector));
    }

    if !app.status.volumes.is_empty() {
        let composition = build_volumes(&app.status.volumes)?;
        // mapfs needs to be able to mount fuse filesystems
        container.insert("securityContext".to_owned(), json!({"privileged": true}));
        append_array(&mut spec, "volumes", composition.volumes);
        append_array(&mut container, "volumeMounts", composition.mounts);

        let mut original = string_array(container.get("command"));
        if original.is_empty() {
            original.push(BUILDPACK_ENTRYPOINT.to_owned());
        }
        original.extend(string_array(container.get("args")));

        container.insert("command".to_owned(), json!(["/bin/sh"]));
        container.insert(
            "args".to_owned(),
            json!(["-c", fuse_start_script(&composition.fuse_commands, &original)]),
        );
        container.insert(
            "lifecycle".to_owned(),
            json!({
                "preStop": {
                    "exec": {
                        "command": [
                            "timeout", "-k", "10s", "10s", "/bin/sh", "-c",
                            composition.unmount_commands.join(" "),
                        ]
                    }
                }
            }),
        );
    }

    containers[0] = Value::Object(container);
    spec.insert("containers".to_owned(), Value::Array(containers));

    spec.insert("restartPolicy".to_owned(), Value::from("Always"));
    match space.status.runtime_config.termination_grace_period_seconds {
        Some(seconds) => {
            spec.insert(
                "terminationGracePeriodSeconds".to_owned(),
                Value::from(seconds),
            );
        }
        None => {
            spec.remove("terminationGracePeriodSeconds");
        }
    }
    spec.insert("dnsPolicy".to_owned(), Value::from("ClusterFirst"));
    spec.insert("securityContext".to_owned(), json!({}));
    spec.insert("schedulerName".to_owned(), Value::from("default-scheduler"));

    Ok(Value::Object(spec))
}

/// The Space's node selector, overridden by the App's build node selector
pub fn make_node_selector(app: &App, space: &Space) -> Labels {
    let empty = Labels::new();
    let from_app = app
        .spec
        .build
        .spec
        .as_ref()
        .map(|b| &b.node_selector)
        .unwrap_or(&empty);
    union_maps(vec![&space.status.runtime_config.node_selector, from_app])
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::apis::{AppVolumeStatus, BuildSpec, EnvVar};

    fn running_app() -> App {
        let mut app = App::new("my-ns", "my-app");
        app.metadata.uid = Some("abc".to_owned());
        app.spec.instances.replicas = Some(3);
        app.status.image = "gcr.io/my-app".to_owned();
        app
    }

    fn space() -> Space {
        let mut space = Space::new("my-ns");
        space.status.runtime_config.progress_deadline_seconds = Some(600);
        space.status.runtime_config.termination_grace_period_seconds = Some(30);
        space
    }

    fn env_names(pod_spec: &Value) -> Vec<&str> {
        pod_spec["containers"][0]["env"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap())
            .collect()
    }

    #[test]
    fn missing_image_is_an_error() {
        let err = make_deployment(&App::default(), &Space::default()).unwrap_err();
        assert_eq!("waiting for build image in latestReadyBuild", err.to_string());
    }

    #[test]
    fn missing_replicas_is_an_error() {
        let mut app = App::default();
        app.status.image = "gcr.io/my-app".to_owned();
        let err = make_deployment(&app, &Space::default()).unwrap_err();
        assert_eq!("Exact scale required for deployment based setup", err.to_string());
    }

    #[test]
    fn stopped_app_has_zero_replicas() {
        let mut app = running_app();
        app.spec.instances.stopped = true;
        app.spec.instances.replicas = Some(30);
        app.metadata
            .labels
            .insert("user-label".to_owned(), "v".to_owned());
        app.metadata
            .annotations
            .insert("user-annotation".to_owned(), "a".to_owned());

        let deployment = make_deployment(&app, &space()).unwrap();
        assert_eq!(json!(0), deployment["spec"]["replicas"]);
        assert_eq!(json!(600), deployment["spec"]["progressDeadlineSeconds"]);
        assert_eq!(json!(10), deployment["spec"]["revisionHistoryLimit"]);
        assert_eq!(
            json!({
                "app.kubernetes.io/component": "app-scaler",
                "app.kubernetes.io/managed-by": "kf",
                "app.kubernetes.io/name": "my-app",
                "user-label": "v"
            }),
            deployment["metadata"]["labels"]
        );
        assert_eq!(
            json!({
                "app.kubernetes.io/component": "app-server",
                "app.kubernetes.io/managed-by": "kf",
                "app.kubernetes.io/name": "my-app"
            }),
            deployment["spec"]["selector"]["matchLabels"]
        );
        let template = &deployment["spec"]["template"]["metadata"];
        assert_eq!("app", template["labels"]["kf.dev/networkpolicy"]);
        assert_eq!("app-server", template["labels"]["app.kubernetes.io/component"]);
        assert_eq!("v", template["labels"]["user-label"]);
        assert_eq!("true", template["annotations"]["sidecar.istio.io/inject"]);
        assert_eq!("a", template["annotations"]["user-annotation"]);
        assert_eq!(
            "user-container",
            template["annotations"]["kubectl.kubernetes.io/default-container"]
        );
        assert_eq!(
            json!({"type": "RollingUpdate", "rollingUpdate": {"maxUnavailable": "25%", "maxSurge": "25%"}}),
            deployment["spec"]["strategy"]
        );
        let owner = &deployment["metadata"]["ownerReferences"][0];
        assert_eq!("App", owner["kind"]);
        assert_eq!(json!(true), owner["controller"]);
    }

    #[test]
    fn derivation_is_deterministic() {
        let app = running_app();
        let space = space();
        assert_eq!(
            make_deployment(&app, &space).unwrap(),
            make_deployment(&app, &space).unwrap()
        );
    }

    #[test]
    fn pod_spec_defaults() {
        let pod_spec = make_pod_spec(&running_app(), &space()).unwrap();
        let container = &pod_spec["containers"][0];
        assert_eq!("user-container", container["name"]);
        assert_eq!("gcr.io/my-app", container["image"]);
        assert_eq!(build_container_ports(8080), container["ports"]);
        assert_eq!("IfNotPresent", container["imagePullPolicy"]);
        assert_eq!("File", container["terminationMessagePolicy"]);
        assert_eq!(json!(false), pod_spec["enableServiceLinks"]);
        assert_eq!("Always", pod_spec["restartPolicy"]);
        assert_eq!(json!(30), pod_spec["terminationGracePeriodSeconds"]);
        assert_eq!("default-scheduler", pod_spec["schedulerName"]);
        assert_eq!(None, pod_spec.get("nodeSelector"));
        assert_eq!(None, pod_spec.get("volumes"));
    }

    #[test]
    fn env_is_layered_space_then_app_then_injected() {
        let mut app = running_app();
        app.spec.template.update_requests = 7;
        app.spec.template.spec = json!({
            "containers": [{"env": [{"name": "K", "value": "app"}]}]
        });
        let mut space = space();
        space.status.runtime_config.env = vec![EnvVar::new("K", "space")];

        let pod_spec = make_pod_spec(&app, &space).unwrap();
        let names = env_names(&pod_spec);
        assert_eq!(vec!["K", "K", "PORT"], names[..3].to_vec());
        assert_eq!(Some(&"KF_UPDATE_REQUESTS_abc"), names.last());

        let env = &pod_spec["containers"][0]["env"];
        assert_eq!("space", env[0]["value"]);
        assert_eq!("app", env[1]["value"]);
        assert_eq!("7", env[names.len() - 1]["value"]);

        // later entries win when kubernetes resolves duplicate names
        let last_k = names.iter().rposition(|n| *n == "K").unwrap();
        assert_eq!("app", env[last_k]["value"]);
    }

    #[test]
    fn probes_use_the_user_port() {
        let mut app = running_app();
        app.spec.template.spec = json!({
            "containers": [{
                "ports": [{"containerPort": 9999}],
                "livenessProbe": {"tcpSocket": {}},
                "readinessProbe": {"httpGet": {"path": "/healthz", "port": 1}},
                "startupProbe": {"exec": {"command": ["true"]}}
            }]
        });
        let pod_spec = make_pod_spec(&app, &space()).unwrap();
        let container = &pod_spec["containers"][0];
        assert_eq!(json!({"port": 9999}), container["livenessProbe"]["tcpSocket"]);
        assert_eq!(
            json!({"path": "/healthz", "port": 9999}),
            container["readinessProbe"]["httpGet"]
        );
        assert_eq!(
            json!({"exec": {"command": ["true"]}}),
            container["startupProbe"]
        );
        assert_eq!(json!([{"containerPort": 9999}]), container["ports"]);
    }

    #[test]
    fn node_selector_merges_space_and_build() {
        let mut app = running_app();
        let mut build = BuildSpec::default();
        build
            .node_selector
            .insert("disktype".to_owned(), "ssd10".to_owned());
        app.spec.build.spec = Some(build);
        let mut space = space();
        space
            .status
            .runtime_config
            .node_selector
            .insert("cpu".to_owned(), "amd64".to_owned());
        space
            .status
            .runtime_config
            .node_selector
            .insert("disktype".to_owned(), "hdd".to_owned());

        let pod_spec = make_pod_spec(&app, &space).unwrap();
        assert_eq!(
            json!({"cpu": "amd64", "disktype": "ssd10"}),
            pod_spec["nodeSelector"]
        );
    }

    #[test]
    fn volumes_wrap_the_entrypoint() {
        let mut app = running_app();
        app.spec.template.spec = json!({
            "containers": [{
                "args": ["-jar", "my-library.jar", "-timeout=10", "-needsShellEscape=\"$'"]
            }]
        });
        app.status.volumes = vec![AppVolumeStatus {
            mount_path: "/nfs/volume1".to_owned(),
            volume_name: "nfsvolume1".to_owned(),
            volume_claim_name: "nfs-volume1-pvc".to_owned(),
            ..Default::default()
        }];

        let pod_spec = make_pod_spec(&app, &space()).unwrap();
        let container = &pod_spec["containers"][0];
        assert_eq!(json!(["/bin/sh"]), container["command"]);
        assert_eq!(
            json!([
                "-c",
                "mapfs -uid 2000 -gid 2000 /nfs/volume1 /.kfmounts/nfs/volume1 & exec /lifecycle/entrypoint.bash -jar my-library.jar -timeout=10 '-needsShellEscape=\"$'\"'\"''"
            ]),
            container["args"]
        );
        assert_eq!(
            json!(["timeout", "-k", "10s", "10s", "/bin/sh", "-c", "fusermount -u -z /nfs/volume1 & wait"]),
            container["lifecycle"]["preStop"]["exec"]["command"]
        );
        assert_eq!(json!({"privileged": true}), container["securityContext"]);
        assert_eq!(
            json!([{"name": "nfs-volume1-pvc", "mountPath": "/.kfmounts/nfs/volume1"}]),
            container["volumeMounts"]
        );
        assert_eq!(
            json!([{"name": "nfs-volume1-pvc", "persistentVolumeClaim": {"claimName": "nfs-volume1-pvc"}}]),
            pod_spec["volumes"]
        );
    }

    #[test]
    fn volumes_keep_a_custom_command() {
        let mut app = running_app();
        app.spec.template.spec = json!({
            "containers": [{"command": ["java"], "args": ["-jar", "my-library.jar"]}]
        });
        app.status.volumes = vec![AppVolumeStatus {
            mount_path: "/nfs/volume1".to_owned(),
            volume_claim_name: "pvc".to_owned(),
            ..Default::default()
        }];
        let pod_spec = make_pod_spec(&app, &space()).unwrap();
        assert_eq!(
            "mapfs -uid 2000 -gid 2000 /nfs/volume1 /.kfmounts/nfs/volume1 & exec java -jar my-library.jar",
            pod_spec["containers"][0]["args"][1]
        );
        // the App itself is untouched
        assert_eq!(json!(["java"]), app.spec.template.spec["containers"][0]["command"]);
    }
}
