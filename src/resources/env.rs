//! The environment variables kf injects into App containers, described as a table so the same
//! entries drive the container env, the list of reserved names and the user facing docs.
use crate::apis::{App, EnvVar};

use serde_json::{json, Value};

use std::collections::BTreeSet;
use std::fmt::Write;

pub const VCAP_APPLICATION_ENV_VAR: &str = "VCAP_APPLICATION";
pub const VCAP_SERVICES_ENV_VAR: &str = "VCAP_SERVICES";
pub const DATABASE_URL_ENV_VAR: &str = "DATABASE_URL";

/// The context a container runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvRuntime {
    /// serving web traffic
    Running,
    /// being built
    Staging,
    /// running a one off task
    Task,
}

/// A set of `EnvRuntime`s
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeSet {
    running: bool,
    staging: bool,
    task: bool,
}

impl RuntimeSet {
    pub fn all() -> RuntimeSet {
        RuntimeSet {
            running: true,
            staging: true,
            task: true,
        }
    }

    pub fn with(mut self, runtime: EnvRuntime) -> RuntimeSet {
        match runtime {
            EnvRuntime::Running => self.running = true,
            EnvRuntime::Staging => self.staging = true,
            EnvRuntime::Task => self.task = true,
        }
        self
    }

    pub fn contains(&self, runtime: EnvRuntime) -> bool {
        match runtime {
            EnvRuntime::Running => self.running,
            EnvRuntime::Staging => self.staging,
            EnvRuntime::Task => self.task,
        }
    }

    pub fn intersects(&self, other: &RuntimeSet) -> bool {
        (self.running && other.running)
            || (self.staging && other.staging)
            || (self.task && other.task)
    }
}

impl From<EnvRuntime> for RuntimeSet {
    fn from(runtime: EnvRuntime) -> RuntimeSet {
        RuntimeSet::default().with(runtime)
    }
}

/// The value half of an injected variable
enum EnvValue {
    Literal(String),
    Source(Value),
}

type EnvProducer = Box<dyn Fn(&App) -> EnvValue>;

struct RuntimeEnvVar {
    name: &'static str,
    aliases: &'static [&'static str],
    description: &'static str,
    runtimes: RuntimeSet,
    compute: EnvProducer,
}

fn static_value(value: &'static str) -> EnvProducer {
    Box::new(move |_| EnvValue::Literal(value.to_owned()))
}

fn user_port() -> EnvProducer {
    Box::new(|app| EnvValue::Literal(app.user_port().to_string()))
}

fn field_ref(path: &'static str) -> EnvProducer {
    Box::new(move |_| {
        EnvValue::Source(json!({
            "fieldRef": {"apiVersion": "v1", "fieldPath": path}
        }))
    })
}

fn resource_limit_mb(resource: &'static str) -> EnvProducer {
    Box::new(move |_| {
        EnvValue::Source(json!({
            "resourceFieldRef": {"resource": resource, "divisor": "1Mi"}
        }))
    })
}

fn injected_secret_ref(key: &'static str, optional: bool) -> EnvProducer {
    Box::new(move |app| {
        EnvValue::Source(json!({
            "secretKeyRef": {
                "name": injected_env_secret_name(app),
                "key": key,
                "optional": optional,
            }
        }))
    })
}

/// Name of the Secret holding the service binding variables for the App
pub fn injected_env_secret_name(app: &App) -> String {
    format!("kf-injected-envs-{}", app.metadata.name)
}

/// The App metadata Cloud Foundry apps expect to find in `VCAP_APPLICATION`. The limits are
/// filled in by Kubernetes when the container starts, so they end up as bare numbers.
fn vcap_application(app: &App) -> EnvValue {
    let uris = app
        .status
        .routes
        .iter()
        .map(|r| r.url.as_str())
        .collect::<Vec<_>>();
    let uid = app.metadata.uid.as_deref().unwrap_or_default();
    let values = json!({
        "application_id": uid,
        "application_name": app.metadata.name,
        "application_uris": uris,
        "limits": {"disk": "$(DISK_LIMIT)", "mem": "$(MEMORY_LIMIT)"},
        "name": app.metadata.name,
        "process_id": uid,
        "process_type": "web",
        "space_name": app.metadata.namespace().unwrap_or_default(),
        "uris": uris,
    });
    let encoded = values
        .to_string()
        .replace("\"$(MEMORY_LIMIT)\"", "$(MEMORY_LIMIT)")
        .replace("\"$(DISK_LIMIT)\"", "$(DISK_LIMIT)");
    EnvValue::Literal(encoded)
}

fn registry() -> Vec<RuntimeEnvVar> {
    let running = RuntimeSet::from(EnvRuntime::Running);
    let running_or_task = running.with(EnvRuntime::Task);
    let all = RuntimeSet::all();

    vec![
        RuntimeEnvVar {
            name: "PORT",
            aliases: &["VCAP_APP_PORT"],
            description: "The port the App should listen on for requests.",
            runtimes: running,
            compute: user_port(),
        },
        RuntimeEnvVar {
            name: "CF_INSTANCE_IP",
            aliases: &["CF_INSTANCE_INTERNAL_IP", "VCAP_APP_HOST"],
            description: "The cluster-visible IP of the App instance.",
            runtimes: all,
            compute: field_ref("status.podIP"),
        },
        // not an alias of PORT, the two just happen to have the same value
        RuntimeEnvVar {
            name: "CF_INSTANCE_PORT",
            aliases: &[],
            description:
                "The cluster-visible port of the App instance. In Kf this is the same as PORT.",
            runtimes: all,
            compute: user_port(),
        },
        RuntimeEnvVar {
            name: "CF_INSTANCE_ADDR",
            aliases: &[],
            description: "The cluster-visible IP:PORT of the App instance.",
            runtimes: all,
            compute: static_value("$(CF_INSTANCE_IP):$(CF_INSTANCE_PORT)"),
        },
        RuntimeEnvVar {
            name: "CF_INSTANCE_GUID",
            aliases: &["INSTANCE_GUID"],
            description: "The UUID of the App instance.",
            runtimes: running_or_task,
            compute: field_ref("metadata.uid"),
        },
        RuntimeEnvVar {
            name: "CF_INSTANCE_INDEX",
            aliases: &["INSTANCE_INDEX"],
            description: "The index number of the App instance, this will ALWAYS be 0.",
            runtimes: running,
            compute: static_value("0"),
        },
        RuntimeEnvVar {
            name: "MEMORY_LIMIT",
            aliases: &[],
            description: "The maximum amount of memory in MB the App can consume.",
            runtimes: all,
            compute: resource_limit_mb("limits.memory"),
        },
        RuntimeEnvVar {
            name: "DISK_LIMIT",
            aliases: &[],
            description: "The maximum amount of disk storage in MB the App can use.",
            runtimes: all,
            compute: resource_limit_mb("limits.ephemeral-storage"),
        },
        RuntimeEnvVar {
            name: "LANG",
            aliases: &[],
            description: "Required by buildpacks to ensure consistent script load order.",
            runtimes: all,
            compute: static_value("en_US.UTF-8"),
        },
        RuntimeEnvVar {
            name: VCAP_APPLICATION_ENV_VAR,
            aliases: &[],
            description: "A JSON structure containing app metadata.",
            runtimes: all,
            compute: Box::new(vcap_application),
        },
        RuntimeEnvVar {
            name: VCAP_SERVICES_ENV_VAR,
            aliases: &[],
            description: "A JSON structure specifying bound services.",
            runtimes: all,
            compute: injected_secret_ref(VCAP_SERVICES_ENV_VAR, false),
        },
        RuntimeEnvVar {
            name: DATABASE_URL_ENV_VAR,
            aliases: &[],
            description: "The first URI found in a VCAP_SERVICES credential.",
            runtimes: running_or_task,
            compute: injected_secret_ref(DATABASE_URL_ENV_VAR, true),
        },
    ]
}

fn registry_for(runtimes: RuntimeSet) -> impl Iterator<Item = RuntimeEnvVar> {
    registry()
        .into_iter()
        .filter(move |v| v.runtimes.intersects(&runtimes))
}

/// The variables kf injects for the given runtimes. A variable with aliases is followed by
/// one entry per alias, each referencing the original as `$(NAME)`.
pub fn build_runtime_env_vars(runtimes: impl Into<RuntimeSet>, app: &App) -> Vec<EnvVar> {
    let mut out = Vec::new();
    for var in registry_for(runtimes.into()) {
        out.push(match (var.compute)(app) {
            EnvValue::Literal(value) => EnvVar::new(var.name, value),
            EnvValue::Source(source) => EnvVar::from_source(var.name, source),
        });
        for alias in var.aliases {
            out.push(EnvVar::new(*alias, format!("$({})", var.name)));
        }
    }
    out
}

/// Names of every variable, aliases included, that kf injects for the runtimes
pub fn runtime_env_var_list(runtimes: impl Into<RuntimeSet>) -> BTreeSet<&'static str> {
    let mut out = BTreeSet::new();
    for var in registry_for(runtimes.into()) {
        out.insert(var.name);
        out.extend(var.aliases.iter().copied());
    }
    out
}

/// A markdown list describing the injected variables, sorted by name
pub fn runtime_env_var_docs(runtimes: impl Into<RuntimeSet>) -> String {
    let mut vars = registry_for(runtimes.into()).collect::<Vec<_>>();
    vars.sort_by_key(|v| v.name);
    vars.dedup_by_key(|v| v.name);

    let mut out = String::from("Kf provides the following runtime environment variables:\n\n");
    for var in vars {
        let _ = writeln!(out, " * {}: {}", var.name, var.description);
        for alias in var.aliases {
            let _ = writeln!(out, " * {}: Alias of {}", alias, var.name);
        }
    }
    out
}
