use super::make_node_selector;
use crate::apis::{
    App, Build, BuildParam, BuildSpec, KubeObject, ObjectMeta, OwnerReference, Resource, Space,
};

pub const BUILD_COMPONENT: &str = "build";
pub const DESTINATION_IMAGE_PARAM: &str = "DESTINATION_IMAGE";

/// Builds are named after the App and the build update counter, so bumping the counter is
/// what triggers a new build
pub fn make_build_name(app: &App) -> String {
    format!("{}-{:x}", app.metadata.name, app.spec.build.update_requests)
}

/// Where the built image gets pushed. The underscores can't appear in Kubernetes names, so
/// these can't collide with images pushed by anything else.
pub fn build_image_destination(app: &App, space: &Space) -> String {
    let image = format!(
        "app_{}_{}:{:x}",
        app.metadata.namespace().unwrap_or_default(),
        app.metadata.name,
        app.spec.build.update_requests
    );
    let registry = space.status.build_config.container_registry.trim_end_matches('/');
    if registry.is_empty() {
        image
    } else {
        format!("{}/{}", registry, image)
    }
}

/// The Build for the App's current build spec, or None if the App runs a prebuilt image.
/// The Space's build env comes first so the App's own build env overrides it.
pub fn make_build(app: &App, space: &Space) -> Option<Build> {
    let app_spec = app.spec.build.spec.as_ref()?;

    let mut env = space.status.build_config.env.clone();
    env.extend(app_spec.env.iter().cloned());

    let mut params = app_spec.params.clone();
    if app_spec.is_builtin() && app_spec.param(DESTINATION_IMAGE_PARAM).is_none() {
        params.push(BuildParam::new(
            DESTINATION_IMAGE_PARAM,
            build_image_destination(app, space),
        ));
    }

    let mut metadata = ObjectMeta::named(app.metadata.namespace(), &make_build_name(app));
    metadata.labels = app.component_labels(BUILD_COMPONENT);
    metadata.owner_references = vec![OwnerReference::new_controller_ref(
        App::k8s_type(),
        app.meta(),
    )];

    Some(Build {
        metadata,
        spec: BuildSpec {
            env,
            params,
            node_selector: make_node_selector(app, space),
            ..app_spec.clone()
        },
        status: Default::default(),
    })
}
