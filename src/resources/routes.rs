use crate::apis::{
    checksum_base36, clean_path, generate_name, merge_bindings, union_maps, App, KubeObject,
    Labels, ObjectMeta, OwnerReference, Resource, Route, RouteSpec, RouteSpecFields, Space,
    COMPONENT_LABEL, MANAGED_BY_KF, MANAGED_BY_LABEL, NAME_LABEL, ROUTE_APP_NAME_LABEL,
    ROUTE_DOMAIN_LABEL, ROUTE_HOSTNAME_LABEL, ROUTE_PATH_LABEL,
};

pub const ROUTE_COMPONENT: &str = "route";

/// Labels identifying a route by its hostname, domain and path. Paths aren't valid label
/// values, so the path label holds a checksum of the cleaned path.
pub fn make_route_labels(route: &RouteSpecFields) -> Labels {
    let mut labels = Labels::new();
    labels.insert(MANAGED_BY_LABEL.to_owned(), MANAGED_BY_KF.to_owned());
    labels.insert(COMPONENT_LABEL.to_owned(), ROUTE_COMPONENT.to_owned());
    labels.insert(ROUTE_HOSTNAME_LABEL.to_owned(), route.hostname.clone());
    labels.insert(ROUTE_DOMAIN_LABEL.to_owned(), route.domain.clone());
    labels.insert(
        ROUTE_PATH_LABEL.to_owned(),
        checksum_base36(&clean_path(&route.path)),
    );
    labels
}

/// The labels a Route must have to be the given route. This is the same set
/// `make_route_labels` produces, so it matches every Route for those fields regardless of
/// which App it belongs to.
pub fn make_route_selector(route: &RouteSpecFields) -> Labels {
    make_route_labels(route)
}

/// Formats required labels as an equality based label selector, `k1=v1,k2=v2`
pub fn format_label_selector(selector: &Labels) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Whether `labels` has every key and value in `selector`
pub fn selector_matches(selector: &Labels, labels: &Labels) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.get(k).map(|actual| actual == v).unwrap_or(false))
}

/// One Route per distinct route the App binds to, with blank domains filled in from the
/// Space's default domain.
pub fn make_routes(app: &App, space: &Space) -> Vec<Route> {
    let app_name = app.metadata.name.as_str();
    let mut app_labels = Labels::new();
    app_labels.insert(NAME_LABEL.to_owned(), app_name.to_owned());
    app_labels.insert(ROUTE_APP_NAME_LABEL.to_owned(), app_name.to_owned());

    merge_bindings(&app.spec.routes)
        .into_iter()
        .map(|binding| {
            let fields = binding.route.qualify(space.default_domain_or_blank());
            let name = generate_name(&[
                fields.hostname.as_str(),
                fields.domain.as_str(),
                fields.path.as_str(),
                app_name,
            ]);

            let mut metadata = ObjectMeta::named(app.metadata.namespace(), &name);
            metadata.labels = union_maps(vec![
                &app.metadata.labels,
                &make_route_labels(&fields),
                &app_labels,
            ]);
            metadata.owner_references = vec![OwnerReference::new_controller_ref(
                App::k8s_type(),
                app.meta(),
            )];

            Route {
                metadata,
                spec: RouteSpec { fields },
                status: Default::default(),
            }
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::apis::{RouteWeightBinding, SpaceDomain};

    fn binding(hostname: &str, domain: &str, path: &str) -> RouteWeightBinding {
        RouteWeightBinding::new(RouteSpecFields::new(hostname, domain, path))
    }

    #[test]
    fn route_labels() {
        let labels = make_route_labels(&RouteSpecFields::new(
            "some-hostname",
            "some-domain",
            "/some/path",
        ));
        assert_eq!(5, labels.len());
        assert_eq!("kf", labels[MANAGED_BY_LABEL]);
        assert_eq!("route", labels[COMPONENT_LABEL]);
        assert_eq!("some-hostname", labels[ROUTE_HOSTNAME_LABEL]);
        assert_eq!("some-domain", labels[ROUTE_DOMAIN_LABEL]);
        assert_eq!("2uusd3k2mp26d", labels[ROUTE_PATH_LABEL]);
    }

    #[test]
    fn route_selector_matches_cleaned_paths() {
        let selector =
            make_route_selector(&RouteSpecFields::new("some-host", "some-domain", "some-path"));

        let mut good = Labels::new();
        good.insert(MANAGED_BY_LABEL.to_owned(), "kf".to_owned());
        good.insert(COMPONENT_LABEL.to_owned(), "route".to_owned());
        good.insert(ROUTE_HOSTNAME_LABEL.to_owned(), "some-host".to_owned());
        good.insert(ROUTE_DOMAIN_LABEL.to_owned(), "some-domain".to_owned());
        good.insert(ROUTE_PATH_LABEL.to_owned(), checksum_base36("/some-path"));
        good.insert("extra".to_owned(), "ignored".to_owned());
        assert!(selector_matches(&selector, &good));

        let mut bad = good.clone();
        bad.insert(ROUTE_PATH_LABEL.to_owned(), checksum_base36("some-other-path"));
        assert!(!selector_matches(&selector, &bad));

        let formatted = format_label_selector(&selector);
        assert!(formatted.starts_with("app.kubernetes.io/component=route,"));
        assert_eq!(4, formatted.matches(',').count());
    }

    #[test]
    fn routes_carry_app_metadata() {
        let mut app = App::new("some-namespace", "some-app-name");
        app.metadata.labels.insert("a".to_owned(), "1".to_owned());
        app.metadata.labels.insert("b".to_owned(), "2".to_owned());
        app.spec.routes = vec![binding("some-hostname", "some-domain", "some-path")];

        let routes = make_routes(&app, &Space::new("some-namespace"));
        assert_eq!(1, routes.len());
        let route = &routes[0];
        assert_eq!(
            generate_name(&["some-hostname", "some-domain", "some-path", "some-app-name"]),
            route.metadata.name
        );
        assert_eq!(Some("some-namespace"), route.metadata.namespace());

        let mut expected = Labels::new();
        for (k, v) in vec![
            ("a", "1".to_owned()),
            ("b", "2".to_owned()),
            (NAME_LABEL, "some-app-name".to_owned()),
            (MANAGED_BY_LABEL, "kf".to_owned()),
            (COMPONENT_LABEL, "route".to_owned()),
            (ROUTE_HOSTNAME_LABEL, "some-hostname".to_owned()),
            (ROUTE_DOMAIN_LABEL, "some-domain".to_owned()),
            (ROUTE_PATH_LABEL, checksum_base36("/some-path")),
            (ROUTE_APP_NAME_LABEL, "some-app-name".to_owned()),
        ] {
            expected.insert(k.to_owned(), v);
        }
        assert_eq!(expected, route.metadata.labels);
        assert_eq!("some-app-name", route.metadata.owner_references[0].name);
        assert_eq!("some-path", route.spec.fields.path);
    }

    #[test]
    fn blank_domain_uses_space_default() {
        let mut app = App::new("ns", "app");
        app.spec.routes = vec![binding("some-hostname", "", "")];
        let mut space = Space::new("ns");
        space.status.network_config.domains = vec![
            SpaceDomain::new("example.com"),
            SpaceDomain::new("wrong.example.com"),
        ];
        let routes = make_routes(&app, &space);
        assert_eq!("example.com", routes[0].spec.fields.domain);
        assert_eq!("some-hostname", routes[0].spec.fields.hostname);
    }

    #[test]
    fn duplicate_bindings_produce_one_route() {
        let mut app = App::new("ns", "app");
        app.spec.routes = vec![
            binding("host", "example.com", "/a"),
            binding("host", "example.com", "a/"),
        ];
        assert_eq!(1, make_routes(&app, &Space::new("ns")).len());
    }
}
