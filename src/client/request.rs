use super::{Error, ListParams, Operation};
use crate::config::ClientConfig;
use crate::k8s_types::K8sType;

use http::{header, Method, Request};
use hyper::Body;
use serde_json::Value;
use url::Url;

const IMPERSONATE_USER_HEADER: &str = "Impersonate-User";
const IMPERSONATE_GROUP_HEADER: &str = "Impersonate-Group";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Turns an operation into the http request the api server expects for it
pub(crate) fn build_request(config: &ClientConfig, op: &Operation) -> Result<Request<Body>, Error> {
    match op {
        Operation::Get {
            k8s_type,
            namespace,
            name,
        } => {
            let url = make_url(config, k8s_type, namespace.as_deref(), Some(name))?;
            make_req(config, Method::GET, url, None)
        }
        Operation::List {
            k8s_type,
            namespace,
            params,
        } => {
            let mut url = make_url(config, k8s_type, namespace.as_deref(), None)?;
            append_list_params(&mut url, params);
            make_req(config, Method::GET, url, None)
        }
        Operation::Create {
            k8s_type,
            namespace,
            object,
        } => {
            let url = make_url(config, k8s_type, namespace.as_deref(), None)?;
            make_req(config, Method::POST, url, Some(object))
        }
        Operation::Update {
            k8s_type,
            namespace,
            name,
            object,
        } => {
            let url = make_url(config, k8s_type, namespace.as_deref(), Some(name))?;
            make_req(config, Method::PUT, url, Some(object))
        }
        Operation::Delete {
            k8s_type,
            namespace,
            name,
            options,
        } => {
            let url = make_url(config, k8s_type, namespace.as_deref(), Some(name))?;
            let body = options.to_body();
            make_req(config, Method::DELETE, url, body.as_ref())
        }
    }
}

fn append_list_params(url: &mut Url, params: &ListParams) {
    if params.field_selector.is_none() && params.label_selector.is_none() {
        return;
    }
    let mut query = url.query_pairs_mut();
    if let Some(selector) = params.field_selector.as_deref() {
        query.append_pair("fieldSelector", selector);
    }
    if let Some(selector) = params.label_selector.as_deref() {
        query.append_pair("labelSelector", selector);
    }
}

fn make_req(
    config: &ClientConfig,
    method: Method,
    url: Url,
    body: Option<&Value>,
) -> Result<Request<Body>, Error> {
    let mut builder = Request::builder()
        .method(method)
        .uri(url.as_str())
        .header(header::USER_AGENT, config.user_agent.as_str())
        .header(header::ACCEPT, JSON_CONTENT_TYPE);

    if let Some(auth) = config.credentials.header_value() {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    if let Some(user) = config.impersonate.as_deref() {
        builder = builder.header(IMPERSONATE_USER_HEADER, user);
        for group in config.impersonate_groups.iter() {
            builder = builder.header(IMPERSONATE_GROUP_HEADER, group.as_str());
        }
    }

    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, JSON_CONTENT_TYPE);
            Body::from(serde_json::to_vec(value)?)
        }
        None => Body::empty(),
    };
    builder
        .body(body)
        .map_err(|e| Error::InvalidRequest(e.to_string()))
}

/// Core types live under `/api/<version>`, everything else under
/// `/apis/<group>/<version>`. Namespaced requests insert `namespaces/<ns>` before the plural
/// kind.
pub(crate) fn make_url(
    config: &ClientConfig,
    k8s_type: &K8sType,
    namespace: Option<&str>,
    name: Option<&str>,
) -> Result<Url, Error> {
    let mut url = Url::parse(config.api_server_endpoint.as_str()).map_err(|e| {
        Error::InvalidRequest(format!(
            "api server endpoint '{}': {}",
            config.api_server_endpoint, e
        ))
    })?;
    {
        let mut segments = url.path_segments_mut().map_err(|_| {
            Error::InvalidRequest(format!(
                "api server endpoint '{}' cannot be a base url",
                config.api_server_endpoint
            ))
        })?;
        segments.pop_if_empty();

        let group = k8s_type.group();
        if group.is_empty() {
            segments.push("api");
        } else {
            segments.push("apis");
            segments.push(group);
        }
        segments.push(k8s_type.version());
        if let Some(ns) = namespace {
            segments.push("namespaces");
            segments.push(ns);
        }
        segments.push(k8s_type.plural_kind);
        if let Some(n) = name {
            segments.push(n);
        }
    }
    Ok(url)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::client::DeleteOptions;
    use crate::config::Credentials;
    use crate::k8s_types::core::v1::Secret;
    use crate::k8s_types::kf_dev::v1alpha1::App;
    use crate::k8s_types::rbac_authorization_k8s_io::v1::ClusterRoleBinding;

    fn config() -> ClientConfig {
        ClientConfig {
            api_server_endpoint: "https://k8s.example.com:6443/".to_owned(),
            credentials: Credentials::bearer_token("tok"),
            ca_data: None,
            user_agent: "kf-test".to_owned(),
            verify_ssl_certs: true,
            impersonate: None,
            impersonate_groups: Vec::new(),
        }
    }

    #[test]
    fn urls_for_core_and_group_types() {
        let config = config();
        assert_eq!(
            "https://k8s.example.com:6443/api/v1/namespaces/dev/secrets/creds",
            make_url(&config, Secret, Some("dev"), Some("creds"))
                .unwrap()
                .as_str()
        );
        assert_eq!(
            "https://k8s.example.com:6443/apis/kf.dev/v1alpha1/namespaces/dev/apps",
            make_url(&config, App, Some("dev"), None).unwrap().as_str()
        );
        assert_eq!(
            "https://k8s.example.com:6443/apis/rbac.authorization.k8s.io/v1/clusterrolebindings/crb",
            make_url(&config, ClusterRoleBinding, None, Some("crb"))
                .unwrap()
                .as_str()
        );
    }

    #[test]
    fn invalid_endpoint_is_an_error() {
        let mut config = config();
        config.api_server_endpoint = "not a url".to_owned();
        let err = make_url(&config, App, None, None).unwrap_err();
        assert!(err.to_string().starts_with("invalid request: api server endpoint"));
    }

    #[test]
    fn list_request_has_selectors() {
        let op = Operation::List {
            k8s_type: App,
            namespace: Some("dev".to_owned()),
            params: ListParams {
                field_selector: Some("metadata.name=my-app".to_owned()),
                label_selector: Some("a=b,c=d".to_owned()),
            },
        };
        let req = build_request(&config(), &op).unwrap();
        assert_eq!(Method::GET, req.method());
        assert_eq!(
            "/apis/kf.dev/v1alpha1/namespaces/dev/apps?fieldSelector=metadata.name%3Dmy-app&labelSelector=a%3Db%2Cc%3Dd",
            req.uri().path_and_query().unwrap().as_str()
        );
        assert_eq!("Bearer tok", req.headers()[header::AUTHORIZATION]);
        assert_eq!("kf-test", req.headers()[header::USER_AGENT]);
    }

    #[test]
    fn update_and_delete_methods() {
        let update = Operation::Update {
            k8s_type: App,
            namespace: Some("dev".to_owned()),
            name: "my-app".to_owned(),
            object: serde_json::json!({"metadata": {"name": "my-app"}}),
        };
        let req = build_request(&config(), &update).unwrap();
        assert_eq!(Method::PUT, req.method());
        assert_eq!("application/json", req.headers()[header::CONTENT_TYPE]);

        let delete = Operation::Delete {
            k8s_type: App,
            namespace: Some("dev".to_owned()),
            name: "my-app".to_owned(),
            options: DeleteOptions::default(),
        };
        let req = build_request(&config(), &delete).unwrap();
        assert_eq!(Method::DELETE, req.method());
        assert_eq!(None, req.headers().get(header::CONTENT_TYPE));
    }

    #[test]
    fn impersonation_headers() {
        let mut config = config();
        config.impersonate = Some("jane@example.com".to_owned());
        config.impersonate_groups = vec!["devs".to_owned(), "ops".to_owned()];
        let op = Operation::Get {
            k8s_type: App,
            namespace: None,
            name: "x".to_owned(),
        };
        let req = build_request(&config, &op).unwrap();
        assert_eq!("jane@example.com", req.headers()[IMPERSONATE_USER_HEADER]);
        assert_eq!(2, req.headers().get_all(IMPERSONATE_GROUP_HEADER).iter().count());
    }
}
