//! Plain http webhook endpoint, TLS is terminated in front of it. Serves `POST /validate` for
//! `admission.k8s.io/v1` AdmissionReviews, plus `/health` and `/metrics`.
use super::{AdmissionRequest, ValidatorRegistry};
use crate::metrics::Metrics;

use hyper::server::Server;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, StatusCode};
use serde_json::{json, Value};

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

pub const ADMISSION_API_VERSION: &str = "admission.k8s.io/v1";
pub const ADMISSION_REVIEW_KIND: &str = "AdmissionReview";

type Error = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Deserialize)]
struct AdmissionReview {
    #[serde(default)]
    request: Option<AdmissionRequest>,
}

/// Serves the webhook until `shutdown` resolves
pub async fn serve<F>(
    address: SocketAddr,
    registry: Arc<ValidatorRegistry>,
    metrics: Metrics,
    shutdown: F,
) -> Result<(), hyper::Error>
where
    F: Future<Output = ()>,
{
    log::info!("Starting admission webhook on address: {}", address);

    let svc = Svc::new(registry, metrics);
    let service = make_service_fn(move |_| {
        let service = svc.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |request| {
                let service = service.clone();
                async move { service.handle_request(request).await }
            }))
        }
    });
    let result = Server::bind(&address)
        .serve(service)
        .with_graceful_shutdown(shutdown)
        .await;
    if let Err(err) = result.as_ref() {
        log::error!("Admission webhook failed with error: {:?}", err);
    }
    result
}

#[derive(Debug, Clone)]
pub struct Svc {
    registry: Arc<ValidatorRegistry>,
    metrics: Metrics,
}

impl Svc {
    pub fn new(registry: Arc<ValidatorRegistry>, metrics: Metrics) -> Svc {
        Svc { registry, metrics }
    }

    fn not_found(&self) -> Result<Response<Body>, Error> {
        let resp = Response::builder().status(404).body(Body::empty())?;
        Ok(resp)
    }

    fn health(&self) -> Result<Response<Body>, Error> {
        let resp = Response::builder().status(200).body(Body::empty())?;
        Ok(resp)
    }

    fn metrics(&self) -> Result<Response<Body>, Error> {
        let body = self.metrics.encode_as_text()?;
        let resp = Response::builder()
            .status(200)
            .header(http::header::CONTENT_TYPE, prometheus::TEXT_FORMAT)
            .body(Body::from(body))?;
        Ok(resp)
    }

    fn json_response(status: StatusCode, body: &Value) -> Result<Response<Body>, Error> {
        let bytes = serde_json::to_vec(body)?;
        let resp = Response::builder()
            .status(status)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))?;
        Ok(resp)
    }

    /// Runs the registered checks and builds the review response. Errors that aren't
    /// rejections still deny the request, with a 500 code in the status.
    pub fn review(&self, request: &AdmissionRequest) -> Value {
        let kind = request.kind.kind.as_str();
        let (allowed, status) = match self.registry.validate(request) {
            Ok(()) => (true, json!({"code": 200})),
            Err(err) => {
                let code = if err.is_rejected() { 403 } else { 500 };
                log::info!(
                    "Denied {:?} of {} '{}/{}': {}",
                    request.operation,
                    kind,
                    request.namespace,
                    request.name,
                    err
                );
                (false, json!({"code": code, "message": err.to_string()}))
            }
        };
        self.metrics.admission_decision(kind, allowed);
        json!({
            "apiVersion": ADMISSION_API_VERSION,
            "kind": ADMISSION_REVIEW_KIND,
            "response": {
                "uid": request.uid,
                "allowed": allowed,
                "status": status,
            }
        })
    }

    async fn validate(&self, request: Request<Body>) -> Result<Response<Body>, Error> {
        let body = hyper::body::to_bytes(request.into_body()).await?;
        let review: AdmissionReview = match serde_json::from_slice(body.as_ref()) {
            Ok(review) => review,
            Err(err) => {
                log::warn!("Couldn't decode AdmissionReview: {}", err);
                let body = json!({"message": format!("invalid AdmissionReview: {}", err)});
                return Svc::json_response(StatusCode::BAD_REQUEST, &body);
            }
        };
        match review.request {
            Some(req) => Svc::json_response(StatusCode::OK, &self.review(&req)),
            None => {
                let body = json!({"message": "the AdmissionReview has no request"});
                Svc::json_response(StatusCode::BAD_REQUEST, &body)
            }
        }
    }

    pub async fn handle_request(&self, request: Request<Body>) -> Result<Response<Body>, Error> {
        let req_path = request.uri().path().trim_end_matches('/').to_owned();
        let req_method = request.method().clone();
        let uri = request.uri().clone();

        log::debug!("Got http request {} {}", req_method, uri);

        let result = match (&req_method, req_path.as_str()) {
            (&Method::POST, "/validate") => self.validate(request).await,
            (&Method::GET, "/health") => self.health(),
            (&Method::GET, "/metrics") => self.metrics(),
            _ => self.not_found(),
        };
        match result.as_ref() {
            Ok(resp) => {
                log::debug!(
                    "Finished handling {} {} with response status: {}",
                    req_method,
                    uri,
                    resp.status()
                );
            }
            Err(err) => {
                log::error!("Error handling {} {} , error: {:?}", req_method, uri, err);
            }
        }
        result
    }
}
