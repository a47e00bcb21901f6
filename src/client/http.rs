//! `ApiServer` backed by a real Kubernetes api server, using hyper with openssl for TLS.
use super::request::build_request;
use super::{ApiError, ApiServer, Error, Operation};
use crate::config::{CAData, ClientConfig, Credentials};
use crate::metrics::ClientMetrics;

use bytes::Buf;
use futures::future::BoxFuture;
use futures::FutureExt;
use http::{Request, Response};
use hyper::client::Client as HyperClient;
use hyper::client::HttpConnector;
use hyper::Body;
use hyper_openssl::HttpsConnector;
use openssl::pkey::PKey;
use openssl::ssl::{SslConnector, SslConnectorBuilder, SslMethod};
use openssl::x509::X509;
use serde_json::Value;

use std::fs;
use std::io;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug)]
struct Inner {
    http_client: HyperClient<HttpsConnector<HttpConnector>>,
    config: ClientConfig,
    metrics: Option<ClientMetrics>,
}

/// Sends each operation as a single http request. Cloning is cheap and clones share the same
/// connection pool.
#[derive(Debug, Clone)]
pub struct HttpApiServer(Arc<Inner>);

fn invalid_base64(field: &str, err: base64::DecodeError) -> io::Error {
    io::Error::new(
        io::ErrorKind::Other,
        format!("Invalid base64 content of {}: {}", field, err),
    )
}

fn set_client_cert(ssl: &mut SslConnectorBuilder, cert_pem: &[u8], key_pem: &[u8]) -> io::Result<()> {
    let cert = X509::from_pem(cert_pem)?;
    let pkey = PKey::private_key_from_pem(key_pem)?;
    ssl.set_certificate(&*cert)?;
    ssl.set_private_key(&*pkey)?;
    // fails if the key doesn't belong to the certificate
    ssl.check_private_key()?;
    Ok(())
}

impl HttpApiServer {
    pub fn new(mut config: ClientConfig, metrics: Option<ClientMetrics>) -> Result<HttpApiServer, io::Error> {
        let mut http = HttpConnector::new();
        http.enforce_http(false);

        let mut ssl = SslConnector::builder(SslMethod::tls())?;
        ssl.set_alpn_protos(b"\x02h2\x08http/1.1")?;
        match config.ca_data.take() {
            Some(CAData::Contents(certs)) => {
                let decoded = base64::decode(&certs)
                    .map_err(|e| invalid_base64("certificate-authority-data", e))?;
                let certs = X509::stack_from_pem(decoded.as_slice())?;
                let cert_store = ssl.cert_store_mut();
                for cert in certs {
                    cert_store.add_cert(cert)?;
                }
            }
            Some(CAData::File(path)) => {
                ssl.set_ca_file(path.as_str())?;
            }
            None => {}
        }

        match config.credentials {
            Credentials::PemPath {
                ref certificate_path,
                ref private_key_path,
            } => {
                let cert = fs::read(certificate_path)?;
                let key = fs::read(private_key_path)?;
                set_client_cert(&mut ssl, cert.as_slice(), key.as_slice())?;
            }
            Credentials::Pem {
                ref certificate_base64,
                ref private_key_base64,
            } => {
                let cert = base64::decode(certificate_base64)
                    .map_err(|e| invalid_base64("client-certificate-data", e))?;
                let key = base64::decode(private_key_base64)
                    .map_err(|e| invalid_base64("client-key-data", e))?;
                set_client_cert(&mut ssl, cert.as_slice(), key.as_slice())?;
            }
            Credentials::Header(_) => {}
        }

        if config.verify_ssl_certs {
            ssl.set_verify(openssl::ssl::SslVerifyMode::PEER);
        } else {
            log::warn!("TLS Certificate verification has been disabled! All connections to the Kubernetes api server will be insecure!");
            ssl.set_verify(openssl::ssl::SslVerifyMode::NONE);
        }

        let https = HttpsConnector::with_connector(http, ssl)?;
        let http_client = HyperClient::builder().build(https);

        Ok(HttpApiServer(Arc::new(Inner {
            http_client,
            config,
            metrics,
        })))
    }

    async fn execute_op(&self, op: Operation) -> Result<Value, Error> {
        let req = build_request(&self.0.config, &op)?;
        let method = req.method().to_string();
        let uri = req.uri().to_string();
        let start_time = Instant::now();

        let result = self.send(req).await;
        let result = match result {
            Ok(response) => HttpApiServer::read_body(response).await,
            Err(err) => Err(err),
        };
        log::debug!(
            "Finished {} request to: {}, total_duration: {}ms, success: {}",
            method,
            uri,
            start_time.elapsed().as_millis(),
            result.is_ok()
        );
        if result.is_err() {
            if let Some(metrics) = self.0.metrics.as_ref() {
                metrics.api_error(op.k8s_type());
            }
        }
        result
    }

    async fn send(&self, req: Request<Body>) -> Result<Response<Body>, Error> {
        let method = req.method().clone();
        let uri = req.uri().clone();
        log::debug!("Starting {} request to: {}", method, uri);

        let timer = self.0.metrics.as_ref().map(ClientMetrics::request_started);
        let start_time = Instant::now();
        let result = self.0.http_client.request(req).await;
        if let Some(timer) = timer {
            timer.observe_duration();
        }

        match result {
            Ok(resp) => {
                log::debug!(
                    "Response status received for {} to: {}, status: {}, duration: {}ms",
                    method,
                    uri,
                    resp.status().as_u16(),
                    start_time.elapsed().as_millis()
                );
                Ok(resp)
            }
            Err(err) => {
                log::error!(
                    "Failed to execute {} request to: {}, err: {}",
                    method,
                    uri,
                    err
                );
                Err(err.into())
            }
        }
    }

    async fn read_body(response: Response<Body>) -> Result<Value, Error> {
        let status = response.status();
        if !status.is_success() {
            let body = hyper::body::to_bytes(response.into_body()).await?;
            return Err(decode_error_body(status.as_u16(), body.as_ref()).into());
        }

        let deserialized = if log::log_enabled!(log::Level::Trace) {
            let body = hyper::body::to_bytes(response.into_body()).await?;
            log::trace!("Got response body: {}", String::from_utf8_lossy(body.as_ref()));
            serde_json::from_slice(body.as_ref())?
        } else {
            let body = hyper::body::aggregate(response.into_body()).await?;
            serde_json::from_reader(body.reader())?
        };
        Ok(deserialized)
    }
}

/// The api server sends a `Status` object with most errors. Anything else still produces an
/// error with the right code, and the body as the message if it's text.
fn decode_error_body(code: u16, body: &[u8]) -> ApiError {
    match serde_json::from_slice::<ApiError>(body) {
        Ok(api_error) => api_error,
        Err(_) => {
            let reason = http::StatusCode::from_u16(code)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("Unknown")
                .replace(' ', "");
            let message = std::str::from_utf8(body)
                .map(|s| s.trim().to_owned())
                .unwrap_or_default();
            ApiError::new(code, reason.as_str(), message)
        }
    }
}

impl ApiServer for HttpApiServer {
    fn execute(&self, op: Operation) -> BoxFuture<'_, Result<Value, Error>> {
        self.execute_op(op).boxed()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_bodies_become_api_errors() {
        let body = br#"{"kind":"Status","apiVersion":"v1","status":"Failure","message":"apps.kf.dev \"x\" not found","reason":"NotFound","code":404}"#;
        let err = decode_error_body(404, &body[..]);
        assert_eq!(404, err.code);
        assert_eq!("NotFound", err.reason);
        assert_eq!("apps.kf.dev \"x\" not found", err.message);
    }

    #[test]
    fn other_bodies_keep_the_status_code() {
        let err = decode_error_body(503, b"upstream connect error\n");
        assert_eq!(503, err.code);
        assert_eq!("ServiceUnavailable", err.reason);
        assert_eq!("upstream connect error", err.message);

        let err = decode_error_body(409, b"");
        assert_eq!("Conflict", err.reason);
        assert_eq!("api error: code: 409, reason: 'Conflict'", err.to_string());
    }
}
