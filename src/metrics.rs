//! Prometheus metrics for the api client, the wait loop and the admission webhook. Each
//! `Metrics` has its own `Registry` so tests and embedders can create as many as they like.
use crate::k8s_types::K8sType;

use prometheus::{
    exponential_buckets, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
};

use std::fmt::{self, Debug};

const API_VERSION_AND_KIND: &[&str] = &["apiVersion", "kind"];
const ADMISSION_LABELS: &[&str] = &["kind", "result"];

pub const ADMISSION_ALLOWED: &str = "allowed";
pub const ADMISSION_DENIED: &str = "denied";

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    api_server_request_times: Histogram,
    api_errors_by_type: IntCounterVec,
    wait_polls_by_type: IntCounterVec,
    admission_decisions: IntCounterVec,
}

impl Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Metrics")
    }
}

impl Default for Metrics {
    fn default() -> Metrics {
        Metrics::new()
    }
}

impl Metrics {
    pub fn new() -> Metrics {
        let registry = Registry::new();

        // 5ms doubling up to ~10s
        let request_time_opts = HistogramOpts::new(
            "api_server_request_time",
            "Total time from sending the request to receiving the response headers",
        )
        .subsystem("client")
        .buckets(exponential_buckets(0.005, 2.0, 12).unwrap());
        let api_server_request_times = Histogram::with_opts(request_time_opts).unwrap();
        registry
            .register(Box::new(api_server_request_times.clone()))
            .unwrap();

        let api_error_opts = Opts::new("api_errors", "number of failed api requests")
            .subsystem("client")
            .variable_label("apiVersion")
            .variable_label("kind");
        let api_errors_by_type = IntCounterVec::new(api_error_opts, API_VERSION_AND_KIND).unwrap();
        registry
            .register(Box::new(api_errors_by_type.clone()))
            .unwrap();

        let wait_poll_opts = Opts::new("wait_polls", "number of times a wait checked the resource")
            .subsystem("client")
            .variable_label("apiVersion")
            .variable_label("kind");
        let wait_polls_by_type = IntCounterVec::new(wait_poll_opts, API_VERSION_AND_KIND).unwrap();
        registry
            .register(Box::new(wait_polls_by_type.clone()))
            .unwrap();

        let admission_opts = Opts::new("decisions", "admission decisions by kind and result")
            .subsystem("admission")
            .variable_label("kind")
            .variable_label("result");
        let admission_decisions = IntCounterVec::new(admission_opts, ADMISSION_LABELS).unwrap();
        registry
            .register(Box::new(admission_decisions.clone()))
            .unwrap();

        Metrics {
            registry,
            api_server_request_times,
            api_errors_by_type,
            wait_polls_by_type,
            admission_decisions,
        }
    }

    pub fn client_metrics(&self) -> ClientMetrics {
        ClientMetrics {
            api_server_request_times: self.api_server_request_times.clone(),
            api_errors_by_type: self.api_errors_by_type.clone(),
            wait_polls_by_type: self.wait_polls_by_type.clone(),
        }
    }

    pub fn admission_decision(&self, kind: &str, allowed: bool) {
        let result = if allowed {
            ADMISSION_ALLOWED
        } else {
            ADMISSION_DENIED
        };
        self.admission_decisions
            .with_label_values(&[kind, result])
            .inc();
    }

    pub fn encode_as_text(&self) -> Result<Vec<u8>, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::with_capacity(4096);
        encoder.encode(self.registry.gather().as_slice(), &mut buffer)?;
        Ok(buffer)
    }
}

/// The subset of metrics recorded by the api client
#[derive(Clone)]
pub struct ClientMetrics {
    api_server_request_times: Histogram,
    api_errors_by_type: IntCounterVec,
    wait_polls_by_type: IntCounterVec,
}

impl Debug for ClientMetrics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("ClientMetrics")
    }
}

impl ClientMetrics {
    pub fn request_started(&self) -> prometheus::HistogramTimer {
        self.api_server_request_times.start_timer()
    }

    pub fn api_error(&self, k8s_type: &K8sType) {
        self.type_counter(&self.api_errors_by_type, k8s_type).inc();
    }

    pub fn wait_poll(&self, k8s_type: &K8sType) {
        self.type_counter(&self.wait_polls_by_type, k8s_type).inc();
    }

    fn type_counter(&self, vec: &IntCounterVec, k8s_type: &K8sType) -> IntCounter {
        vec.with_label_values(&[k8s_type.api_version, k8s_type.kind])
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::k8s_types::kf_dev::v1alpha1::App;

    #[test]
    fn metrics_are_exposed_as_text() {
        let metrics = Metrics::new();
        let client = metrics.client_metrics();
        client.api_error(App);
        client.wait_poll(App);
        client.wait_poll(App);
        metrics.admission_decision("Route", false);
        metrics.admission_decision("Route", true);
        metrics.admission_decision("Route", true);

        let text = String::from_utf8(metrics.encode_as_text().unwrap()).unwrap();
        assert!(text.contains("client_api_errors{apiVersion=\"kf.dev/v1alpha1\",kind=\"App\"} 1"));
        assert!(text.contains("client_wait_polls{apiVersion=\"kf.dev/v1alpha1\",kind=\"App\"} 2"));
        assert!(text.contains("admission_decisions{kind=\"Route\",result=\"allowed\"} 2"));
        assert!(text.contains("admission_decisions{kind=\"Route\",result=\"denied\"} 1"));
    }

    #[test]
    fn separate_instances_do_not_conflict() {
        let _a = Metrics::new();
        let _b = Metrics::new();
    }
}
