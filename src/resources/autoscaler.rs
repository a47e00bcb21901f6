use super::{deployment_name, owned_by, Error};
use crate::apis::{App, CPU_RULE_TYPE};
use crate::k8s_types::autoscaling::v1::HorizontalPodAutoscaler;
use crate::k8s_types::kf_dev::v1alpha1;

use serde_json::{json, Value};

pub const AUTOSCALER_COMPONENT: &str = "autoscaler";

pub fn autoscaler_name(app: &App) -> String {
    app.metadata.name.clone()
}

/// Whether the App should have an HPA. Stopped Apps never do, whatever their autoscaling
/// settings.
pub fn requires_hpa(app: &App) -> bool {
    !app.spec.instances.stopped && app.spec.instances.autoscaling.requires_hpa()
}

/// Builds the HorizontalPodAutoscaler for the App, or None if it shouldn't have one. Only a
/// single CPU rule is supported, anything else is an error rather than being partly applied.
pub fn make_horizontal_pod_autoscaler(app: &App) -> Result<Option<Value>, Error> {
    if !requires_hpa(app) {
        return Ok(None);
    }

    let autoscaling = &app.spec.instances.autoscaling;
    let rule = match autoscaling.rules.as_slice() {
        [rule] => rule,
        [] => return Ok(None),
        _ => return Err(Error::TooManyAutoscalingRules),
    };
    if rule.rule_type != CPU_RULE_TYPE {
        return Err(Error::InvalidAutoscalingRule);
    }

    let mut hpa = json!({
        "apiVersion": HorizontalPodAutoscaler.api_version,
        "kind": HorizontalPodAutoscaler.kind,
        "metadata": {
            "name": autoscaler_name(app),
            "namespace": app.metadata.namespace(),
            "labels": app.component_labels(AUTOSCALER_COMPONENT),
            "ownerReferences": owned_by(app),
        },
        "spec": {
            "scaleTargetRef": {
                "apiVersion": v1alpha1::App.api_version,
                "kind": v1alpha1::App.kind,
                "name": deployment_name(app),
            },
            "maxReplicas": autoscaling.max_replicas,
        },
    });
    if let Some(min) = autoscaling.min_replicas {
        hpa["spec"]["minReplicas"] = Value::from(min);
    }
    if let Some(target) = rule.target {
        hpa["spec"]["targetCPUUtilizationPercentage"] = Value::from(target);
    }
    Ok(Some(hpa))
}
