//! Readiness aggregation for objects whose status schema isn't known at compile time. The
//! reduction follows the knative duck-typed `status.conditions` convention.
use serde_json::Value;

use std::fmt::{self, Display};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn as_str(&self) -> &'static str {
        match *self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }

    pub fn is_true(&self) -> bool {
        *self == ConditionStatus::True
    }

    pub fn is_false(&self) -> bool {
        *self == ConditionStatus::False
    }
}

impl Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a path runs through something that isn't a json object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedField {
    pub path: String,
}

impl Display for MalformedField {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} is not an object", self.path)
    }
}

impl std::error::Error for MalformedField {}

/// Follows `path` through nested objects. A field that's absent is `Ok(None)`, but anything
/// along the way that exists and isn't an object is an error.
pub fn nested_field<'a>(obj: &'a Value, path: &[&str]) -> Result<Option<&'a Value>, MalformedField> {
    let mut current = obj;
    for (i, segment) in path.iter().enumerate() {
        match current {
            Value::Object(map) => match map.get(*segment) {
                Some(next) => current = next,
                None => return Ok(None),
            },
            _ => {
                return Err(MalformedField {
                    path: format!(".{}", path[..i].join(".")),
                })
            }
        }
    }
    Ok(Some(current))
}

/// A missing generation counts as zero, a present one must be an integer.
fn generation_at(obj: &Value, path: &[&str]) -> Result<i64, ()> {
    match nested_field(obj, path) {
        Ok(None) => Ok(0),
        Ok(Some(value)) => value.as_i64().ok_or(()),
        Err(_) => Err(()),
    }
}

/// True when both generations are readable and the status was written for an older one
pub fn generation_is_stale(obj: &Value) -> bool {
    let generation = generation_at(obj, &["metadata", "generation"]);
    let observed = generation_at(obj, &["status", "observedGeneration"]);
    match (generation, observed) {
        (Ok(generation), Ok(observed)) => generation != observed,
        _ => false,
    }
}

/// Reduces the conditions of an arbitrary object to a single status.
///
/// * no `status.conditions`: Unknown
/// * `status`, `metadata` or `status.conditions` of the wrong shape: False
/// * `metadata.generation` or `status.observedGeneration` with a non-integer value: False
/// * generations that differ: Unknown
/// * any condition that isn't an object, or has a status other than True or Unknown: False
/// * otherwise Unknown if any condition is Unknown, and True if not (including no conditions)
///
/// Never panics, whatever the input looks like.
pub fn check_conditions(obj: &Value) -> ConditionStatus {
    let conditions = match nested_field(obj, &["status", "conditions"]) {
        Ok(None) => return ConditionStatus::Unknown,
        Ok(Some(Value::Array(conditions))) => conditions,
        Ok(Some(_)) | Err(_) => return ConditionStatus::False,
    };

    let generation = generation_at(obj, &["metadata", "generation"]);
    let observed = generation_at(obj, &["status", "observedGeneration"]);
    match (generation, observed) {
        (Ok(generation), Ok(observed)) if generation != observed => {
            return ConditionStatus::Unknown;
        }
        (Ok(_), Ok(_)) => {}
        _ => return ConditionStatus::False,
    }

    let mut has_unknown = false;
    for condition in conditions {
        let status = match condition.as_object() {
            Some(cond) => cond.get("status").and_then(Value::as_str),
            None => return ConditionStatus::False,
        };
        match status {
            Some("True") => {}
            Some("Unknown") => has_unknown = true,
            _ => return ConditionStatus::False,
        }
    }

    if has_unknown {
        ConditionStatus::Unknown
    } else {
        ConditionStatus::True
    }
}

/// Returns the status, reason and message of the condition with the given type, if the object
/// reports one.
pub fn find_condition<'a>(
    obj: &'a Value,
    condition_type: &str,
) -> Option<(&'a str, Option<&'a str>, Option<&'a str>)> {
    obj.pointer("/status/conditions")?
        .as_array()?
        .iter()
        .filter_map(Value::as_object)
        .find(|c| c.get("type").and_then(Value::as_str) == Some(condition_type))
        .map(|c| {
            (
                c.get("status").and_then(Value::as_str).unwrap_or("Unknown"),
                c.get("reason").and_then(Value::as_str),
                c.get("message").and_then(Value::as_str),
            )
        })
}
