//! Structural comparison of json objects. `compare_values` answers "would writing `desired`
//! change anything", which is what the reconciler needs to decide whether to skip an update.
//! `symmetric_diff` reports every difference in both directions, for diff output and for
//! immutability checks.
use serde_json::Value;

use std::fmt::{self, Display, Write};

type JsonObject = serde_json::Map<String, Value>;

#[derive(Debug, PartialEq)]
pub struct Diff<'a> {
    pub path: String,
    pub existing: &'a Value,
    pub desired: &'a Value,
}

impl<'a> Display for Diff<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: -{} +{}", self.path, self.existing, self.desired)
    }
}

#[derive(Debug)]
pub struct Diffs<'a>(Vec<Diff<'a>>);

impl<'a> Diffs<'a> {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diff<'a>> {
        self.0.iter()
    }

    pub fn into_vec(self) -> Vec<Diff<'a>> {
        self.0
    }
}

impl<'a> Display for Diffs<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, diff) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            Display::fmt(diff, f)?;
        }
        Ok(())
    }
}

enum Segment<'a> {
    Key(&'a str),
    Index(usize),
}

/// Returns the values of `desired` that `existing` doesn't have. The result is empty as long as
/// `existing` is a superset of `desired`, so fields the api server fills in never show up.
///
/// Arrays where every desired item is an object with a string `name` are compared as
/// associative arrays, matching items up by name instead of by position. Kubernetes uses these
/// for things like env vars and container ports, where order doesn't matter to us.
pub fn compare_values<'a>(existing: &'a Value, desired: &'a Value) -> Diffs<'a> {
    let mut diffs = Vec::new();
    let mut path = Vec::with_capacity(8);
    compare(&mut diffs, &mut path, existing, desired);
    Diffs(diffs)
}

/// Every path where the two values differ, in either direction. A path missing on one side is
/// reported with a null value on that side.
pub fn symmetric_diff<'a>(old: &'a Value, new: &'a Value) -> Diffs<'a> {
    let mut diffs = compare_values(old, new).0;
    for reversed in compare_values(new, old).0 {
        if !diffs.iter().any(|d| d.path == reversed.path) {
            diffs.push(Diff {
                path: reversed.path,
                existing: reversed.desired,
                desired: reversed.existing,
            });
        }
    }
    diffs.sort_by(|a, b| a.path.cmp(&b.path));
    Diffs(diffs)
}

fn compare<'a>(
    diffs: &mut Vec<Diff<'a>>,
    path: &mut Vec<Segment<'a>>,
    superset: &'a Value,
    subset: &'a Value,
) {
    match (superset, subset) {
        (Value::Object(ref super_map), Value::Object(ref sub_map)) => {
            compare_objects(diffs, path, super_map, sub_map);
        }
        (Value::Array(ref super_array), Value::Array(ref sub_array)) => {
            compare_arrays(diffs, path, super_array, sub_array);
        }
        (a, b) if a != b => {
            diffs.push(diff(&*path, a, b));
        }
        _ => {}
    }
}

fn compare_objects<'a>(
    diffs: &mut Vec<Diff<'a>>,
    path: &mut Vec<Segment<'a>>,
    existing: &'a JsonObject,
    desired: &'a JsonObject,
) {
    for (key, desired_val) in desired.iter() {
        path.push(Segment::Key(key));
        match existing.get(key) {
            Some(existing_val) => compare(diffs, path, existing_val, desired_val),
            None => diffs.push(diff(&*path, &Value::Null, desired_val)),
        }
        path.pop();
    }
}

fn item_name(item: &Value) -> Option<&str> {
    item.as_object()?.get("name")?.as_str()
}

fn compare_arrays<'a>(
    diffs: &mut Vec<Diff<'a>>,
    path: &mut Vec<Segment<'a>>,
    existing: &'a [Value],
    desired: &'a [Value],
) {
    let associative = !desired.is_empty() && desired.iter().all(|v| item_name(v).is_some());

    for (i, desired_item) in desired.iter().enumerate() {
        path.push(Segment::Index(i));
        let existing_item = if associative {
            let name = item_name(desired_item);
            existing.iter().find(|e| item_name(e) == name)
        } else {
            existing.get(i)
        };
        match existing_item {
            Some(existing_item) => compare(diffs, path, existing_item, desired_item),
            None => diffs.push(diff(&*path, &Value::Null, desired_item)),
        }
        path.pop();
    }
}

fn diff<'a>(path: &[Segment], existing: &'a Value, desired: &'a Value) -> Diff<'a> {
    let mut p = String::with_capacity(8);
    for s in path.iter() {
        match s {
            Segment::Key(k) => {
                p.push('.');
                p.push_str(k);
            }
            Segment::Index(i) => {
                let _ = write!(p, "[{}]", i);
            }
        }
    }
    Diff {
        path: p,
        existing,
        desired,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn superset_has_no_diffs() {
        let existing = json!({
            "metadata": {"name": "a", "resourceVersion": "7", "uid": "1"},
            "spec": {"replicas": 2}
        });
        let desired = json!({"metadata": {"name": "a"}, "spec": {"replicas": 2}});
        assert!(compare_values(&existing, &desired).is_empty());
    }

    #[test]
    fn returns_changed_and_missing_values() {
        let existing = json!({
            "key1": {"nested1": "same", "nested2": "existing2"},
            "key2": "here",
            "key3": 7
        });
        let desired = json!({
            "key1": {"nested1": "same", "nested2": "desired2"},
            "key3": 8,
            "newKey": true
        });

        let diffs = compare_values(&existing, &desired).into_vec();
        let paths = diffs.iter().map(|d| d.path.as_str()).collect::<Vec<_>>();
        assert_eq!(vec![".key1.nested2", ".key3", ".newKey"], paths);
        assert_eq!(&Value::Null, diffs[2].existing);
        assert_eq!(&json!(8), diffs[1].desired);
    }

    #[test]
    fn associative_arrays_match_by_name() {
        let existing = json!({"env": [
            {"name": "B", "value": "2"},
            {"name": "A", "value": "old"}
        ]});
        let desired = json!({"env": [
            {"name": "A", "value": "new"},
            {"name": "B", "value": "2"}
        ]});
        let diffs = compare_values(&existing, &desired).into_vec();
        assert_eq!(1, diffs.len());
        assert_eq!(".env[0].value", diffs[0].path);
        assert_eq!(&json!("old"), diffs[0].existing);
    }

    #[test]
    fn positional_arrays_compare_in_order() {
        let existing = json!({"args": ["-c", "run"]});
        let desired = json!({"args": ["-c", "start", "now"]});
        let diffs = compare_values(&existing, &desired);
        assert_eq!(2, diffs.len());
        assert_eq!(
            ".args[1]: -\"run\" +\"start\"\n.args[2]: -null +\"now\"",
            diffs.to_string()
        );
    }

    #[test]
    fn symmetric_diff_reports_removed_fields() {
        let old = json!({"brokered": {"className": "db", "planName": "small"}, "tags": ["a"]});
        let new = json!({"brokered": {"className": "db"}, "tags": ["a", "b"]});
        let diffs = symmetric_diff(&old, &new);
        assert_eq!(
            ".brokered.planName: -\"small\" +null\n.tags[1]: -null +\"b\"",
            diffs.to_string()
        );
        assert!(symmetric_diff(&old, &old).is_empty());
    }
}
