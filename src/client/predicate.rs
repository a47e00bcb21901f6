use super::compare::symmetric_diff;
use crate::apis::{KubeObject, Labels, Resource};
use crate::error::Error;

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// A client side filter for objects
pub type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Modifies an object in place before it's written
pub type Mutator<T> = Arc<dyn Fn(&mut T) -> Result<(), Error> + Send + Sync>;

/// Combines a new object with the existing one during an upsert. Called as
/// `merge(new, existing)`, and whatever it returns is written.
pub type Merger<T> = Box<dyn Fn(T, &T) -> T + Send + Sync>;

/// Returns a predicate that matches only when every one of the given predicates does. An empty
/// list matches everything.
pub fn all_predicates<T: 'static>(predicates: Vec<Predicate<T>>) -> Predicate<T> {
    Arc::new(move |obj: &T| predicates.iter().all(|p| p(obj)))
}

pub fn label_equals_predicate<T: KubeObject>(key: &str, value: &str) -> Predicate<T> {
    let key = key.to_owned();
    let value = value.to_owned();
    Arc::new(move |obj: &T| obj.meta().labels.get(&key) == Some(&value))
}

pub fn labels_contains_predicate<T: KubeObject>(key: &str) -> Predicate<T> {
    let key = key.to_owned();
    Arc::new(move |obj: &T| obj.meta().labels.contains_key(&key))
}

/// Keeps the items that match the predicate
pub fn filter<T>(items: Vec<T>, predicate: &Predicate<T>) -> Vec<T> {
    items.into_iter().filter(|item| predicate(item)).collect()
}

/// Sets every one of the labels on the object, leaving other labels alone
pub fn label_set_mutator<T: KubeObject>(labels: Labels) -> Mutator<T> {
    Arc::new(move |obj: &mut T| {
        let existing = &mut obj.meta_mut().labels;
        for (k, v) in labels.iter() {
            existing.insert(k.clone(), v.clone());
        }
        Ok(())
    })
}

/// Mutators applied in order. The first error stops the rest from running.
pub struct MutatorList<T>(Vec<Mutator<T>>);

impl<T> Default for MutatorList<T> {
    fn default() -> MutatorList<T> {
        MutatorList(Vec::new())
    }
}

impl<T> Clone for MutatorList<T> {
    fn clone(&self) -> MutatorList<T> {
        MutatorList(self.0.clone())
    }
}

impl<T> From<Vec<Mutator<T>>> for MutatorList<T> {
    fn from(mutators: Vec<Mutator<T>>) -> MutatorList<T> {
        MutatorList(mutators)
    }
}

impl<T> MutatorList<T> {
    pub fn push(&mut self, mutator: Mutator<T>) {
        self.0.push(mutator);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn apply(&self, obj: &mut T) -> Result<(), Error> {
        for mutator in self.0.iter() {
            mutator(obj)?;
        }
        Ok(())
    }
}

/// Writes a human readable diff between two versions of an object. Prints `No changes` when
/// they're the same, otherwise a `<Kind> Diff (-left +right):` header followed by one line per
/// changed field.
pub fn format_diff<T, W>(
    out: &mut W,
    left_name: &str,
    right_name: &str,
    left: &T,
    right: &T,
) -> io::Result<()>
where
    T: Resource,
    W: Write + ?Sized,
{
    let left_value = serde_json::to_value(left).map_err(io::Error::from)?;
    let right_value = serde_json::to_value(right).map_err(io::Error::from)?;
    let diffs = symmetric_diff(&left_value, &right_value);
    if diffs.is_empty() {
        return writeln!(out, "No changes");
    }
    writeln!(
        out,
        "{} Diff (-{} +{}):",
        T::k8s_type().kind,
        left_name,
        right_name
    )?;
    writeln!(out, "{}", diffs)
}

/// Wraps a mutator so that every successful mutation writes the diff it made to `out`
pub fn diff_wrapper<T, W>(out: Arc<Mutex<W>>, mutator: Mutator<T>) -> Mutator<T>
where
    T: Resource,
    W: Write + Send + 'static,
{
    Arc::new(move |obj: &mut T| {
        let before = obj.clone();
        mutator(obj)?;
        let mut out = out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        format_diff(&mut *out, "old", "new", &before, obj)?;
        Ok(())
    })
}
