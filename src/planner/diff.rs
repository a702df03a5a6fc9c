//! Attribute diffing between a recorded resource and a desired deployable.
//!
//! Only keys present in both snapshots are compared. Lists are compared as
//! sets so that reordering a list of domains or origins is not a change.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::params::{Params, diffable};

/// Keys that change between runs without describing the resource itself.
pub const VOLATILE_KEYS: &[&str] = &["reference"];

/// A single changed attribute.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamChange {
    /// Recorded value.
    pub old: Value,
    /// Desired value.
    pub new: Value,
}

/// Changed attributes keyed by name.
pub type ParamDiff = BTreeMap<String, ParamChange>;

/// Compares two attribute snapshots.
#[must_use]
pub fn diff_params(current: &Params, desired: &Params) -> ParamDiff {
    current
        .iter()
        .filter(|(key, _)| !VOLATILE_KEYS.contains(&key.as_str()))
        .filter_map(|(key, old)| {
            let new = desired.get(key)?;
            (diffable(old) != diffable(new)).then(|| {
                (
                    key.clone(),
                    ParamChange {
                        old: old.clone(),
                        new: new.clone(),
                    },
                )
            })
        })
        .collect()
}

/// Drops ignored keys from a diff.
#[must_use]
pub fn without_ignored(mut diff: ParamDiff, ignored: &BTreeSet<String>) -> ParamDiff {
    diff.retain(|key, _| !ignored.contains(key));
    diff
}

/// Returns whether any changed key forces a replacement.
#[must_use]
pub fn requires_replacement(diff: &ParamDiff, triggers: &BTreeSet<String>) -> bool {
    diff.keys().any(|key| triggers.contains(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_only_shared_keys_are_compared() {
        let current = params(json!({"size": "t2.micro", "storage": 10}));
        let desired = params(json!({"size": "t2.large", "port": 80}));

        let diff = diff_params(&current, &desired);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff["size"].old, json!("t2.micro"));
        assert_eq!(diff["size"].new, json!("t2.large"));
    }

    #[test]
    fn test_lists_compare_as_sets() {
        let current = params(json!({"domains": ["a.com", "b.com"]}));
        let desired = params(json!({"domains": ["b.com", "a.com", "a.com"]}));
        assert!(diff_params(&current, &desired).is_empty());
    }

    #[test]
    fn test_reference_is_volatile() {
        let current = params(json!({"reference": "abc123"}));
        let desired = params(json!({"reference": "def456"}));
        assert!(diff_params(&current, &desired).is_empty());
    }

    #[test]
    fn test_ignored_keys_and_triggers() {
        let current = params(json!({"name": "app-1", "storage": 10, "size": "t2.micro"}));
        let desired = params(json!({"name": "app-2", "storage": 20, "size": "t2.micro"}));

        let ignored: BTreeSet<String> = ["name".to_string()].into();
        let diff = without_ignored(diff_params(&current, &desired), &ignored);
        assert_eq!(diff.keys().collect::<Vec<_>>(), vec!["storage"]);

        let triggers: BTreeSet<String> = ["storage".to_string()].into();
        assert!(requires_replacement(&diff, &triggers));
        assert!(!requires_replacement(&diff, &BTreeSet::new()));
    }
}
