//! Attribute maps shared by deployables and resources.
//!
//! Attribute values are schema-driven at runtime, so they are carried as
//! JSON values. Keys are kept sorted for deterministic serialization.

use serde_json::{Map, Value};

/// A flat attribute map.
pub type Params = Map<String, Value>;

/// Returns whether a value counts as set.
///
/// `null`, `false`, zero, empty strings and empty collections are unset.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Returns whether a value is missing for validation purposes.
///
/// Unlike [`is_truthy`], explicit `false` and `0` count as present.
#[must_use]
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(_) | Value::Number(_) => false,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

/// Normalizes a value so that lists compare as sets.
#[must_use]
pub fn diffable(value: &Value) -> Value {
    match value {
        Value::Array(items) => {
            let mut normalized: Vec<Value> = items.iter().map(diffable).collect();
            normalized.sort_by_cached_key(Value::to_string);
            normalized.dedup();
            Value::Array(normalized)
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), diffable(item)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Returns a string attribute, if set.
#[must_use]
pub fn get_str<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Renders a scalar for display.
#[must_use]
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!([])));
        assert!(is_truthy(&json!("secret")));
        assert!(is_truthy(&json!(3306)));
    }

    #[test]
    fn test_blank_keeps_explicit_false() {
        assert!(!is_blank(&json!(false)));
        assert!(!is_blank(&json!(0)));
        assert!(is_blank(&json!({})));
    }

    #[test]
    fn test_lists_compare_as_sets() {
        let a = json!({"domains": ["b.example.com", "a.example.com"]});
        let b = json!({"domains": ["a.example.com", "b.example.com", "a.example.com"]});
        assert_eq!(diffable(&a), diffable(&b));
    }

    #[test]
    fn test_get_str_skips_empty() {
        let mut params = Params::new();
        params.insert("name".to_string(), json!(""));
        params.insert("kind".to_string(), json!("mysql"));
        assert_eq!(get_str(&params, "name"), None);
        assert_eq!(get_str(&params, "kind"), Some("mysql"));
    }
}
