//! Flattening of nested secret payloads into property-style keys.
//!
//! `{"db": {"hosts": ["a", "b"], "port": 5432}}` becomes
//! `db.hosts[0] = a`, `db.hosts[1] = b`, `db.port = 5432`. Nulls are skipped.

use serde_json::Value;
use std::collections::BTreeMap;

/// Flatten a JSON value into a sorted `key -> value` map.
pub fn flatten_json(value: &Value) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten_into(key.clone(), child, &mut out);
            }
        }
        // A bare scalar or array has no natural key.
        other => flatten_into(String::new(), other, &mut out),
    }
    out
}

fn flatten_into(prefix: String, value: &Value, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
                flatten_into(path, child, out);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                flatten_into(format!("{prefix}[{index}]"), child, out);
            }
        }
        Value::String(s) => {
            out.insert(prefix, s.clone());
        }
        Value::Bool(b) => {
            out.insert(prefix, b.to_string());
        }
        Value::Number(n) => {
            out.insert(prefix, n.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_nested_objects_and_arrays() {
        let flat = flatten_json(&json!({
            "db": { "hosts": ["a", "b"], "port": 5432, "tls": true },
            "user": "app"
        }));

        assert_eq!(flat.get("db.hosts[0]").map(String::as_str), Some("a"));
        assert_eq!(flat.get("db.hosts[1]").map(String::as_str), Some("b"));
        assert_eq!(flat.get("db.port").map(String::as_str), Some("5432"));
        assert_eq!(flat.get("db.tls").map(String::as_str), Some("true"));
        assert_eq!(flat.get("user").map(String::as_str), Some("app"));
        assert_eq!(flat.len(), 5);
    }

    #[test]
    fn test_flatten_skips_nulls() {
        let flat = flatten_json(&json!({ "a": null, "b": { "c": null }, "d": "x" }));
        assert_eq!(flat.len(), 1);
        assert!(flat.contains_key("d"));
    }

    #[test]
    fn test_flatten_kv2_shape() {
        let flat = flatten_json(&json!({
            "data": { "api_key": "k" },
            "metadata": { "version": 3 }
        }));
        assert_eq!(flat.get("data.api_key").map(String::as_str), Some("k"));
        assert_eq!(flat.get("metadata.version").map(String::as_str), Some("3"));
    }
}
