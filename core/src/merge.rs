//! JSON document composition
//!
//! Objects merge recursively, arrays concatenate (base items first) and any
//! other overlay value replaces the base value.

use serde_json::{Map, Value};

/// Merge `overlay` on top of `base`
pub fn merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            let mut result: Map<String, Value> = base.clone();
            for (key, value) in overlay {
                let merged = match result.get(key) {
                    Some(existing) => merge(existing, value),
                    None => value.clone(),
                };
                result.insert(key.clone(), merged);
            }
            Value::Object(result)
        }
        (Value::Array(base), Value::Array(overlay)) => {
            let mut result = base.clone();
            result.extend(overlay.iter().cloned());
            Value::Array(result)
        }
        (_, overlay) => overlay.clone(),
    }
}

/// Fold `docs` left to right, starting from an empty object
pub fn merge_all<'a, I>(docs: I) -> Value
where
    I: IntoIterator<Item = &'a Value>,
{
    docs.into_iter()
        .fold(Value::Object(Map::new()), |acc, doc| merge(&acc, doc))
}
