//! Serde support for dependency reference lists
//!
//! Accepts `"a"`, `["a", "b"]` or `[{"identifier": "a"}, {"@id": "b"}]`.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    collect(value).map_err(D::Error::custom)
}

/// Normalize a raw reference value into identifiers
pub fn collect(value: Option<Value>) -> Result<Vec<String>, String> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(non_empty(s).into_iter().collect()),
        Some(Value::Array(items)) => {
            let mut refs = Vec::with_capacity(items.len());
            for item in items {
                if let Some(id) = reference_id(&item)? {
                    refs.push(id);
                }
            }
            Ok(refs)
        }
        Some(obj @ Value::Object(_)) => Ok(reference_id(&obj)?.into_iter().collect()),
        Some(other) => Err(format!("invalid dependency reference: {other}")),
    }
}

fn reference_id(item: &Value) -> Result<Option<String>, String> {
    match item {
        Value::String(s) => Ok(non_empty(s.clone())),
        Value::Object(map) => {
            let id = map
                .get("identifier")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .or_else(|| map.get("@id").and_then(Value::as_str));
            match id {
                Some(id) => Ok(non_empty(id.to_string())),
                None => Err("dependency reference object has no identifier or @id".to_string()),
            }
        }
        other => Err(format!("invalid dependency reference: {other}")),
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
