//! Conversions between message payloads (JSON) and Rhai values.

use rhai::Dynamic;
use serde_json::Value;

use super::error_code::ErrorCode;
use super::format::format_dynamic;

/// Resolve a path inside a JSON payload.
///
/// Accepts JSON pointers (`/data/items/0`) and dotted paths (`data.items.0`).
/// An empty path resolves to the payload itself.
pub fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return Some(value);
    }
    if path.starts_with('/') {
        return value.pointer(path);
    }

    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

pub fn json_to_dynamic(value: &Value) -> Dynamic {
    rhai::serde::to_dynamic(value).unwrap_or(Dynamic::UNIT)
}

/// Convert a cell value into a JSON payload.
///
/// Error values become their code string; anything that cannot be
/// represented falls back to its display form.
pub fn dynamic_to_json(value: &Dynamic) -> Value {
    if let Some(code) = ErrorCode::from_dynamic(value) {
        return Value::String(code.to_string());
    }
    if value.is_unit() {
        return Value::Null;
    }
    rhai::serde::from_dynamic::<Value>(value)
        .unwrap_or_else(|_| Value::String(format_dynamic(value)))
}
