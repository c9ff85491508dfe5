use super::Dynamic;
use super::error_code::ErrorCode;

/// Format a Dynamic value for display.
pub fn format_dynamic(value: &Dynamic) -> String {
    if value.is_unit() {
        String::new()
    } else if let Some(code) = ErrorCode::from_dynamic(value) {
        code.to_string()
    } else if let Ok(n) = value.as_float() {
        format_number(n)
    } else if let Ok(n) = value.as_int() {
        n.to_string()
    } else if let Ok(b) = value.as_bool() {
        if b { "TRUE" } else { "FALSE" }.to_string()
    } else if value.is_string() {
        value.clone().into_string().unwrap_or_default()
    } else if value.is_map() || value.is_array() {
        rhai::serde::from_dynamic::<serde_json::Value>(value)
            .map(|json| json.to_string())
            .unwrap_or_else(|_| value.to_string())
    } else {
        value.to_string()
    }
}

/// Format a number for display.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "#NAN!".to_string()
    } else if n.is_infinite() {
        "#INF!".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e10 {
        format!("{:.0}", n)
    } else {
        format!("{:.2}", n)
    }
}

/// Spreadsheet truthiness, used by the condition column.
///
/// Errors, unit, `false`, zero and the empty string are falsy.
pub fn is_truthy(value: &Dynamic) -> bool {
    if value.is_unit() || ErrorCode::from_dynamic(value).is_some() {
        return false;
    }
    if let Ok(b) = value.as_bool() {
        return b;
    }
    if let Ok(n) = value.as_int() {
        return n != 0;
    }
    if let Ok(n) = value.as_float() {
        return n != 0.0 && !n.is_nan();
    }
    if value.is_string() {
        let s = value.clone().into_string().unwrap_or_default();
        return !s.is_empty() && !s.eq_ignore_ascii_case("false");
    }
    true
}
