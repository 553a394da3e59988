//! Compact rendering of JSON values for log lines.

use serde_json::Value;

const MAX_STRING_CHARS: usize = 50;
const TRUNCATED_CHARS: usize = 47;

/// Render a value briefly: long strings are cut, containers show only their shape.
pub fn summarize(value: &Value) -> String {
    match value {
        Value::String(s) if s.chars().count() > MAX_STRING_CHARS => {
            let cut: String = s.chars().take(TRUNCATED_CHARS).collect();
            quote(&format!("{cut}..."))
        }
        Value::String(s) => quote(s),
        Value::Array(items) => format!("Array({})", items.len()),
        Value::Object(_) => "Object".to_owned(),
        Value::Null | Value::Bool(_) | Value::Number(_) => value.to_string(),
    }
}

/// Render a parameter map as `key: summary, ...`.
pub fn summarize_params(params: Option<&Value>) -> String {
    match params {
        None => String::new(),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| format!("{k}: {}", summarize(v)))
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => summarize(other),
    }
}

fn quote(s: &str) -> String {
    Value::String(s.to_owned()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn short_string_quoted() {
        assert_eq!(summarize(&json!("1+2")), r#""1+2""#);
    }

    #[test]
    fn long_string_truncated() {
        let long = "x".repeat(60);
        let out = summarize(&json!(long));
        assert_eq!(out, format!("\"{}...\"", "x".repeat(47)));
    }

    #[test]
    fn exactly_fifty_chars_kept() {
        let s = "y".repeat(50);
        assert_eq!(summarize(&json!(s)), format!("\"{s}\""));
    }

    #[test]
    fn truncation_counts_chars_not_bytes() {
        let s = "é".repeat(60);
        let out = summarize(&json!(s));
        assert_eq!(out, format!("\"{}...\"", "é".repeat(47)));
    }

    #[test]
    fn scalars_and_containers() {
        assert_eq!(summarize(&json!(42)), "42");
        assert_eq!(summarize(&json!(true)), "true");
        assert_eq!(summarize(&Value::Null), "null");
        assert_eq!(summarize(&json!([1, 2, 3])), "Array(3)");
        assert_eq!(summarize(&json!({"a": 1})), "Object");
    }

    #[test]
    fn params_listing() {
        let params = json!({"expression": "1+2", "frame": 0});
        let out = summarize_params(Some(&params));
        assert!(out.contains(r#"expression: "1+2""#));
        assert!(out.contains("frame: 0"));
        assert_eq!(summarize_params(None), "");
    }
}
