//! Shared helpers for the tool modules.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::envelope::ToolError;

/// Deserialize MCP `arguments` into a tool's argument struct. `null` counts
/// as an empty object so tools without required parameters accept it.
pub fn parse_args<T: DeserializeOwned>(arguments: Value) -> Result<T, ToolError> {
    let arguments = match arguments {
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other,
    };
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArgument(e.to_string()))
}

/// Array field of a response, empty when missing.
pub fn extract_array(response: &Value, field: &str) -> Vec<Value> {
    response
        .get(field)
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
}

/// String field of a JSON object, or `default`.
pub fn str_or<'a>(value: &'a Value, field: &str, default: &'a str) -> &'a str {
    value.get(field).and_then(|v| v.as_str()).unwrap_or(default)
}

/// Percent-encode one path segment (file ids, calendar ids, ranges).
pub fn segment(raw: &str) -> String {
    urlencoding::encode(raw).into_owned()
}

/// `1234567` → `1,234,567`
pub fn with_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Args {
        #[serde(default = "ten")]
        n: u32,
    }

    fn ten() -> u32 {
        10
    }

    #[test]
    fn test_parse_args_null_uses_defaults() {
        let args: Args = parse_args(Value::Null).unwrap();
        assert_eq!(args.n, 10);
    }

    #[test]
    fn test_parse_args_rejects_wrong_type() {
        let err = parse_args::<Args>(json!({"n": "many"})).err().unwrap();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[test]
    fn test_thousands() {
        assert_eq!(with_thousands(0), "0");
        assert_eq!(with_thousands(999), "999");
        assert_eq!(with_thousands(1000), "1,000");
        assert_eq!(with_thousands(1234567), "1,234,567");
    }

    #[test]
    fn test_segment_escapes_slashes() {
        assert_eq!(segment("a/b c"), "a%2Fb%20c");
    }
}
