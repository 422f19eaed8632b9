//! String → Value parsing rules.
//!
//! Arguments are auto-typed in this order:
//! 1. JSON structures (`{`, `[`, `"`) → parse as JSON
//! 2. `null` → Value::Null
//! 3. `true` / `false` → Value::Bool
//! 4. Integer pattern → Value::Int
//! 5. Float pattern → Value::Float
//! 6. Everything else → Value::String

use aerie_core::{Bins, UserKey, Value};

/// Auto-detect value type from a user-supplied string.
pub fn parse_value(s: &str) -> Value {
    if s.starts_with('{') || s.starts_with('[') || s.starts_with('"') {
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(s) {
            return Value::from(json);
        }
    }

    match s {
        "null" => return Value::Null,
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }

    if is_integer(s) {
        if let Ok(i) = s.parse::<i64>() {
            return Value::Int(i);
        }
    }

    if is_float(s) {
        if let Ok(f) = s.parse::<f64>() {
            return Value::Float(f);
        }
    }

    Value::String(s.to_string())
}

/// User key from an argument: integers stay integers, anything else is a
/// string key.
pub fn parse_user_key(s: &str) -> UserKey {
    if is_integer(s) {
        if let Ok(i) = s.parse::<i64>() {
            return UserKey::Int(i);
        }
    }
    UserKey::String(s.to_string())
}

/// Bins from a JSON object such as `{"a": 1, "b": "x"}`.
pub fn parse_bins(s: &str) -> Result<Bins, String> {
    let json: serde_json::Value =
        serde_json::from_str(s).map_err(|e| format!("Invalid JSON: {}", e))?;
    match json {
        serde_json::Value::Object(obj) => Ok(obj
            .into_iter()
            .map(|(name, v)| (name, Value::from(v)))
            .collect()),
        other => Err(format!(
            "Bins must be a JSON object, got {}",
            json_type_name(&other)
        )),
    }
}

fn json_type_name(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

fn is_integer(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn is_float(s: &str) -> bool {
    let body = s.strip_prefix('-').unwrap_or(s);
    if body.is_empty() || !body.bytes().next().is_some_and(|b| b.is_ascii_digit()) {
        return false;
    }
    let mut seen_dot = false;
    let mut seen_exp = false;
    let mut prev = b'0';
    for b in body.bytes() {
        match b {
            b'0'..=b'9' => {}
            b'.' if !seen_dot && !seen_exp => seen_dot = true,
            b'e' | b'E' if !seen_exp => seen_exp = true,
            b'+' | b'-' if prev == b'e' || prev == b'E' => {}
            _ => return false,
        }
        prev = b;
    }
    prev.is_ascii_digit()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_rules() {
        assert_eq!(parse_value("null"), Value::Null);
        assert_eq!(parse_value("true"), Value::Bool(true));
        assert_eq!(parse_value("-42"), Value::Int(-42));
        assert_eq!(parse_value("1.5"), Value::Float(1.5));
        assert_eq!(parse_value("2e3"), Value::Float(2000.0));
        assert_eq!(parse_value("hello"), Value::String("hello".into()));
        assert_eq!(parse_value("\"42\""), Value::String("42".into()));
        assert_eq!(
            parse_value("[1, \"a\"]"),
            Value::List(vec![Value::Int(1), Value::String("a".into())])
        );
    }

    #[test]
    fn test_malformed_json_falls_back_to_string() {
        assert_eq!(parse_value("{oops"), Value::String("{oops".into()));
        assert_eq!(parse_value("1.2.3"), Value::String("1.2.3".into()));
        assert_eq!(parse_value("-"), Value::String("-".into()));
    }

    #[test]
    fn test_parse_user_key() {
        assert_eq!(parse_user_key("7"), UserKey::Int(7));
        assert_eq!(parse_user_key("user-7"), UserKey::String("user-7".into()));
        assert_eq!(
            parse_user_key("99999999999999999999"),
            UserKey::String("99999999999999999999".into())
        );
    }

    #[test]
    fn test_parse_bins() {
        let bins = parse_bins(r#"{"a": 1, "b": "x", "c": [true]}"#).unwrap();
        assert_eq!(bins["a"], Value::Int(1));
        assert_eq!(bins["b"], Value::String("x".into()));
        assert_eq!(bins["c"], Value::List(vec![Value::Bool(true)]));

        let err = parse_bins("[1]").unwrap_err();
        assert!(err.contains("an array"));
        assert!(parse_bins("{").is_err());
    }
}
