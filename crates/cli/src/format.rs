//! Output → string formatting.
//!
//! Records and UDF results print as pretty JSON; info responses print one
//! `name<TAB>value` line per entry.

use std::collections::BTreeMap;

use aerie_core::{Error, Record, Value};

/// Format a record with its metadata.
pub fn format_record(record: &Record) -> String {
    let bins: serde_json::Map<String, serde_json::Value> = record
        .bins
        .iter()
        .map(|(name, v)| (name.clone(), serde_json::Value::from(v.clone())))
        .collect();
    let key = record
        .key
        .user_key()
        .map(|k| serde_json::Value::from(Value::from(k.clone())))
        .unwrap_or(serde_json::Value::Null);
    let doc = serde_json::json!({
        "namespace": record.key.namespace(),
        "set": record.key.set(),
        "key": key,
        "generation": record.metadata.generation,
        "ttl": record.metadata.ttl,
        "bins": bins,
    });
    pretty(&doc)
}

/// Format a single value.
pub fn format_value(value: &Value) -> String {
    pretty(&serde_json::Value::from(value.clone()))
}

/// Format info name/value pairs.
pub fn format_info(map: &BTreeMap<String, String>) -> String {
    map.iter()
        .map(|(name, value)| {
            if value.is_empty() {
                name.clone()
            } else {
                format!("{}\t{}", name, value)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Format an error.
pub fn format_error(err: &Error) -> String {
    format!("(error) {}: {}", err.result_code(), err)
}

fn pretty(v: &serde_json::Value) -> String {
    serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aerie_core::{bins, Key, Metadata, ResultCode};

    #[test]
    fn test_format_record() {
        let record = Record::new(
            Key::new("test", "demo", 7).unwrap(),
            bins! { "a" => 1, "b" => "x" },
            Metadata {
                generation: 2,
                ttl: 100,
                last_update_time: 0,
            },
        );
        let out = format_record(&record);
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["key"], 7);
        assert_eq!(parsed["generation"], 2);
        assert_eq!(parsed["bins"]["a"], 1);
        assert_eq!(parsed["bins"]["b"], "x");
    }

    #[test]
    fn test_format_info_lines() {
        let mut map = BTreeMap::new();
        map.insert("build".to_string(), "1.0".to_string());
        map.insert("node".to_string(), "A1".to_string());
        map.insert("status".to_string(), String::new());
        assert_eq!(format_info(&map), "build\t1.0\nnode\tA1\nstatus");
    }

    #[test]
    fn test_format_error_names_code() {
        let err = Error::from_code(ResultCode::RecordNotFound);
        assert!(format_error(&err).starts_with("(error) "));
    }
}
