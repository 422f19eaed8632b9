//! Info protocol
//!
//! Info requests are newline-separated command names in a type 1 frame.
//! The response echoes each command followed by a tab and its value:
//!
//! ```text
//! request:  "node\npartition-generation\n"
//! response: "node\tBB9000000000001\npartition-generation\t7\n"
//! ```
//!
//! Many values are themselves `k=v;k=v` lists, parsed by [`parse_pairs`].

use std::collections::BTreeMap;

use bytes::Bytes;

use aerie_core::{Error, Result};

use crate::proto::{Frame, ProtoType};

/// Encode an info request frame for the given commands.
pub fn encode_info_request(commands: &[&str]) -> Result<Bytes> {
    let mut body = String::new();
    for c in commands {
        if c.contains('\n') || c.contains('\t') {
            return Err(Error::parameter(format!(
                "info command contains a separator: {:?}",
                c
            )));
        }
        body.push_str(c);
        body.push('\n');
    }
    Ok(Frame::new(ProtoType::Info, body.into_bytes()).to_bytes())
}

/// Split an info request payload into command names.
pub fn parse_info_request(payload: &[u8]) -> Result<Vec<String>> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| Error::protocol(format!("info request is not UTF-8: {}", e)))?;
    Ok(text
        .split('\n')
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Encode an info response frame from `(command, value)` pairs.
pub fn encode_info_response<'a, I>(entries: I) -> Bytes
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut body = String::new();
    for (name, value) in entries {
        body.push_str(name);
        body.push('\t');
        body.push_str(value);
        body.push('\n');
    }
    Frame::new(ProtoType::Info, body.into_bytes()).to_bytes()
}

/// Parse an info response payload into a command to value map.
///
/// A line without a tab maps to an empty value.
pub fn parse_info_response(payload: &[u8]) -> Result<BTreeMap<String, String>> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| Error::protocol(format!("info response is not UTF-8: {}", e)))?;
    let mut out = BTreeMap::new();
    for line in text.split('\n').filter(|l| !l.is_empty()) {
        match line.split_once('\t') {
            Some((name, value)) => out.insert(name.to_string(), value.to_string()),
            None => out.insert(line.to_string(), String::new()),
        };
    }
    Ok(out)
}

/// Parse a `k=v;k=v` value. Entries without `=` are skipped.
pub fn parse_pairs(value: &str) -> BTreeMap<String, String> {
    value
        .split(';')
        .filter_map(|kv| kv.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// Error carried in an info value, if any.
///
/// Servers report failures as `FAIL:<code>:<message>` or `ERROR:<code>:<message>`.
pub fn info_error(value: &str) -> Option<Error> {
    let rest = value
        .strip_prefix("FAIL:")
        .or_else(|| value.strip_prefix("ERROR:"))?;
    let (code, message) = rest.split_once(':').unwrap_or((rest, ""));
    let code = code.trim().parse::<i32>().unwrap_or(1);
    Some(Error::server(
        aerie_core::ResultCode::from_code(code),
        message.trim().to_string(),
    ))
}
