//! URL-encoded form bodies and query strings.
//!
//! Top-level members become `name=value` pairs. Text is written as-is,
//! numbers and booleans literally, and structural members as compact JSON.
//! Null members are skipped. Decoding reverses this: a value that parses as
//! JSON is taken as JSON, anything else is kept as text.

use crate::error::{CodecError, CodecResult};
use serde_json::{Map, Value};
use url::form_urlencoded;

/// Percent-encodes a single path segment.
///
/// Spaces become `%20` rather than the form-style `+`.
pub fn percent_encode(input: &str) -> String {
    form_urlencoded::byte_serialize(input.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Encodes a top-level mapping as `a=1&b=text`.
pub fn encode_form(value: &Value) -> CodecResult<String> {
    let members = match value {
        Value::Null => return Ok(String::new()),
        Value::Object(members) => members,
        _ => {
            return Err(CodecError::encoding_failed(
                "form encoding requires a mapping at the top level",
            ))
        }
    };

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (name, member) in members {
        let text = match member {
            Value::Null => continue,
            Value::String(text) => text.clone(),
            Value::Bool(_) | Value::Number(_) => member.to_string(),
            Value::Array(_) | Value::Object(_) => serde_json::to_string(member)
                .map_err(|e| CodecError::encoding_failed(e.to_string()))?,
        };
        serializer.append_pair(name, &text);
    }
    Ok(serializer.finish())
}

/// Decodes `a=1&b=text` into a mapping.
///
/// Malformed escapes are kept literally.
pub fn decode_form(input: &str) -> Value {
    let members: Map<String, Value> = form_urlencoded::parse(input.as_bytes())
        .map(|(name, text)| {
            let value = serde_json::from_str(&text)
                .unwrap_or_else(|_| Value::String(text.into_owned()));
            (name.into_owned(), value)
        })
        .collect();
    Value::Object(members)
}
