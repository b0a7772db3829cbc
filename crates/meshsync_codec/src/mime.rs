//! Body mimetypes and their wire encodings.

use crate::error::{CodecError, CodecResult};
use crate::form::{decode_form, encode_form};
use bytes::Bytes;
use serde_json::Value;
use std::fmt;

/// A body encoding understood by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MimeType {
    /// `application/json`.
    #[default]
    Json,
    /// `application/cbor`.
    Cbor,
    /// `application/x-www-form-urlencoded`.
    UrlEncoded,
}

impl MimeType {
    /// Returns the content type string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MimeType::Json => "application/json",
            MimeType::Cbor => "application/cbor",
            MimeType::UrlEncoded => "application/x-www-form-urlencoded",
        }
    }

    /// Parses a `Content-Type` header value, ignoring parameters.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/json" => Some(MimeType::Json),
            "application/cbor" => Some(MimeType::Cbor),
            "application/x-www-form-urlencoded" => Some(MimeType::UrlEncoded),
            _ => None,
        }
    }

    /// Returns true if the header value names a JSON body.
    pub fn is_json(content_type: &str) -> bool {
        Self::from_content_type(content_type) == Some(MimeType::Json)
    }

    /// Encodes a value into a body.
    pub fn encode(&self, value: &Value) -> CodecResult<Bytes> {
        match self {
            MimeType::Json => serde_json::to_vec(value)
                .map(Bytes::from)
                .map_err(|e| CodecError::encoding_failed(e.to_string())),
            MimeType::Cbor => {
                let mut buf = Vec::new();
                ciborium::ser::into_writer(value, &mut buf)
                    .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
                Ok(Bytes::from(buf))
            }
            MimeType::UrlEncoded => encode_form(value).map(Bytes::from),
        }
    }

    /// Decodes a body into a value. An empty body decodes to null.
    pub fn decode(&self, body: &[u8]) -> CodecResult<Value> {
        if body.is_empty() {
            return Ok(Value::Null);
        }
        match self {
            MimeType::Json => serde_json::from_slice(body)
                .map_err(|e| CodecError::decoding_failed(e.to_string())),
            MimeType::Cbor => ciborium::de::from_reader(body)
                .map_err(|e| CodecError::decoding_failed(e.to_string())),
            MimeType::UrlEncoded => {
                let text = std::str::from_utf8(body)
                    .map_err(|_| CodecError::decoding_failed("form body is not UTF-8"))?;
                Ok(decode_form(text))
            }
        }
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
