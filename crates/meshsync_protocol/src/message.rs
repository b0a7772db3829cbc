//! Transport request and response records.

use crate::status::{Method, Status};
use bytes::Bytes;
use meshsync_codec::MimeType;
use std::collections::BTreeMap;

/// One outgoing call.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    /// HTTP method.
    pub method: Method,
    /// Resolved URL, including the query string for GET payloads.
    pub url: String,
    /// Encoding of `body`.
    pub content_type: MimeType,
    /// Encoded payload, absent for GET and for calls without data.
    pub body: Option<Bytes>,
    /// Request headers.
    pub headers: BTreeMap<String, String>,
}

impl TransportRequest {
    /// Creates a request with no body or headers.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            content_type: MimeType::Json,
            body: None,
            headers: BTreeMap::new(),
        }
    }

    /// Sets the body and its encoding.
    #[must_use]
    pub fn with_body(mut self, content_type: MimeType, body: Bytes) -> Self {
        self.content_type = content_type;
        self.body = Some(body);
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Returns the path component of the URL, without the query string.
    pub fn path(&self) -> &str {
        self.url.split('?').next().unwrap_or_default()
    }

    /// Returns the raw query string, if any.
    pub fn query_string(&self) -> Option<&str> {
        self.url.split_once('?').map(|(_, query)| query)
    }
}

/// A successful (2xx) response.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    /// Numeric status code.
    pub status: u16,
    /// Content type header value, if any.
    pub content_type: Option<String>,
    /// Raw body.
    pub body: Bytes,
}

impl TransportResponse {
    /// Creates a response.
    pub fn new(status: u16, content_type: Option<String>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type,
            body: body.into(),
        }
    }

    /// Creates a JSON response.
    pub fn json(status: u16, body: impl Into<Bytes>) -> Self {
        Self::new(status, Some(MimeType::Json.as_str().to_string()), body)
    }

    /// Returns the known status, if the code is in the taxonomy.
    pub fn known_status(&self) -> Option<Status> {
        Status::from_code(self.status).ok()
    }
}

/// A failed call: a non-2xx response or a network error.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportFailure {
    /// Status code, absent for network errors.
    pub status: Option<u16>,
    /// Content type header value, if any.
    pub content_type: Option<String>,
    /// Raw error body.
    pub body: Bytes,
    /// Description of the failure.
    pub message: String,
}

impl TransportFailure {
    /// A failure with no response at all.
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            content_type: None,
            body: Bytes::new(),
            message: message.into(),
        }
    }

    /// A failure built from a non-2xx response.
    pub fn from_response(response: TransportResponse) -> Self {
        let message = match response.known_status() {
            Some(status) => status.to_string(),
            None => format!("status {}", response.status),
        };
        Self {
            status: Some(response.status),
            content_type: response.content_type,
            body: response.body,
            message,
        }
    }

    /// Returns true if the error body is declared as JSON.
    pub fn has_json_body(&self) -> bool {
        self.content_type.as_deref().is_some_and(MimeType::is_json)
    }
}
