//! Methods and the response status taxonomy.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// HTTP method of a remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// Read.
    Get,
    /// Create.
    Post,
    /// Full replace.
    Put,
    /// Partial update.
    Patch,
    /// Delete.
    Delete,
}

impl Method {
    /// Returns the method name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Returns true if the payload travels in the query string.
    pub const fn uses_query_string(&self) -> bool {
        matches!(self, Method::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            _ => Err(ProtocolError::UnknownMethod(s.to_string())),
        }
    }
}

/// Family of a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusFamily {
    /// 2xx.
    Success,
    /// 4xx.
    ClientError,
    /// 5xx.
    ServerError,
}

/// A response status known to the resource API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// 200.
    Ok,
    /// 201.
    Created,
    /// 202.
    Accepted,
    /// 203, a subset of the requested data.
    Subset,
    /// 206.
    Partial,
    /// 400.
    BadRequest,
    /// 403.
    Forbidden,
    /// 404.
    NotFound,
    /// 406, the request failed validation.
    Invalid,
    /// 409.
    Conflict,
    /// 410.
    Gone,
    /// 500.
    ServerError,
    /// 501.
    Unimplemented,
    /// 502.
    BadGateway,
    /// 503.
    Unavailable,
}

const ALL: [Status; 15] = [
    Status::Ok,
    Status::Created,
    Status::Accepted,
    Status::Subset,
    Status::Partial,
    Status::BadRequest,
    Status::Forbidden,
    Status::NotFound,
    Status::Invalid,
    Status::Conflict,
    Status::Gone,
    Status::ServerError,
    Status::Unimplemented,
    Status::BadGateway,
    Status::Unavailable,
];

impl Status {
    /// Returns the numeric code.
    pub const fn code(&self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::Created => 201,
            Status::Accepted => 202,
            Status::Subset => 203,
            Status::Partial => 206,
            Status::BadRequest => 400,
            Status::Forbidden => 403,
            Status::NotFound => 404,
            Status::Invalid => 406,
            Status::Conflict => 409,
            Status::Gone => 410,
            Status::ServerError => 500,
            Status::Unimplemented => 501,
            Status::BadGateway => 502,
            Status::Unavailable => 503,
        }
    }

    /// Looks up a status by numeric code.
    pub fn from_code(code: u16) -> ProtocolResult<Self> {
        ALL.iter()
            .copied()
            .find(|status| status.code() == code)
            .ok_or(ProtocolError::UnknownStatus(code))
    }

    /// Returns the symbolic token exposed on saved entities.
    pub const fn token(&self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::Created => "created",
            Status::Accepted => "accepted",
            Status::Subset => "subset",
            Status::Partial => "partial",
            Status::BadRequest => "bad-request",
            Status::Forbidden => "forbidden",
            Status::NotFound => "not-found",
            Status::Invalid => "invalid",
            Status::Conflict => "conflict",
            Status::Gone => "gone",
            Status::ServerError => "server-error",
            Status::Unimplemented => "unimplemented",
            Status::BadGateway => "bad-gateway",
            Status::Unavailable => "unavailable",
        }
    }

    /// Looks up a status by symbolic token.
    pub fn from_token(token: &str) -> Option<Self> {
        ALL.iter().copied().find(|status| status.token() == token)
    }

    /// Returns the status family.
    pub const fn family(&self) -> StatusFamily {
        match self.code() {
            200..=299 => StatusFamily::Success,
            400..=499 => StatusFamily::ClientError,
            _ => StatusFamily::ServerError,
        }
    }

    /// Returns true for the success family.
    pub const fn is_success(&self) -> bool {
        matches!(self.family(), StatusFamily::Success)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.token())
    }
}

/// Returns true if `code` is in the 2xx range, known or not.
pub const fn is_success_code(code: u16) -> bool {
    code >= 200 && code < 300
}
