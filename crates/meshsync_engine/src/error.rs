//! Error types for the sync engine.

use meshsync_codec::{CodecError, ValidationError};
use meshsync_protocol::ProtocolError;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Errors are `Clone` because a single failure settles every caller
/// waiting on a shared result handle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// The operation needs a durable identity and the entity has none.
    #[error("operation requires a durable identity")]
    MissingIdentity,

    /// A value failed schema validation before anything was sent.
    #[error("validation failed: {0}")]
    Validation(ValidationError),

    /// The call failed: a non-2xx response or a network error.
    #[error("transport error: {message}")]
    Transport {
        /// Response status, absent for network errors.
        status: Option<u16>,
        /// Parsed error body, present only for JSON error responses.
        body: Option<Value>,
        /// Description of the failure.
        message: String,
    },

    /// A poll did not settle within its time budget.
    #[error("operation timed out")]
    Timeout,

    /// Two distinct instances claimed the same durable identity.
    #[error("identity {id} of resource {resource} is already held by another instance")]
    Conflict {
        /// Resource name.
        resource: String,
        /// Conflicting identity.
        id: String,
    },

    /// The resource has no channel with this name.
    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    /// A response did not have the expected shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A body could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The entity has been destroyed.
    #[error("entity has been destroyed")]
    Destroyed,
}

/// Symbolic kind of a [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// `missing-identity`.
    MissingIdentity,
    /// `validation-error`.
    Validation,
    /// `transport-error`.
    Transport,
    /// `timeout`.
    Timeout,
    /// `conflict`.
    Conflict,
    /// `unknown-channel`.
    UnknownChannel,
    /// `protocol-error`.
    Protocol,
    /// `codec-error`.
    Codec,
    /// `destroyed`.
    Destroyed,
}

impl ErrorKind {
    /// Returns the kind token.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingIdentity => "missing-identity",
            ErrorKind::Validation => "validation-error",
            ErrorKind::Transport => "transport-error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Conflict => "conflict",
            ErrorKind::UnknownChannel => "unknown-channel",
            ErrorKind::Protocol => "protocol-error",
            ErrorKind::Codec => "codec-error",
            ErrorKind::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SyncError {
    /// Creates a transport error for a call that never got a response.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Transport {
            status: None,
            body: None,
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Returns the symbolic kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::MissingIdentity => ErrorKind::MissingIdentity,
            SyncError::Validation(_) => ErrorKind::Validation,
            SyncError::Transport { .. } => ErrorKind::Transport,
            SyncError::Timeout => ErrorKind::Timeout,
            SyncError::Conflict { .. } => ErrorKind::Conflict,
            SyncError::UnknownChannel(_) => ErrorKind::UnknownChannel,
            SyncError::Protocol(_) => ErrorKind::Protocol,
            SyncError::Codec(_) => ErrorKind::Codec,
            SyncError::Destroyed => ErrorKind::Destroyed,
        }
    }

    /// Returns the structured validation tree, if this is a validation error.
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            SyncError::Validation(err) => Some(err),
            _ => None,
        }
    }

    /// Returns true if repeating the operation may succeed.
    ///
    /// The engine never retries on its own; this is a hint for callers.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { status, .. } => status.map_or(true, |code| code >= 500),
            SyncError::Timeout => true,
            _ => false,
        }
    }
}

impl From<CodecError> for SyncError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Validation(err) => SyncError::Validation(err),
            other => SyncError::Codec(other.to_string()),
        }
    }
}

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        SyncError::Validation(err)
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tokens() {
        assert_eq!(SyncError::MissingIdentity.kind().as_str(), "missing-identity");
        assert_eq!(
            SyncError::Validation(ValidationError::token("invalid")).kind().as_str(),
            "validation-error"
        );
        assert_eq!(SyncError::network("refused").kind().as_str(), "transport-error");
        assert_eq!(SyncError::Timeout.kind().as_str(), "timeout");
        assert_eq!(
            SyncError::Conflict {
                resource: "item".into(),
                id: "1".into()
            }
            .kind()
            .as_str(),
            "conflict"
        );
    }

    #[test]
    fn retryable_errors() {
        assert!(SyncError::network("connection lost").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::Transport {
            status: Some(503),
            body: None,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(!SyncError::Transport {
            status: Some(406),
            body: None,
            message: "invalid".into()
        }
        .is_retryable());
        assert!(!SyncError::MissingIdentity.is_retryable());
    }

    #[test]
    fn codec_errors_keep_validation_tree() {
        let err: SyncError = CodecError::Validation(ValidationError::token("nonnull")).into();
        assert_eq!(err.validation().unwrap().tokens(), vec!["nonnull"]);

        let err: SyncError = CodecError::decoding_failed("eof").into();
        assert_eq!(err.kind(), ErrorKind::Codec);
    }

    #[test]
    fn error_display() {
        assert_eq!(SyncError::Timeout.to_string(), "operation timed out");
        let err = SyncError::UnknownChannel("archive".into());
        assert!(err.to_string().contains("archive"));
    }
}
