//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while interpreting protocol data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A status code outside the known taxonomy.
    #[error("unknown status code: {0}")]
    UnknownStatus(u16),

    /// A response envelope did not have the expected shape.
    #[error("malformed envelope: {message}")]
    MalformedEnvelope {
        /// What was wrong.
        message: String,
    },

    /// An HTTP method name was not recognized.
    #[error("unknown method: {0}")]
    UnknownMethod(String),
}

impl ProtocolError {
    /// Create a malformed envelope error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedEnvelope {
            message: message.into(),
        }
    }
}
