//! Error types for the codec crate.

use crate::validation::ValidationError;
use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding wire bodies.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    /// Failed to encode a value into a body.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode a body into a value.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// The content type is not one the codec understands.
    #[error("unsupported mimetype: {mimetype}")]
    UnsupportedMimetype {
        /// The offending content type.
        mimetype: String,
    },

    /// A value failed schema validation.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Create an unsupported mimetype error.
    pub fn unsupported_mimetype(mimetype: impl Into<String>) -> Self {
        Self::UnsupportedMimetype {
            mimetype: mimetype.into(),
        }
    }
}
