//! # Meshsync Codec
//!
//! Field schemas and wire body encodings for meshsync.
//!
//! This crate provides:
//! - Recursive field schemas ([`Field`]) with extract, serialize,
//!   unserialize and validate operations
//! - Structured validation errors that keep the shape of the failing value
//! - Body encodings for JSON, CBOR and URL-encoded forms ([`MimeType`])
//!
//! ## Usage
//!
//! ```
//! use meshsync_codec::{Field, MimeType, Structure};
//! use serde_json::json;
//!
//! let schema = Field::structure(
//!     Structure::new()
//!         .field("name", Field::text().required())
//!         .field("count", Field::integer()),
//! );
//!
//! let wire = schema.serialize(&json!({"count": "3"}), MimeType::Json, false).unwrap();
//! assert_eq!(wire, json!({"count": 3}));
//!
//! let err = schema.validate(&json!({"count": 3}), None).unwrap_err();
//! assert_eq!(err.member("name").unwrap().tokens(), vec!["required"]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod field;
mod form;
mod mime;
mod validation;

pub use error::{CodecError, CodecResult};
pub use field::{Field, FieldKind, Polymorphic, Scalar, Structure};
pub use form::{decode_form, encode_form, percent_encode};
pub use mime::MimeType;
pub use validation::{ErrorStructure, FieldError, ValidationError};
