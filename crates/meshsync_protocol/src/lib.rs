//! # Meshsync Protocol
//!
//! Resource API protocol types for meshsync.
//!
//! This crate provides:
//! - `Method` and the `Status` taxonomy with symbolic tokens
//! - `QueryParams` and the `QueryResults` envelope
//! - Transport request, response and failure records
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod message;
mod query;
mod status;

pub use error::{ProtocolError, ProtocolResult};
pub use message::{TransportFailure, TransportRequest, TransportResponse};
pub use query::{QueryParams, QueryResults};
pub use status::{is_success_code, Method, Status, StatusFamily};
