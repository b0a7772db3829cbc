//! # Meshsync Testkit
//!
//! Test utilities for meshsync.
//!
//! This crate provides:
//! - A mock transport whose calls complete in whatever order a test picks
//! - An in-memory resource server reachable through the loopback client
//! - A manual clock scheduler for polling tests
//! - Resource fixtures and property-based generators
//! - Tracing setup for test runs
//!
//! ## Usage
//!
//! ```rust,ignore
//! use meshsync_testkit::prelude::*;
//!
//! #[test]
//! fn refresh_applies() {
//!     let (transport, manager) = mock_manager();
//!     let entity = manager.get(1).unwrap();
//!     let handle = entity.refresh();
//!     transport.respond_json(0, 200, json!({"id": 1, "name": "a"}));
//!     assert!(handle.outcome().unwrap().is_ok());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod mock;
pub mod scheduler;
pub mod server;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
    pub use crate::mock::*;
    pub use crate::scheduler::*;
    pub use crate::server::*;
    pub use serde_json::json;
}

pub use fixtures::*;
pub use generators::*;
pub use mock::*;
pub use scheduler::*;
pub use server::*;

/// Installs a test-friendly tracing subscriber.
///
/// The filter comes from `RUST_LOG`. Calling this more than once is
/// harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
