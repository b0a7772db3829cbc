//! # Meshsync Engine
//!
//! Entity and collection synchronization for resource APIs.
//!
//! This crate provides:
//! - Request channels that coalesce identical in-flight calls
//! - Entity managers with one live instance per durable identity
//! - Entities that track dirty paths and reconcile out-of-order responses
//! - Queries and windowed, sparse collection caches
//! - Polling, timers and a pluggable transport
//!
//! ## Architecture
//!
//! ```text
//! Collection::load → Query::execute → RequestChannel::initiate → Transport
//!                                              │
//!      Entity ← EntityManager::instantiate ← decode + unserialize
//! ```
//!
//! Every asynchronous operation returns a [`Pending`] handle. Handles settle
//! exactly once; continuations run synchronously when they settle, so a
//! transport that completes inside `dispatch` drives the whole pipeline
//! deterministically.
//!
//! ## Key Invariants
//!
//! - A manager never holds two instances under one durable identity
//! - Responses apply in request order, not completion order
//! - Local edits are never clobbered by concurrent remote data
//! - A superseded collection load never mutates the cache

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod channel;
mod collection;
mod config;
mod entity;
mod error;
mod events;
mod http;
mod identity;
mod manager;
mod path;
mod pending;
mod poll;
mod query;
mod resource;
mod scheduler;
mod transport;

pub use channel::{ChannelResponse, RequestChannel};
pub use collection::{Collection, CollectionEvent, LoadParams};
pub use config::EngineConfig;
pub use entity::{Entity, EntityEvent, Lifecycle, RefreshOptions, SaveOptions, SetOptions};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use events::{Observable, SubscriptionId};
pub use http::{HttpClient, HttpTransport, LoopbackClient, LoopbackServer};
pub use identity::{Identity, TempId};
pub use manager::{EntityManager, ManagerEvent};
pub use path::PropertyPath;
pub use pending::Pending;
pub use poll::{PollCondition, PollOptions, Predicate};
pub use query::{Query, QueryOutcome};
pub use resource::{query_schema, ChannelSpec, ResourceSpec};
pub use scheduler::{Scheduler, Task, ThreadScheduler, TokioScheduler};
pub use transport::{Completion, Responder, Transport};
