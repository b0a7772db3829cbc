//! Entity identities.

use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// A client-side identifier for an entity that has no durable id yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TempId(Uuid);

impl TempId {
    /// Generates a fresh temporary id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "temp:{}", self.0)
    }
}

/// The registry key of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// Identifier assigned by the remote store, in its textual form.
    Durable(String),
    /// Local identifier of an entity not yet persisted.
    Temporary(TempId),
}

impl Identity {
    /// Builds a durable identity from an id value.
    ///
    /// Text and numbers are accepted; anything else has no durable form.
    pub fn from_value(value: &Value) -> Option<Self> {
        durable_key(value).map(Identity::Durable)
    }

    /// Returns true for durable identities.
    pub fn is_durable(&self) -> bool {
        matches!(self, Identity::Durable(_))
    }

    /// Returns the durable key, if any.
    pub fn durable(&self) -> Option<&str> {
        match self {
            Identity::Durable(key) => Some(key),
            Identity::Temporary(_) => None,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Durable(key) => f.write_str(key),
            Identity::Temporary(temp) => temp.fmt(f),
        }
    }
}

impl From<TempId> for Identity {
    fn from(temp: TempId) -> Self {
        Identity::Temporary(temp)
    }
}

/// Textual form of an id value, used in URLs and registry keys.
pub(crate) fn durable_key(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
