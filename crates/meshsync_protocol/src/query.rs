//! Query parameters and result envelopes.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Parameters of a collection query.
///
/// Field lists given to `include` and `exclude` intersect with any list
/// already present, so repeated narrowing never widens the selection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryParams {
    /// Filter expression, passed to the server as-is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Value>,
    /// Sort keys; a leading `-` sorts descending.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<String>,
    /// Fields to include.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<Vec<String>>,
    /// Fields to exclude.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<Vec<String>>,
    /// Maximum number of resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Offset of the first resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    /// Whether the response should carry the total count.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub total: bool,
}

impl QueryParams {
    /// Creates empty parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Narrows `include` to the intersection with `fields`.
    pub fn include(&mut self, fields: impl IntoIterator<Item = impl Into<String>>) {
        self.include = Some(intersect(self.include.take(), fields));
    }

    /// Narrows `exclude` to the intersection with `fields`.
    pub fn exclude(&mut self, fields: impl IntoIterator<Item = impl Into<String>>) {
        self.exclude = Some(intersect(self.exclude.take(), fields));
    }

    /// Returns the wire form. Empty members and a zero offset are omitted.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(query) = self.query.as_ref().filter(|q| !is_empty(q)) {
            map.insert("query".into(), query.clone());
        }
        if !self.sort.is_empty() {
            map.insert("sort".into(), Value::from(self.sort.clone()));
        }
        if let Some(include) = self.include.as_ref().filter(|f| !f.is_empty()) {
            map.insert("include".into(), Value::from(include.clone()));
        }
        if let Some(exclude) = self.exclude.as_ref().filter(|f| !f.is_empty()) {
            map.insert("exclude".into(), Value::from(exclude.clone()));
        }
        if let Some(limit) = self.limit {
            map.insert("limit".into(), Value::from(limit));
        }
        if let Some(offset) = self.offset.filter(|o| *o > 0) {
            map.insert("offset".into(), Value::from(offset));
        }
        if self.total {
            map.insert("total".into(), Value::Bool(true));
        }
        Value::Object(map)
    }
}

fn intersect(
    existing: Option<Vec<String>>,
    fields: impl IntoIterator<Item = impl Into<String>>,
) -> Vec<String> {
    let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
    match existing {
        Some(existing) => existing.into_iter().filter(|f| fields.contains(f)).collect(),
        None => fields,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// The `{total, resources}` envelope returned by a query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResults {
    /// Total size of the remote collection, if requested.
    pub total: Option<usize>,
    /// Resources in the returned window, in order.
    pub resources: Vec<Value>,
}

impl QueryResults {
    /// Parses the envelope from a response value.
    pub fn from_value(value: &Value) -> ProtocolResult<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| ProtocolError::malformed("expected a mapping"))?;
        let resources = match map.get("resources") {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(_) => return Err(ProtocolError::malformed("resources must be a sequence")),
        };
        let total = match map.get("total") {
            Some(Value::Null) | None => None,
            Some(total) => Some(
                total
                    .as_u64()
                    .ok_or_else(|| ProtocolError::malformed("total must be a count"))?
                    as usize,
            ),
        };
        Ok(Self { total, resources })
    }

    /// Returns the envelope as a value.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(total) = self.total {
            map.insert("total".into(), Value::from(total));
        }
        map.insert("resources".into(), Value::Array(self.resources.clone()));
        Value::Object(map)
    }
}
