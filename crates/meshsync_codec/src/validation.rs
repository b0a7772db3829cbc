//! Structured validation errors.
//!
//! A [`ValidationError`] mirrors the shape of the value that failed: leaf
//! errors are carried as tokens, and errors inside structures or sequences
//! are attached as a nested tree keyed by member name or item index. The
//! tree is preserved end to end and is never flattened into a string.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// A single error attached to a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Machine-readable token (`invalid`, `nonnull`, `required`, ...).
    pub token: String,
    /// Optional human-readable message.
    pub message: Option<String>,
}

impl FieldError {
    /// Creates an error carrying only a token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            message: None,
        }
    }

    /// Attaches a message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("token".into(), Value::String(self.token.clone()));
        if let Some(message) = &self.message {
            map.insert("message".into(), Value::String(message.clone()));
        }
        Value::Object(map)
    }
}

/// Nested errors for the members or items of a structural value.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorStructure {
    /// Errors keyed by structure or mapping member name.
    Mapping(BTreeMap<String, ValidationError>),
    /// Errors keyed by sequence or tuple index.
    Sequence(BTreeMap<usize, ValidationError>),
}

/// A validation failure, possibly carrying a tree of nested failures.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationError {
    /// Errors attached directly to this value.
    pub errors: Vec<FieldError>,
    /// Errors attached to members or items of this value.
    pub structure: Option<ErrorStructure>,
}

impl ValidationError {
    /// Creates an error with a single token.
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            errors: vec![FieldError::new(token)],
            structure: None,
        }
    }

    /// Creates an error from nested member errors.
    pub fn mapping(members: BTreeMap<String, ValidationError>) -> Self {
        Self {
            errors: Vec::new(),
            structure: Some(ErrorStructure::Mapping(members)),
        }
    }

    /// Creates an error from nested item errors.
    pub fn sequence(items: BTreeMap<usize, ValidationError>) -> Self {
        Self {
            errors: Vec::new(),
            structure: Some(ErrorStructure::Sequence(items)),
        }
    }

    /// Appends a leaf error.
    #[must_use]
    pub fn append(mut self, error: FieldError) -> Self {
        self.errors.push(error);
        self
    }

    /// Returns true if this error carries anything at all.
    pub fn is_substantive(&self) -> bool {
        !self.errors.is_empty() || self.structure.is_some()
    }

    /// Returns the tokens attached directly to this value.
    pub fn tokens(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.token.as_str()).collect()
    }

    /// Returns the nested error for a structure member, if any.
    pub fn member(&self, name: &str) -> Option<&ValidationError> {
        match &self.structure {
            Some(ErrorStructure::Mapping(members)) => members.get(name),
            _ => None,
        }
    }

    /// Returns the nested error for a sequence item, if any.
    pub fn item(&self, index: usize) -> Option<&ValidationError> {
        match &self.structure {
            Some(ErrorStructure::Sequence(items)) => items.get(&index),
            _ => None,
        }
    }

    /// Counts leaf errors across the whole tree.
    pub fn leaf_count(&self) -> usize {
        let nested = match &self.structure {
            Some(ErrorStructure::Mapping(members)) => {
                members.values().map(ValidationError::leaf_count).sum()
            }
            Some(ErrorStructure::Sequence(items)) => {
                items.values().map(ValidationError::leaf_count).sum()
            }
            None => 0,
        };
        self.errors.len() + nested
    }

    /// Serializes to the `[errors, structure]` wire pair.
    pub fn to_value(&self) -> Value {
        let errors = if self.errors.is_empty() {
            Value::Null
        } else {
            Value::Array(self.errors.iter().map(FieldError::to_value).collect())
        };
        json!([errors, self.structure_value()])
    }

    fn structure_value(&self) -> Value {
        match &self.structure {
            None => Value::Null,
            Some(ErrorStructure::Mapping(members)) => Value::Object(
                members
                    .iter()
                    .map(|(name, error)| (name.clone(), error.nested_value()))
                    .collect(),
            ),
            Some(ErrorStructure::Sequence(items)) => {
                let len = items.keys().next_back().map_or(0, |last| last + 1);
                Value::Array(
                    (0..len)
                        .map(|i| items.get(&i).map_or(Value::Null, ValidationError::nested_value))
                        .collect(),
                )
            }
        }
    }

    fn nested_value(&self) -> Value {
        if self.structure.is_some() {
            self.structure_value()
        } else {
            Value::Array(self.errors.iter().map(FieldError::to_value).collect())
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.errors.first(), &self.structure) {
            (Some(first), None) => write!(f, "{}", first.token),
            _ => write!(f, "{} field error(s)", self.leaf_count()),
        }
    }
}

impl std::error::Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_error() {
        let err = ValidationError::token("nonnull");
        assert_eq!(err.tokens(), vec!["nonnull"]);
        assert_eq!(err.to_string(), "nonnull");
        assert_eq!(err.to_value(), json!([[{"token": "nonnull"}], null]));
    }

    #[test]
    fn nested_tree_keeps_shape() {
        let mut items = BTreeMap::new();
        items.insert(2, ValidationError::token("invalid"));
        let mut members = BTreeMap::new();
        members.insert("tags".to_string(), ValidationError::sequence(items));
        members.insert("name".to_string(), ValidationError::token("required"));
        let err = ValidationError::mapping(members);

        assert_eq!(err.leaf_count(), 2);
        assert_eq!(err.member("name").unwrap().tokens(), vec!["required"]);
        assert!(err.member("tags").unwrap().item(2).is_some());
        assert_eq!(
            err.to_value(),
            json!([null, {
                "name": [{"token": "required"}],
                "tags": [null, null, [{"token": "invalid"}]],
            }])
        );
    }

    #[test]
    fn empty_error_is_not_substantive() {
        assert!(!ValidationError::default().is_substantive());
        assert!(ValidationError::token("x").is_substantive());
    }
}
