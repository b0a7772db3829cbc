//! Dotted property paths and the attribute tree operations built on them.

use serde_json::{Map, Value};
use std::fmt;

/// A dotted path into an entity's attributes, such as `flags.active`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyPath(String);

impl PropertyPath {
    /// Creates a path from its dotted form.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Returns the dotted form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterates over the path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Returns the first segment.
    pub fn root(&self) -> &str {
        self.segments().next().unwrap_or_default()
    }

    /// Returns a child path.
    pub fn join(&self, segment: &str) -> Self {
        Self(format!("{}.{}", self.0, segment))
    }

    /// Returns true if `other` lies strictly below this path.
    pub fn is_ancestor_of(&self, other: &PropertyPath) -> bool {
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'.'
    }

    /// Returns true if the paths are equal or one contains the other.
    pub fn overlaps(&self, other: &PropertyPath) -> bool {
        self == other || self.is_ancestor_of(other) || other.is_ancestor_of(self)
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PropertyPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

fn child(prefix: Option<&PropertyPath>, name: &str) -> PropertyPath {
    match prefix {
        Some(prefix) => prefix.join(name),
        None => PropertyPath::new(name),
    }
}

/// Looks up the value at `path`.
pub(crate) fn lookup<'a>(attrs: &'a Map<String, Value>, path: &PropertyPath) -> Option<&'a Value> {
    let mut segments = path.segments();
    let mut current = attrs.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Writes `value` at `path`, creating intermediate mappings as needed.
pub(crate) fn assign(attrs: &mut Map<String, Value>, path: &PropertyPath, value: Value) {
    let segments: Vec<&str> = path.segments().collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut current = attrs;
    for segment in parents {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(next) = slot else {
            return;
        };
        current = next;
    }
    current.insert(last.to_string(), value);
}

/// Merges `source` into `target`, returning the leaf paths that changed.
///
/// Nested mappings merge member by member, so changing `a.b` reports `a.b`
/// only; a member replaced by a value of another shape is reported at its
/// own path. Paths for which `skip` returns true are left untouched.
pub(crate) fn merge(
    target: &mut Map<String, Value>,
    source: &Map<String, Value>,
    prefix: Option<&PropertyPath>,
    skip: &dyn Fn(&PropertyPath) -> bool,
    changed: &mut Vec<PropertyPath>,
) {
    for (name, incoming) in source {
        let path = child(prefix, name);
        if skip(&path) {
            continue;
        }
        match (target.get_mut(name), incoming) {
            (Some(Value::Object(existing)), Value::Object(members)) => {
                merge(existing, members, Some(&path), skip, changed);
            }
            (Some(existing), _) if existing == incoming => {}
            _ => {
                target.insert(name.clone(), incoming.clone());
                changed.push(path);
            }
        }
    }
}

/// Builds a sparse mapping holding only the values at `paths`.
///
/// Paths missing from `attrs` are sent as null.
pub(crate) fn project<'a>(
    attrs: &Map<String, Value>,
    paths: impl IntoIterator<Item = &'a PropertyPath>,
) -> Map<String, Value> {
    let mut out = Map::new();
    for path in paths {
        let value = lookup(attrs, path).cloned().unwrap_or(Value::Null);
        assign(&mut out, path, value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected a mapping"),
        }
    }

    #[test]
    fn ancestry() {
        let a = PropertyPath::new("a");
        let ab = PropertyPath::new("a.b");
        let abc = PropertyPath::new("ab.c");
        assert!(a.is_ancestor_of(&ab));
        assert!(!a.is_ancestor_of(&abc));
        assert!(!ab.is_ancestor_of(&a));
        assert!(a.overlaps(&ab));
        assert!(ab.overlaps(&a));
        assert!(!ab.overlaps(&abc));
        assert_eq!(ab.root(), "a");
    }

    #[test]
    fn merge_reports_leaf_paths() {
        let mut target = map(json!({"name": "x", "flags": {"a": true, "b": false}}));
        let mut changed = Vec::new();
        merge(
            &mut target,
            &map(json!({"flags": {"b": true}, "name": "x"})),
            None,
            &|_| false,
            &mut changed,
        );
        assert_eq!(changed, vec![PropertyPath::new("flags.b")]);
        assert_eq!(target["flags"], json!({"a": true, "b": true}));
    }

    #[test]
    fn merge_replaces_wholesale() {
        let mut target = map(json!({"flags": null}));
        let mut changed = Vec::new();
        merge(
            &mut target,
            &map(json!({"flags": {"a": true}})),
            None,
            &|_| false,
            &mut changed,
        );
        assert_eq!(changed, vec![PropertyPath::new("flags")]);
    }

    #[test]
    fn merge_skips_protected_paths() {
        let protected = PropertyPath::new("flags.a");
        let mut target = map(json!({"flags": {"a": true}, "name": "x"}));
        let mut changed = Vec::new();
        merge(
            &mut target,
            &map(json!({"flags": {"a": false}, "name": "y"})),
            None,
            &|path| path.overlaps(&protected),
            &mut changed,
        );
        assert_eq!(changed, vec![PropertyPath::new("name")]);
        assert_eq!(target["flags"]["a"], json!(true));
    }

    #[test]
    fn projection() {
        let attrs = map(json!({"name": "x", "flags": {"a": true, "b": false}, "value": 3}));
        let paths = [PropertyPath::new("flags.b"), PropertyPath::new("missing")];
        assert_eq!(
            Value::Object(project(&attrs, &paths)),
            json!({"flags": {"b": false}, "missing": null})
        );
        assert_eq!(lookup(&attrs, &PropertyPath::new("flags.a")), Some(&json!(true)));
        assert_eq!(lookup(&attrs, &PropertyPath::new("name.a")), None);
    }
}
