//! Property-based test generators using proptest.

use proptest::prelude::*;
use serde_json::{json, Value};

/// Generates resource names.
pub fn arb_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9 _-]{0,15}"
}

/// Generates example resource attributes that satisfy the example schema.
pub fn arb_attrs() -> impl Strategy<Value = Value> {
    (
        arb_name(),
        any::<i32>(),
        any::<bool>(),
        any::<bool>(),
        prop::collection::vec("[a-z]{1,6}", 0..4),
    )
        .prop_map(|(name, value, a, b, tags)| {
            json!({"name": name, "value": value, "flags": {"a": a, "b": b}, "tags": tags})
        })
}

/// Generates a sparse attribute update touching at least one member.
pub fn arb_update() -> impl Strategy<Value = Value> {
    (
        prop::option::of(arb_name()),
        prop::option::of(any::<i32>()),
        prop::option::of(any::<bool>()),
    )
        .prop_filter("update touches nothing", |(n, v, a)| {
            n.is_some() || v.is_some() || a.is_some()
        })
        .prop_map(|(name, value, a)| {
            let mut update = serde_json::Map::new();
            if let Some(name) = name {
                update.insert("name".into(), json!(name));
            }
            if let Some(value) = value {
                update.insert("value".into(), json!(value));
            }
            if let Some(a) = a {
                update.insert("flags".into(), json!({"a": a}));
            }
            Value::Object(update)
        })
}

/// Generates `(offset, limit)` windows inside a collection of `size`.
pub fn arb_window(size: usize) -> impl Strategy<Value = (usize, usize)> {
    (0..size.max(1)).prop_flat_map(move |offset| (Just(offset), 1..=(size - offset).max(1)))
}
