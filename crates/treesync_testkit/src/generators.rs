//! Property-based test generators using proptest.
//!
//! Strategies for paths, tree values, and query parameters that respect the
//! engine's invariants (no NaN, no empty maps, no empty path segments).

use proptest::prelude::*;
use treesync_codec::{Path, Value};
use treesync_core::query::QueryParams;

/// Strategy for a single path segment.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,11}").expect("invalid key regex")
}

/// Strategy for paths up to `depth` segments deep, including the root.
pub fn path_strategy(depth: usize) -> impl Strategy<Value = Path> {
    prop::collection::vec(key_strategy(), 0..=depth).prop_map(Path::from_segments)
}

/// Strategy for leaf values. Floats are finite, so the result is always
/// writable.
pub fn leaf_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        (-1.0e9f64..1.0e9).prop_map(Value::Float),
        key_strategy().prop_map(Value::Str),
    ]
}

/// Strategy for arbitrary tree values: leaves plus nested maps.
///
/// Maps are non-empty at every level; the engine never represents an empty
/// map, it collapses to `Null`.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    leaf_strategy().prop_recursive(3, 24, 4, |inner| {
        prop::collection::btree_map(key_strategy(), inner, 1..4).prop_map(Value::Map)
    })
}

/// Strategy for query parameters: a random ordering with optional range and
/// limit.
pub fn query_params_strategy() -> impl Strategy<Value = QueryParams> {
    let by_key = prop::bool::ANY;
    let ordered = prop_oneof![
        Just(QueryParams::default()),
        Just(QueryParams::default().order_by_value()),
        key_strategy().prop_map(|child| QueryParams::default().order_by_child(child)),
    ];
    (
        by_key,
        ordered,
        prop::option::of(bound_strategy()),
        prop::option::of(bound_strategy()),
        prop::option::of(1usize..5),
        any::<bool>(),
    )
        .prop_map(|(by_key, params, start, end, limit, anchor_end)| {
            // Key ordering compares keys, so its bounds must be strings.
            let mut params = if by_key {
                QueryParams::default().order_by_key()
            } else {
                params
            };
            if let Some(start) = start {
                params = params.start_at(if by_key { to_key_bound(start) } else { start });
            }
            if let Some(end) = end {
                params = params.end_at(if by_key { to_key_bound(end) } else { end });
            }
            if let Some(limit) = limit {
                params = if anchor_end {
                    params.limit_to_last(limit)
                } else {
                    params.limit_to_first(limit)
                };
            }
            params
        })
}

fn bound_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        (-100i64..100).prop_map(Value::Int),
        key_strategy().prop_map(Value::Str),
    ]
}

fn to_key_bound(value: Value) -> Value {
    match value {
        Value::Str(_) => value,
        Value::Int(i) => Value::Str(format!("k{i:+04}")),
        other => Value::Str(format!("{other:?}")),
    }
}
