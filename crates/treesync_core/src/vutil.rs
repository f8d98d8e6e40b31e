//! Helpers for manipulating [`Value`] trees.
//!
//! These encode the data-model conventions the engine relies on: `".priority"`
//! carries a node's ordering priority, a leaf with a priority is wrapped as
//! `{".value": leaf, ".priority": p}`, writing an empty value deletes, and a
//! map that loses its last real child collapses to `Null` (dropping any
//! priority with it).

use std::collections::BTreeMap;

use treesync_codec::{Path, Value, PRIORITY_KEY, VALUE_KEY};

/// Whether a value is empty: `Null`, or a map with no real children.
#[must_use]
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Map(m) => !m.contains_key(VALUE_KEY) && !m.keys().any(|k| !k.starts_with('.')),
        _ => false,
    }
}

/// Whether a value is a leaf: any non-map, or a priority-wrapped leaf.
#[must_use]
pub fn is_leaf_value(value: &Value) -> bool {
    match value {
        Value::Map(m) => m.contains_key(VALUE_KEY),
        Value::Null => false,
        _ => true,
    }
}

/// The leaf payload with any priority wrapper removed.
#[must_use]
pub fn base_value(value: &Value) -> &Value {
    match value {
        Value::Map(m) => m.get(VALUE_KEY).unwrap_or(value),
        _ => value,
    }
}

/// The priority of a node, `Null` if it has none.
#[must_use]
pub fn get_priority(value: &Value) -> Value {
    value.child(PRIORITY_KEY).cloned().unwrap_or(Value::Null)
}

/// The real (non-reserved) children of a node, in key order.
pub fn children_of(value: &Value) -> impl Iterator<Item = (&String, &Value)> {
    value
        .as_map()
        .into_iter()
        .flat_map(|m| m.iter())
        .filter(|(k, _)| !k.starts_with('.'))
}

/// Number of real children.
#[must_use]
pub fn child_count(value: &Value) -> usize {
    children_of(value).count()
}

/// The immediate child of a node, `Null` if absent or not a map.
#[must_use]
pub fn get_child(value: &Value, key: &str) -> Value {
    value.child(key).cloned().unwrap_or(Value::Null)
}

/// The value at a descendant path, `Null` if any step is missing.
#[must_use]
pub fn get_child_at(value: &Value, path: &Path) -> Value {
    let mut node = value;
    for segment in path.iter() {
        match node.child(segment) {
            Some(child) => node = child,
            None => return Value::Null,
        }
    }
    node.clone()
}

/// Replace a node's priority.
///
/// Empty nodes cannot carry a priority; leaves get wrapped, maps store it
/// under the reserved key. Setting `Null` removes the priority.
pub fn update_priority(value: &mut Value, priority: Value) {
    if is_empty_value(value) {
        return;
    }
    if priority.is_null() {
        if let Value::Map(m) = value {
            m.remove(PRIORITY_KEY);
            if let Some(inner) = m.remove(VALUE_KEY) {
                if m.is_empty() {
                    *value = inner;
                } else {
                    m.insert(VALUE_KEY.to_owned(), inner);
                }
            }
        }
        return;
    }
    match value {
        Value::Map(m) => {
            m.insert(PRIORITY_KEY.to_owned(), priority);
        }
        leaf => {
            let inner = std::mem::replace(leaf, Value::Null);
            let mut wrapped = BTreeMap::new();
            wrapped.insert(VALUE_KEY.to_owned(), inner);
            wrapped.insert(PRIORITY_KEY.to_owned(), priority);
            *leaf = Value::Map(wrapped);
        }
    }
}

/// Replace an immediate child of a node.
///
/// Writing an empty child deletes it; a map that loses its last real child
/// collapses to `Null`. Updating a child of a leaf discards the leaf payload
/// but keeps its priority. The reserved `".priority"` key routes to
/// [`update_priority`].
pub fn update_child(value: &mut Value, key: &str, new_child: Value) {
    if key == PRIORITY_KEY {
        update_priority(value, new_child);
        return;
    }
    let delete = is_empty_value(&new_child);
    match &mut *value {
        Value::Map(m) if !m.contains_key(VALUE_KEY) => {
            if delete {
                m.remove(key);
            } else {
                m.insert(key.to_owned(), new_child);
            }
        }
        other => {
            // Leaf (possibly priority-wrapped) or Null: start over from an
            // empty map, preserving only the priority.
            let priority = get_priority(other);
            let mut m = BTreeMap::new();
            if !delete {
                m.insert(key.to_owned(), new_child);
            }
            if !priority.is_null() {
                m.insert(PRIORITY_KEY.to_owned(), priority);
            }
            *other = Value::Map(m);
        }
    }
    if is_empty_value(value) {
        *value = Value::Null;
    }
}

/// Replace the value at a descendant path, creating interior nodes as
/// needed and collapsing emptied branches.
pub fn update_child_at(value: &mut Value, path: &Path, new_value: Value) {
    match path.front() {
        None => *value = if is_empty_value(&new_value) { Value::Null } else { new_value },
        Some(key) if path.len() == 1 => update_child(value, key, new_value),
        Some(key) => {
            let mut child = get_child(value, key);
            update_child_at(&mut child, &path.pop_front(), new_value);
            update_child(value, key, child);
        }
    }
}

/// Recursively drop `Null` children and collapse emptied maps to `Null`.
///
/// Applied to values arriving from outside the engine, where explicit nulls
/// mean deletion.
pub fn prune_nulls(value: &mut Value) {
    if let Value::Map(m) = value {
        let keys: Vec<String> = m.keys().cloned().collect();
        for key in keys {
            if let Some(child) = m.get_mut(&key) {
                prune_nulls(child);
                if child.is_null() {
                    m.remove(&key);
                }
            }
        }
    }
    if is_empty_value(value) {
        *value = Value::Null;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: Vec<(&str, Value)>) -> Value {
        Value::map_from(entries)
    }

    #[test]
    fn emptiness() {
        assert!(is_empty_value(&Value::Null));
        assert!(is_empty_value(&Value::empty_map()));
        assert!(!is_empty_value(&Value::Int(0)));
        assert!(!is_empty_value(&map(vec![("a", Value::Int(1))])));
        assert!(!is_empty_value(&map(vec![
            (VALUE_KEY, Value::Int(1)),
            (PRIORITY_KEY, Value::Int(2)),
        ])));
    }

    #[test]
    fn leaf_detection_and_base_value() {
        let wrapped = map(vec![(VALUE_KEY, Value::Int(5)), (PRIORITY_KEY, Value::Int(1))]);
        assert!(is_leaf_value(&wrapped));
        assert!(is_leaf_value(&Value::Str("s".into())));
        assert!(!is_leaf_value(&map(vec![("a", Value::Int(1))])));
        assert_eq!(base_value(&wrapped), &Value::Int(5));
        assert_eq!(base_value(&Value::Int(5)), &Value::Int(5));
    }

    #[test]
    fn priority_wraps_leaves() {
        let mut v = Value::Int(3);
        update_priority(&mut v, Value::Int(10));
        assert_eq!(get_priority(&v), Value::Int(10));
        assert_eq!(base_value(&v), &Value::Int(3));
        update_priority(&mut v, Value::Null);
        assert_eq!(v, Value::Int(3));
    }

    #[test]
    fn priority_on_empty_is_ignored() {
        let mut v = Value::Null;
        update_priority(&mut v, Value::Int(1));
        assert_eq!(v, Value::Null);
    }

    #[test]
    fn update_child_inserts_and_deletes() {
        let mut v = map(vec![("a", Value::Int(1)), ("b", Value::Int(2))]);
        update_child(&mut v, "c", Value::Int(3));
        assert_eq!(get_child(&v, "c"), Value::Int(3));
        update_child(&mut v, "a", Value::Null);
        update_child(&mut v, "b", Value::Null);
        update_child(&mut v, "c", Value::Null);
        assert_eq!(v, Value::Null);
    }

    #[test]
    fn update_child_of_leaf_keeps_priority() {
        let mut v = Value::Int(1);
        update_priority(&mut v, Value::Str("p".into()));
        update_child(&mut v, "k", Value::Int(2));
        assert_eq!(get_child(&v, "k"), Value::Int(2));
        assert_eq!(get_priority(&v), Value::Str("p".into()));
        assert_eq!(base_value(&get_child(&v, "k")), &Value::Int(2));
    }

    #[test]
    fn last_child_removed_drops_priority() {
        let mut v = map(vec![("a", Value::Int(1)), (PRIORITY_KEY, Value::Int(9))]);
        update_child(&mut v, "a", Value::Null);
        assert_eq!(v, Value::Null);
    }

    #[test]
    fn deep_update_creates_and_collapses() {
        let mut v = Value::Null;
        update_child_at(&mut v, &Path::parse("a/b/c"), Value::Int(1));
        assert_eq!(get_child_at(&v, &Path::parse("a/b/c")), Value::Int(1));
        update_child_at(&mut v, &Path::parse("a/b/c"), Value::Null);
        assert_eq!(v, Value::Null);
    }

    #[test]
    fn priority_path_segment_routes_to_priority() {
        let mut v = map(vec![("a", Value::Int(1))]);
        update_child_at(&mut v, &Path::parse(".priority"), Value::Int(7));
        assert_eq!(get_priority(&v), Value::Int(7));
    }

    #[test]
    fn prune_nulls_collapses() {
        let mut v = map(vec![
            ("a", Value::Null),
            ("b", map(vec![("c", Value::Null)])),
            ("d", Value::Int(1)),
        ]);
        prune_nulls(&mut v);
        assert_eq!(v, map(vec![("d", Value::Int(1))]));
    }

    #[test]
    fn children_iteration_skips_reserved_keys() {
        let v = map(vec![
            ("a", Value::Int(1)),
            (PRIORITY_KEY, Value::Int(9)),
            ("b", Value::Int(2)),
        ]);
        let keys: Vec<&String> = children_of(&v).map(|(k, _)| k).collect();
        assert_eq!(keys, ["a", "b"]);
        assert_eq!(child_count(&v), 2);
    }
}
