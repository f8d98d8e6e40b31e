//! Changes: the view-internal description of what an operation did.
//!
//! A view processor emits changes; the event generator turns them into
//! events for the listeners that want them. While an operation is being
//! processed, per-child changes are collected in an accumulator that merges
//! successive changes to the same child into their net effect.

use std::collections::BTreeMap;

use treesync_codec::Value;

use crate::events::EventType;

/// One change observed by a view.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// What happened.
    pub kind: EventType,
    /// The affected child; empty for value changes.
    pub child_key: String,
    /// The value after the change (the removed value for removals).
    pub value: Value,
    /// The value before the change, for changed children.
    pub old_value: Option<Value>,
    /// The key ordered before this child; filled in by the event generator.
    pub prev_name: Option<String>,
}

impl Change {
    /// A whole-view value change.
    #[must_use]
    pub fn value(value: Value) -> Self {
        Self {
            kind: EventType::Value,
            child_key: String::new(),
            value,
            old_value: None,
            prev_name: None,
        }
    }

    /// A child entering the view.
    #[must_use]
    pub fn child_added(child_key: impl Into<String>, value: Value) -> Self {
        Self {
            kind: EventType::ChildAdded,
            child_key: child_key.into(),
            value,
            old_value: None,
            prev_name: None,
        }
    }

    /// A child leaving the view, with the value it had.
    #[must_use]
    pub fn child_removed(child_key: impl Into<String>, old_value: Value) -> Self {
        Self {
            kind: EventType::ChildRemoved,
            child_key: child_key.into(),
            value: old_value,
            old_value: None,
            prev_name: None,
        }
    }

    /// A child whose value changed.
    #[must_use]
    pub fn child_changed(child_key: impl Into<String>, value: Value, old_value: Value) -> Self {
        Self {
            kind: EventType::ChildChanged,
            child_key: child_key.into(),
            value,
            old_value: Some(old_value),
            prev_name: None,
        }
    }

    /// A child that moved in query order.
    #[must_use]
    pub fn child_moved(child_key: impl Into<String>, value: Value) -> Self {
        Self {
            kind: EventType::ChildMoved,
            child_key: child_key.into(),
            value,
            old_value: None,
            prev_name: None,
        }
    }
}

/// Collects per-child changes, merging repeated changes to one child.
#[derive(Debug, Default)]
pub struct ChildChangeAccumulator {
    changes: BTreeMap<String, Change>,
}

impl ChildChangeAccumulator {
    /// An empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change, folding it into any existing change for the child.
    pub fn track(&mut self, change: Change) {
        let key = change.child_key.clone();
        debug_assert!(change.kind.is_child_event(), "accumulator takes child changes");
        let merged = match (self.changes.remove(&key), change) {
            (None, change) => Some(change),
            (Some(existing), change) => merge_changes(existing, change),
        };
        if let Some(merged) = merged {
            self.changes.insert(key, merged);
        }
    }

    /// The net changes, in child key order.
    #[must_use]
    pub fn into_changes(self) -> Vec<Change> {
        self.changes.into_values().collect()
    }

    /// Whether nothing was tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

fn merge_changes(existing: Change, new: Change) -> Option<Change> {
    use EventType::{ChildAdded, ChildChanged, ChildRemoved};
    let key = new.child_key.clone();
    match (existing.kind, new.kind) {
        // Removed then re-added: the child changed.
        (ChildRemoved, ChildAdded) => {
            Some(Change::child_changed(key, new.value, existing.value))
        }
        // Added then removed: nothing happened.
        (ChildAdded, ChildRemoved) => None,
        // Added then changed: still an add, with the latest value.
        (ChildAdded, ChildChanged) => Some(Change::child_added(key, new.value)),
        // Changed then removed: a removal of the original value.
        (ChildChanged, ChildRemoved) => Some(Change::child_removed(
            key,
            existing.old_value.unwrap_or(Value::Null),
        )),
        // Changed then changed again: one change spanning both.
        (ChildChanged, ChildChanged) => Some(Change::child_changed(
            key,
            new.value,
            existing.old_value.unwrap_or(Value::Null),
        )),
        // Any other sequence should not happen; keep the newest.
        _ => Some(new),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_distinct_children_in_key_order() {
        let mut acc = ChildChangeAccumulator::new();
        acc.track(Change::child_added("b", Value::Int(2)));
        acc.track(Change::child_added("a", Value::Int(1)));
        let changes = acc.into_changes();
        assert_eq!(changes[0].child_key, "a");
        assert_eq!(changes[1].child_key, "b");
    }

    #[test]
    fn add_then_remove_cancels_out() {
        let mut acc = ChildChangeAccumulator::new();
        acc.track(Change::child_added("a", Value::Int(1)));
        acc.track(Change::child_removed("a", Value::Int(1)));
        assert!(acc.is_empty());
    }

    #[test]
    fn remove_then_add_becomes_change() {
        let mut acc = ChildChangeAccumulator::new();
        acc.track(Change::child_removed("a", Value::Int(1)));
        acc.track(Change::child_added("a", Value::Int(2)));
        let changes = acc.into_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, EventType::ChildChanged);
        assert_eq!(changes[0].value, Value::Int(2));
        assert_eq!(changes[0].old_value, Some(Value::Int(1)));
    }

    #[test]
    fn change_then_remove_restores_original_old_value() {
        let mut acc = ChildChangeAccumulator::new();
        acc.track(Change::child_changed("a", Value::Int(2), Value::Int(1)));
        acc.track(Change::child_removed("a", Value::Int(2)));
        let changes = acc.into_changes();
        assert_eq!(changes[0].kind, EventType::ChildRemoved);
        assert_eq!(changes[0].value, Value::Int(1));
    }

    #[test]
    fn add_then_change_stays_an_add() {
        let mut acc = ChildChangeAccumulator::new();
        acc.track(Change::child_added("a", Value::Int(1)));
        acc.track(Change::child_changed("a", Value::Int(3), Value::Int(1)));
        let changes = acc.into_changes();
        assert_eq!(changes[0].kind, EventType::ChildAdded);
        assert_eq!(changes[0].value, Value::Int(3));
    }
}
