//! Turns a batch of changes into ordered events for a view's listeners.

use std::sync::Arc;

use crate::events::{Change, Event, EventRegistration, EventType};
use crate::query::{IndexedValue, QuerySpec};

/// Generate the events for a batch of changes.
///
/// Child events are raised grouped by kind in delivery order (removed,
/// added, moved, changed, then value), each group sorted by the query's
/// ordering. Moves are derived from changed children whose index value
/// changed. Previous-sibling names come from the post-change event cache.
#[must_use]
pub fn generate_events_for_changes(
    spec: &QuerySpec,
    changes: &[Change],
    event_cache: &IndexedValue,
    registrations: &[Arc<dyn EventRegistration>],
) -> Vec<Event> {
    let comparator = spec.params.comparator();
    let mut all_changes: Vec<Change> = Vec::with_capacity(changes.len());
    for change in changes {
        if change.kind == EventType::ChildChanged {
            if let Some(old_value) = &change.old_value {
                if comparator.index_changed(old_value, &change.value) {
                    all_changes.push(Change::child_moved(
                        change.child_key.clone(),
                        change.value.clone(),
                    ));
                }
            }
        }
        all_changes.push(change.clone());
    }

    let mut events = Vec::new();
    for kind in EventType::ALL {
        let mut batch: Vec<&Change> = all_changes.iter().filter(|c| c.kind == kind).collect();
        batch.sort_by(|a, b| {
            comparator.cmp_entries(
                (a.child_key.as_str(), &a.value),
                (b.child_key.as_str(), &b.value),
            )
        });
        for change in batch {
            let mut change = change.clone();
            if matches!(
                kind,
                EventType::ChildAdded | EventType::ChildMoved | EventType::ChildChanged
            ) {
                change.prev_name = event_cache
                    .predecessor_child_name(&change.child_key)
                    .map(str::to_owned);
            }
            for registration in registrations {
                if registration.responds_to(kind) {
                    events.push(registration.generate_event(&change, spec));
                }
            }
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use treesync_codec::{Path, Value};

    use crate::events::{ChildEventRegistration, ValueEventRegistration};
    use crate::query::QueryParams;
    use crate::types::ListenerId;

    fn registrations() -> Vec<Arc<dyn EventRegistration>> {
        vec![
            Arc::new(ChildEventRegistration::with_id(
                ListenerId::new(1),
                EventType::ALL.to_vec(),
            )),
            Arc::new(ValueEventRegistration::with_id(ListenerId::new(2))),
        ]
    }

    fn kinds_of(events: &[Event]) -> Vec<EventType> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Data(d) => Some(d.kind),
                Event::Cancel(_) => None,
            })
            .collect()
    }

    #[test]
    fn removed_before_added_before_value() {
        let spec = QuerySpec::default_at(Path::root());
        let cache_value = Value::map_from([("b", Value::Int(2))]);
        let cache = IndexedValue::default_index(cache_value.clone());
        let changes = vec![
            Change::value(cache_value),
            Change::child_added("b", Value::Int(2)),
            Change::child_removed("a", Value::Int(1)),
        ];
        let events = generate_events_for_changes(&spec, &changes, &cache, &registrations());
        assert_eq!(
            kinds_of(&events),
            vec![EventType::ChildRemoved, EventType::ChildAdded, EventType::Value]
        );
    }

    #[test]
    fn added_events_carry_prev_names() {
        let spec = QuerySpec::default_at(Path::root());
        let cache = IndexedValue::default_index(Value::map_from([
            ("a", Value::Int(1)),
            ("b", Value::Int(2)),
        ]));
        let changes = vec![Change::child_added("b", Value::Int(2))];
        let events = generate_events_for_changes(&spec, &changes, &cache, &registrations());
        match &events[0] {
            Event::Data(e) => assert_eq!(e.prev_name.as_deref(), Some("a")),
            Event::Cancel(_) => panic!("expected data event"),
        }
    }

    #[test]
    fn index_change_produces_move() {
        let params = QueryParams::default().order_by_value();
        let spec = QuerySpec::new(Path::root(), params.clone());
        let cache = IndexedValue::new(
            Value::map_from([("a", Value::Int(9)), ("b", Value::Int(2))]),
            params,
        );
        let changes = vec![Change::child_changed("a", Value::Int(9), Value::Int(1))];
        let events = generate_events_for_changes(&spec, &changes, &cache, &registrations());
        assert_eq!(
            kinds_of(&events),
            vec![EventType::ChildMoved, EventType::ChildChanged]
        );
    }

    #[test]
    fn silent_registrations_get_nothing() {
        let spec = QuerySpec::default_at(Path::root());
        let cache = IndexedValue::default_index(Value::Null);
        let changes = vec![Change::value(Value::Null)];
        let regs: Vec<Arc<dyn EventRegistration>> =
            vec![Arc::new(crate::events::KeepSyncedRegistration::new())];
        let events = generate_events_for_changes(&spec, &changes, &cache, &regs);
        assert!(events.is_empty());
    }
}
