//! Listener registrations: which events a callback wants and how to build
//! them.

use std::fmt;

use treesync_codec::Path;

use crate::error::ListenError;
use crate::events::{CancelEvent, Change, DataEvent, Event, EventType};
use crate::query::QuerySpec;
use crate::types::ListenerId;

/// A registered listener on a query.
pub trait EventRegistration: fmt::Debug + Send + Sync {
    /// The identity of the listener.
    fn listener_id(&self) -> ListenerId;

    /// Whether the listener wants events of this kind.
    fn responds_to(&self, kind: EventType) -> bool;

    /// Build the event delivered for a change.
    fn generate_event(&self, change: &Change, spec: &QuerySpec) -> Event {
        data_event(self.listener_id(), change, spec)
    }

    /// Build the event delivered when the listen is cancelled.
    fn create_cancel_event(&self, error: ListenError, path: Path) -> Event {
        Event::Cancel(CancelEvent {
            registration: self.listener_id(),
            path,
            error,
        })
    }

    /// Whether this registration belongs to the given listener.
    fn matches_listener(&self, id: ListenerId) -> bool {
        self.listener_id() == id
    }
}

fn data_event(id: ListenerId, change: &Change, spec: &QuerySpec) -> Event {
    Event::Data(DataEvent {
        kind: change.kind,
        registration: id,
        path: spec.path.clone(),
        child_key: change
            .kind
            .is_child_event()
            .then(|| change.child_key.clone()),
        snapshot: change.value.clone(),
        prev_name: change.prev_name.clone(),
    })
}

/// A listener that observes the whole value of a query.
#[derive(Debug)]
pub struct ValueEventRegistration {
    id: ListenerId,
}

impl ValueEventRegistration {
    /// A registration with a fresh listener id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: ListenerId::fresh(),
        }
    }

    /// A registration for an existing listener id.
    #[must_use]
    pub const fn with_id(id: ListenerId) -> Self {
        Self { id }
    }
}

impl Default for ValueEventRegistration {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRegistration for ValueEventRegistration {
    fn listener_id(&self) -> ListenerId {
        self.id
    }

    fn responds_to(&self, kind: EventType) -> bool {
        kind == EventType::Value
    }
}

/// A listener that observes per-child events of a query.
#[derive(Debug)]
pub struct ChildEventRegistration {
    id: ListenerId,
    kinds: Vec<EventType>,
}

impl ChildEventRegistration {
    /// A registration for the given child event kinds with a fresh id.
    #[must_use]
    pub fn new(kinds: Vec<EventType>) -> Self {
        Self {
            id: ListenerId::fresh(),
            kinds,
        }
    }

    /// A registration for an existing listener id.
    #[must_use]
    pub const fn with_id(id: ListenerId, kinds: Vec<EventType>) -> Self {
        Self { id, kinds }
    }
}

impl EventRegistration for ChildEventRegistration {
    fn listener_id(&self) -> ListenerId {
        self.id
    }

    fn responds_to(&self, kind: EventType) -> bool {
        kind.is_child_event() && self.kinds.contains(&kind)
    }
}

/// The silent registration backing keep-synced queries: it keeps the view
/// alive and its cache warm without delivering any events.
#[derive(Debug)]
pub struct KeepSyncedRegistration {
    id: ListenerId,
}

impl KeepSyncedRegistration {
    /// A registration with a fresh listener id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: ListenerId::fresh(),
        }
    }
}

impl Default for KeepSyncedRegistration {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRegistration for KeepSyncedRegistration {
    fn listener_id(&self) -> ListenerId {
        self.id
    }

    fn responds_to(&self, _kind: EventType) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use treesync_codec::Value;

    #[test]
    fn value_registration_responds_to_value_only() {
        let reg = ValueEventRegistration::new();
        assert!(reg.responds_to(EventType::Value));
        assert!(!reg.responds_to(EventType::ChildAdded));
    }

    #[test]
    fn child_registration_filters_kinds() {
        let reg = ChildEventRegistration::new(vec![EventType::ChildAdded]);
        assert!(reg.responds_to(EventType::ChildAdded));
        assert!(!reg.responds_to(EventType::ChildRemoved));
        assert!(!reg.responds_to(EventType::Value));
    }

    #[test]
    fn keep_synced_registration_is_silent() {
        let reg = KeepSyncedRegistration::new();
        for kind in EventType::ALL {
            assert!(!reg.responds_to(kind));
        }
    }

    #[test]
    fn generated_events_carry_listener_and_path() {
        let reg = ValueEventRegistration::with_id(ListenerId::new(7));
        let spec = QuerySpec::default_at(Path::parse("a/b"));
        let change = Change::value(Value::Int(1));
        match reg.generate_event(&change, &spec) {
            Event::Data(e) => {
                assert_eq!(e.registration, ListenerId::new(7));
                assert_eq!(e.path, Path::parse("a/b"));
                assert_eq!(e.child_key, None);
                assert_eq!(e.snapshot, Value::Int(1));
            }
            Event::Cancel(_) => panic!("expected data event"),
        }
    }

    #[test]
    fn cancel_events_carry_error() {
        let reg = ValueEventRegistration::with_id(ListenerId::new(3));
        match reg.create_cancel_event(ListenError::PermissionDenied, Path::parse("x")) {
            Event::Cancel(e) => {
                assert_eq!(e.error, ListenError::PermissionDenied);
                assert_eq!(e.path, Path::parse("x"));
            }
            Event::Data(_) => panic!("expected cancel event"),
        }
    }
}
