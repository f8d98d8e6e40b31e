//! Views: the materialized state of one query and its listeners.
//!
//! A view pairs a [`ViewCache`] with the registrations listening to it. The
//! [`ViewProcessor`] applies operations to the cache through the query's
//! filter chain; the view turns the resulting changes into ordered events.

use std::sync::Arc;

use treesync_codec::{Path, Value};

use crate::error::ListenError;
use crate::events::{generate_events_for_changes, Change, Event, EventRegistration, EventType};
use crate::operation::Operation;
use crate::query::{IndexedValue, QuerySpec};
use crate::types::ListenerId;
use crate::vutil;
use crate::writes::WriteTreeRef;

pub mod cache;
pub mod filter;
mod indexed_filter;
mod limited_filter;
pub mod processor;
mod ranged_filter;

pub use cache::{CacheNode, ViewCache};
pub use filter::{filter_from_params, CompleteChildSource, NoCompleteSource, NodeFilter};
pub use indexed_filter::IndexedFilter;
pub use limited_filter::LimitedFilter;
pub use processor::ViewProcessor;
pub use ranged_filter::RangedFilter;

/// One query's materialized state: its caches, its processor, and the
/// listeners to notify.
#[derive(Debug)]
pub struct View {
    spec: QuerySpec,
    processor: ViewProcessor,
    cache: ViewCache,
    registrations: Vec<Arc<dyn EventRegistration>>,
}

impl View {
    /// A view for a query, seeded from whatever cached data is available.
    #[must_use]
    pub fn new(spec: QuerySpec, initial: &ViewCache) -> Self {
        let filter = filter_from_params(&spec.params);
        let indexed_filter = IndexedFilter::new(spec.params.clone());
        let empty = IndexedValue::new(Value::Null, spec.params.clone());

        // The server cache stays unfiltered so it can answer completeness
        // questions; the local cache takes the query's shape.
        let server_snap =
            indexed_filter.update_full_value(&empty, initial.server().indexed(), None);
        let local_snap = filter.update_full_value(&empty, initial.local().indexed(), None);
        let cache = ViewCache::new(
            CacheNode::new(
                local_snap,
                initial.local().is_fully_initialized(),
                filter.filters_values(),
            ),
            CacheNode::new(
                server_snap,
                initial.server().is_fully_initialized(),
                false,
            ),
        );
        Self {
            spec,
            processor: ViewProcessor::new(filter),
            cache,
            registrations: Vec::new(),
        }
    }

    /// The query this view materializes.
    #[must_use]
    pub const fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    /// The current cache pair.
    #[must_use]
    pub const fn view_cache(&self) -> &ViewCache {
        &self.cache
    }

    /// The server-confirmed cache node.
    #[must_use]
    pub const fn server_cache(&self) -> &CacheNode {
        self.cache.server()
    }

    /// The server value at `path` below this view, if the view's cache is
    /// authoritative for it.
    #[must_use]
    pub fn get_complete_server_cache(&self, path: &Path) -> Option<Value> {
        let cache = self.cache.complete_server_snap()?;
        let covers = self.spec.params.loads_all_data()
            || path
                .front()
                .is_some_and(|front| cache.child(front).is_some());
        covers.then(|| vutil::get_child_at(cache, path))
    }

    /// Whether no listeners remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Whether the given listener is registered here.
    #[must_use]
    pub fn contains_listener(&self, id: ListenerId) -> bool {
        self.registrations.iter().any(|r| r.matches_listener(id))
    }

    /// Register a listener.
    pub fn add_event_registration(&mut self, registration: Arc<dyn EventRegistration>) {
        self.registrations.push(registration);
    }

    /// Remove one listener, or all of them when `listener` is `None`.
    ///
    /// When `error` is given the removed listeners each get a cancel event.
    pub fn remove_event_registrations(
        &mut self,
        listener: Option<ListenerId>,
        error: Option<ListenError>,
    ) -> Vec<Event> {
        let removed: Vec<Arc<dyn EventRegistration>> = match listener {
            None => std::mem::take(&mut self.registrations),
            Some(id) => {
                let (gone, kept) = std::mem::take(&mut self.registrations)
                    .into_iter()
                    .partition(|r| r.matches_listener(id));
                self.registrations = kept;
                gone
            }
        };
        match error {
            Some(error) => removed
                .iter()
                .map(|r| r.create_cancel_event(error, self.spec.path.clone()))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Apply one operation and return the events it produces.
    #[must_use]
    pub fn apply_operation(
        &mut self,
        operation: &Operation,
        writes: &WriteTreeRef<'_>,
        complete_server_cache: Option<&Value>,
    ) -> Vec<Event> {
        let (new_cache, changes) =
            self.processor
                .apply_operation(&self.cache, operation, writes, complete_server_cache);
        debug_assert!(
            new_cache.server().is_fully_initialized()
                || !self.cache.server().is_fully_initialized(),
            "a complete server cache never becomes incomplete"
        );
        self.cache = new_cache;
        generate_events_for_changes(
            &self.spec,
            &changes,
            self.cache.local().indexed(),
            &self.registrations,
        )
    }

    /// The events a newly attached listener must immediately receive to catch
    /// up with the current cache.
    #[must_use]
    pub fn get_initial_events(&self, registration: Arc<dyn EventRegistration>) -> Vec<Event> {
        let local = self.cache.local();
        let mut changes: Vec<Change> = vutil::children_of(local.value())
            .map(|(key, child)| Change::child_added(key.clone(), child.clone()))
            .collect();
        if local.is_fully_initialized() {
            changes.push(Change::value(local.value().clone()));
        }
        generate_events_for_changes(
            &self.spec,
            &changes,
            local.indexed(),
            std::slice::from_ref(&registration),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChildEventRegistration, ValueEventRegistration};
    use crate::operation::OperationSource;
    use crate::query::QueryParams;
    use crate::writes::WriteTree;

    fn server_overwrite(value: Value) -> Operation {
        Operation::overwrite(OperationSource::server(), Path::root(), value)
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
    fn initial_server_data_produces_added_then_value() {
        let spec = QuerySpec::default_at(Path::root());
        let mut view = View::new(spec, &ViewCache::empty(&QueryParams::default()));
        view.add_event_registration(Arc::new(ValueEventRegistration::new()));
        view.add_event_registration(Arc::new(ChildEventRegistration::new(vec![
            EventType::ChildAdded,
        ])));

        let writes = WriteTree::new();
        let write_ref = writes.child_writes(&Path::root());
        let events = view.apply_operation(
            &server_overwrite(Value::map_from([("a", Value::Int(1))])),
            &write_ref,
            None,
        );
        assert_eq!(kinds_of(&events), vec![EventType::ChildAdded, EventType::Value]);
    }

    #[test]
    fn initial_events_replay_current_state() {
        let spec = QuerySpec::default_at(Path::root());
        let mut view = View::new(spec, &ViewCache::empty(&QueryParams::default()));
        let writes = WriteTree::new();
        let write_ref = writes.child_writes(&Path::root());
        let _ = view.apply_operation(
            &server_overwrite(Value::map_from([("a", Value::Int(1))])),
            &write_ref,
            None,
        );

        let registration: Arc<dyn EventRegistration> =
            Arc::new(ChildEventRegistration::new(vec![EventType::ChildAdded]));
        let events = view.get_initial_events(registration);
        assert_eq!(kinds_of(&events), vec![EventType::ChildAdded]);
    }

    #[test]
    fn removing_with_error_yields_cancel_events() {
        let spec = QuerySpec::default_at(Path::parse("rooms"));
        let mut view = View::new(spec, &ViewCache::empty(&QueryParams::default()));
        let reg = Arc::new(ValueEventRegistration::new());
        let id = reg.listener_id();
        view.add_event_registration(reg);

        let events = view.remove_event_registrations(Some(id), Some(ListenError::PermissionDenied));
        assert_eq!(events.len(), 1);
        assert!(view.is_empty());
        match &events[0] {
            Event::Cancel(c) => {
                assert_eq!(c.error, ListenError::PermissionDenied);
                assert_eq!(c.path, Path::parse("rooms"));
            }
            Event::Data(_) => panic!("expected cancel event"),
        }
    }

    #[test]
    fn limited_view_keeps_window() {
        let params = QueryParams::default().order_by_key().limit_to_first(2);
        let spec = QuerySpec::new(Path::root(), params.clone());
        let mut view = View::new(spec, &ViewCache::empty(&params));
        let writes = WriteTree::new();
        let write_ref = writes.child_writes(&Path::root());
        let _ = view.apply_operation(
            &server_overwrite(Value::map_from([
                ("a", Value::Int(1)),
                ("b", Value::Int(2)),
                ("c", Value::Int(3)),
            ])),
            &write_ref,
            None,
        );
        let local = view.view_cache().local().value();
        assert!(local.child("a").is_some());
        assert!(local.child("b").is_some());
        assert!(local.child("c").is_none());
        assert_eq!(
            view.get_complete_server_cache(&Path::root()),
            None,
        );
    }
}
