//! The set of views at one location.

use std::collections::BTreeMap;
use std::sync::Arc;

use treesync_codec::{Path, Value};

use crate::error::ListenError;
use crate::events::{Event, EventRegistration};
use crate::operation::Operation;
use crate::query::{IndexedValue, QueryParams, QuerySpec};
use crate::types::ListenerId;
use crate::view::{CacheNode, View, ViewCache};
use crate::writes::WriteTreeRef;

/// All the views materialized at one path, keyed by their query parameters.
///
/// Views at one location are independent of each other; the sync point only
/// routes operations and aggregates their events.
#[derive(Debug, Default)]
pub struct SyncPoint {
    views: BTreeMap<QueryParams, View>,
}

impl SyncPoint {
    /// A sync point with no views.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no views remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Apply an operation: to the one matching view for tagged operations,
    /// to every view otherwise.
    #[must_use]
    pub fn apply_operation(
        &mut self,
        operation: &Operation,
        writes: &WriteTreeRef<'_>,
        server_cache: Option<&Value>,
    ) -> Vec<Event> {
        match operation.source().query_params() {
            Some(params) => match self.views.get_mut(params) {
                Some(view) => view.apply_operation(operation, writes, server_cache),
                None => {
                    // The tagged query was unlistened while the push was in
                    // flight.
                    tracing::warn!(?params, "tagged operation for missing view");
                    Vec::new()
                }
            },
            None => self
                .views
                .values_mut()
                .flat_map(|view| view.apply_operation(operation, writes, server_cache))
                .collect(),
        }
    }

    /// Attach a listener, creating the query's view if this is its first,
    /// and return the listener's catch-up events.
    #[must_use]
    pub fn add_event_registration(
        &mut self,
        spec: &QuerySpec,
        registration: Arc<dyn EventRegistration>,
        writes: &WriteTreeRef<'_>,
        server_cache: &CacheNode,
        server_cache_complete: bool,
    ) -> Vec<Event> {
        let view = self.views.entry(spec.params.clone()).or_insert_with(|| {
            let server_value = server_cache.value();
            let complete_server = server_cache_complete.then_some(server_value);
            let (local_value, local_complete) =
                match writes.calc_complete_event_cache(complete_server, &[], false) {
                    Some(value) => (value, true),
                    None => (writes.calc_complete_event_children(server_value), false),
                };
            let initial = ViewCache::new(
                CacheNode::new(
                    IndexedValue::new(local_value, spec.params.clone()),
                    local_complete,
                    false,
                ),
                server_cache.clone(),
            );
            View::new(spec.clone(), &initial)
        });
        view.add_event_registration(Arc::clone(&registration));
        view.get_initial_events(registration)
    }

    /// Detach a listener (all of the query's listeners when `listener` is
    /// `None`), dropping views that end up empty.
    ///
    /// Returns the specs whose views were removed and need their wire listens
    /// stopped, plus any cancel events.
    pub fn remove_event_registration(
        &mut self,
        spec: &QuerySpec,
        listener: Option<ListenerId>,
        error: Option<ListenError>,
    ) -> (Vec<QuerySpec>, Vec<Event>) {
        let mut removed = Vec::new();
        let mut cancel_events = Vec::new();
        let had_complete_view = self.has_complete_view();
        if spec.is_default() {
            // A default registration detaches from every view here.
            self.views.retain(|_, view| {
                cancel_events.extend(view.remove_event_registrations(listener, error));
                if view.is_empty() {
                    if !view.spec().loads_all_data() {
                        removed.push(view.spec().clone());
                    }
                    false
                } else {
                    true
                }
            });
        } else if let Some(view) = self.views.get_mut(&spec.params) {
            cancel_events.extend(view.remove_event_registrations(listener, error));
            if view.is_empty() {
                self.views.remove(&spec.params);
                if !spec.loads_all_data() {
                    removed.push(spec.clone());
                }
            }
        }
        if had_complete_view && !self.has_complete_view() {
            // The covering listen is gone; the default spec must be stopped
            // too.
            removed.push(QuerySpec::default_at(spec.path.clone()));
        }
        (removed, cancel_events)
    }

    /// The views for filtered queries.
    pub fn query_views(&self) -> impl Iterator<Item = &View> {
        self.views
            .values()
            .filter(|view| !view.spec().loads_all_data())
    }

    /// The view loading all data here, if any.
    #[must_use]
    pub fn complete_view(&self) -> Option<&View> {
        self.views
            .values()
            .find(|view| view.spec().loads_all_data())
    }

    /// Whether a view here loads all data.
    #[must_use]
    pub fn has_complete_view(&self) -> bool {
        self.complete_view().is_some()
    }

    /// Whether a view exists for the given parameters.
    #[must_use]
    pub fn view_exists_for_query(&self, params: &QueryParams) -> bool {
        self.views.contains_key(params)
    }

    /// The view for the given parameters.
    #[must_use]
    pub fn view_for_query(&self, params: &QueryParams) -> Option<&View> {
        self.views.get(params)
    }

    /// The server value at `path` below this point, if any view's cache is
    /// authoritative for it.
    #[must_use]
    pub fn get_complete_server_cache(&self, path: &Path) -> Option<Value> {
        self.views
            .values()
            .find_map(|view| view.get_complete_server_cache(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ValueEventRegistration;
    use crate::operation::OperationSource;
    use crate::query::QueryParams;
    use crate::writes::WriteTree;

    fn empty_server_cache() -> CacheNode {
        CacheNode::new(IndexedValue::default_index(Value::Null), false, false)
    }

    #[test]
    fn registration_creates_view_and_replays_state() {
        let mut point = SyncPoint::new();
        let writes = WriteTree::new();
        let write_ref = writes.child_writes(&Path::root());
        let spec = QuerySpec::default_at(Path::root());
        let server = CacheNode::new(
            IndexedValue::default_index(Value::map_from([("a", Value::Int(1))])),
            true,
            false,
        );
        let reg = Arc::new(ValueEventRegistration::new());
        let events = point.add_event_registration(&spec, reg, &write_ref, &server, true);
        assert_eq!(events.len(), 1);
        assert!(point.has_complete_view());
        assert_eq!(
            point.get_complete_server_cache(&Path::root()),
            Some(Value::map_from([("a", Value::Int(1))]))
        );
    }

    #[test]
    fn tagged_operation_hits_only_matching_view() {
        let mut point = SyncPoint::new();
        let writes = WriteTree::new();
        let write_ref = writes.child_writes(&Path::root());
        let default_spec = QuerySpec::default_at(Path::root());
        let limited_params = QueryParams::default().order_by_key().limit_to_first(1);
        let limited_spec = QuerySpec::new(Path::root(), limited_params.clone());

        let _ = point.add_event_registration(
            &default_spec,
            Arc::new(ValueEventRegistration::new()),
            &write_ref,
            &empty_server_cache(),
            false,
        );
        let _ = point.add_event_registration(
            &limited_spec,
            Arc::new(ValueEventRegistration::new()),
            &write_ref,
            &empty_server_cache(),
            false,
        );

        let tagged = Operation::overwrite(
            OperationSource::for_server_tagged_query(limited_params),
            Path::root(),
            Value::map_from([("a", Value::Int(1))]),
        );
        let events = point.apply_operation(&tagged, &write_ref, None);
        // Only the limited view saw the update.
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn removing_last_listener_drops_view() {
        let mut point = SyncPoint::new();
        let writes = WriteTree::new();
        let write_ref = writes.child_writes(&Path::root());
        let spec = QuerySpec::new(
            Path::root(),
            QueryParams::default().order_by_key().limit_to_first(1),
        );
        let reg = Arc::new(ValueEventRegistration::new());
        let id = reg.listener_id();
        let _ = point.add_event_registration(&spec, reg, &write_ref, &empty_server_cache(), false);

        let (removed, events) = point.remove_event_registration(&spec, Some(id), None);
        assert!(events.is_empty());
        assert_eq!(removed, vec![spec]);
        assert!(point.is_empty());
    }
}
