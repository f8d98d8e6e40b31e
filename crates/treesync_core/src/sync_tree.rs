//! The sync tree: the coordinator that owns every sync point, the pending
//! write log, and the mapping between filtered queries and their wire tags.
//!
//! All mutations funnel through here as [`Operation`]s. Each public entry
//! point opens a persistence transaction, routes the operation down the tree
//! of sync points, and returns the user-visible events the views raised.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use treesync_codec::{Path, Value};

use crate::error::{CoreError, CoreResult, ListenError};
use crate::events::{Event, EventRegistration, KeepSyncedRegistration};
use crate::operation::{Operation, OperationSource};
use crate::persistence::PersistenceManager;
use crate::query::{IndexedValue, QuerySpec};
use crate::server_values::{
    generate_server_values, resolve_deferred_merge, resolve_deferred_value,
};
use crate::sync_point::SyncPoint;
use crate::tree::Tree;
use crate::types::{
    AckStatus, ListenerId, OverwriteVisibility, PersistMode, Tag, WriteId,
};
use crate::view::{CacheNode, View};
use crate::vutil;
use crate::writes::{CompoundWrite, WritePayload, WriteTree, WriteTreeRef};

/// The wire side of a listen: the sync tree tells the provider which queries
/// the server must stream and which it can stop.
pub trait ListenProvider: fmt::Debug + Send {
    /// Begin streaming a query. `tag` is present for filtered queries; the
    /// view holds the data already cached for the listen.
    fn start_listening(&mut self, spec: &QuerySpec, tag: Option<Tag>, view: &View);

    /// Stop streaming a query.
    fn stop_listening(&mut self, spec: &QuerySpec, tag: Option<Tag>);
}

/// The client-side synchronization engine.
#[derive(Debug)]
pub struct SyncTree {
    sync_points: Tree<SyncPoint>,
    pending_writes: WriteTree,
    tag_to_query: BTreeMap<Tag, QuerySpec>,
    query_to_tag: BTreeMap<QuerySpec, Tag>,
    next_tag: Tag,
    keep_synced: BTreeMap<QuerySpec, ListenerId>,
    listen_provider: Box<dyn ListenProvider>,
    persistence: Box<dyn PersistenceManager>,
    clock_skew_ms: i64,
}

impl SyncTree {
    /// A sync tree over a listen provider and a persistence manager.
    #[must_use]
    pub fn new(
        listen_provider: Box<dyn ListenProvider>,
        persistence: Box<dyn PersistenceManager>,
    ) -> Self {
        Self {
            sync_points: Tree::new(),
            pending_writes: WriteTree::new(),
            tag_to_query: BTreeMap::new(),
            query_to_tag: BTreeMap::new(),
            next_tag: Tag::new(1),
            keep_synced: BTreeMap::new(),
            listen_provider,
            persistence,
            clock_skew_ms: 0,
        }
    }

    /// Update the estimated offset between the server clock and ours, used
    /// when resolving deferred timestamp values.
    pub fn set_clock_skew(&mut self, skew_ms: i64) {
        self.clock_skew_ms = skew_ms;
    }

    /// Whether no listeners are registered anywhere.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sync_points.is_empty()
    }

    /// The tag allocated for a filtered query, if it has a live view.
    #[must_use]
    pub fn tag_for_query(&self, spec: &QuerySpec) -> Option<Tag> {
        self.query_to_tag.get(spec).copied()
    }

    /// The query a tag routes to.
    #[must_use]
    pub fn query_for_tag(&self, tag: Tag) -> Option<&QuerySpec> {
        self.tag_to_query.get(&tag)
    }

    /// Attach a listener to a query, materializing its view if needed.
    ///
    /// Returns the catch-up events for the new listener, plus any events from
    /// setting up the listen.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistence layer fails.
    pub fn add_event_registration(
        &mut self,
        spec: &QuerySpec,
        registration: Arc<dyn EventRegistration>,
    ) -> CoreResult<Vec<Event>> {
        self.persistence.begin_transaction()?;
        let result = self.add_event_registration_inner(spec, registration);
        self.finish_transaction(result)
    }

    /// Detach one listener (all of them when `listener` is `None`) from a
    /// query.
    ///
    /// With an `error` the detached listeners each get a cancel event and the
    /// wire listen is assumed already dead.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistence layer fails.
    pub fn remove_event_registration(
        &mut self,
        spec: &QuerySpec,
        listener: Option<ListenerId>,
        error: Option<ListenError>,
    ) -> CoreResult<Vec<Event>> {
        self.persistence.begin_transaction()?;
        let result = self.remove_event_registration_inner(spec, listener, error);
        self.finish_transaction(result)
    }

    /// Detach every listener from a query.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistence layer fails.
    pub fn remove_all_event_registrations(
        &mut self,
        spec: &QuerySpec,
        error: Option<ListenError>,
    ) -> CoreResult<Vec<Event>> {
        self.remove_event_registration(spec, None, error)
    }

    /// Keep a query's cache warm without delivering events to anyone.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistence layer fails.
    pub fn set_keep_synchronized(&mut self, spec: &QuerySpec, keep: bool) -> CoreResult<()> {
        if keep && !self.keep_synced.contains_key(spec) {
            let registration = Arc::new(KeepSyncedRegistration::new());
            let id = registration.listener_id();
            let _ = self.add_event_registration(spec, registration)?;
            self.keep_synced.insert(spec.clone(), id);
        } else if !keep {
            if let Some(id) = self.keep_synced.remove(spec) {
                let _ = self.remove_event_registration(spec, Some(id), None)?;
            }
        }
        Ok(())
    }

    /// Apply a local overwrite.
    ///
    /// The raw value (deferred timestamps unresolved) goes to the write log;
    /// views see the value resolved against the estimated server clock.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NaNValue`] for values containing NaN, or an error
    /// if the persistence layer fails.
    pub fn apply_user_overwrite(
        &mut self,
        path: Path,
        value: Value,
        write_id: WriteId,
        visibility: OverwriteVisibility,
        persist: PersistMode,
    ) -> CoreResult<Vec<Event>> {
        validate_no_nan(&value)?;
        self.persistence.begin_transaction()?;
        let result = self.apply_user_overwrite_inner(path, value, write_id, visibility, persist);
        self.finish_transaction(result)
    }

    /// Apply a local merge.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NaNValue`] for values containing NaN, or an error
    /// if the persistence layer fails.
    pub fn apply_user_merge(
        &mut self,
        path: Path,
        children: CompoundWrite,
        write_id: WriteId,
        persist: PersistMode,
    ) -> CoreResult<Vec<Event>> {
        for (_, value) in children.entries() {
            validate_no_nan(&value)?;
        }
        self.persistence.begin_transaction()?;
        let result = self.apply_user_merge_inner(path, children, write_id, persist);
        self.finish_transaction(result)
    }

    /// The server finished the round trip for a local write.
    ///
    /// On [`AckStatus::Confirm`] the write is folded into the cached server
    /// state; on [`AckStatus::Revert`] views recompute without it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownWrite`] if the write id is not
    /// outstanding, or an error if the persistence layer fails.
    pub fn ack_user_write(
        &mut self,
        write_id: WriteId,
        status: AckStatus,
        persist: PersistMode,
    ) -> CoreResult<Vec<Event>> {
        self.persistence.begin_transaction()?;
        let result = self.ack_user_write_inner(write_id, status, persist);
        self.finish_transaction(result)
    }

    /// Drop every outstanding local write, reverting views to server state.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistence layer fails.
    pub fn remove_all_writes(&mut self) -> CoreResult<Vec<Event>> {
        self.persistence.begin_transaction()?;
        let result = self.remove_all_writes_inner();
        self.finish_transaction(result)
    }

    /// Replay the persisted write log after a restart.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistence layer fails or a stored record is
    /// malformed.
    pub fn restore_writes(&mut self) -> CoreResult<Vec<Event>> {
        self.persistence.begin_transaction()?;
        let result = self.restore_writes_inner();
        self.finish_transaction(result)
    }

    /// Apply a server overwrite for a fully listened location.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistence layer fails.
    pub fn apply_server_overwrite(&mut self, path: Path, value: Value) -> CoreResult<Vec<Event>> {
        self.persistence.begin_transaction()?;
        let result = self
            .persistence
            .update_server_cache(&QuerySpec::default_at(path.clone()), &value)
            .map(|()| {
                self.apply_to_sync_points(&Operation::overwrite(
                    OperationSource::server(),
                    path,
                    value,
                ))
            });
        self.finish_transaction(result)
    }

    /// Apply a server merge for a fully listened location.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistence layer fails.
    pub fn apply_server_merge(
        &mut self,
        path: Path,
        children: CompoundWrite,
    ) -> CoreResult<Vec<Event>> {
        self.persistence.begin_transaction()?;
        let result = self
            .persistence
            .update_server_cache_merge(&path, &children)
            .map(|()| {
                self.apply_to_sync_points(&Operation::merge(
                    OperationSource::server(),
                    path,
                    children,
                ))
            });
        self.finish_transaction(result)
    }

    /// The server finished sending the initial data for a default listen.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistence layer fails.
    pub fn apply_listen_complete(&mut self, path: Path) -> CoreResult<Vec<Event>> {
        self.persistence.begin_transaction()?;
        let result = self
            .persistence
            .set_query_complete(&QuerySpec::default_at(path.clone()))
            .map(|()| {
                self.apply_to_sync_points(&Operation::listen_complete(
                    OperationSource::server(),
                    path,
                ))
            });
        self.finish_transaction(result)
    }

    /// Apply a server overwrite routed to one tagged query.
    ///
    /// An unknown tag is ignored: the query may have been unlistened while
    /// the update was in flight.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistence layer fails.
    pub fn apply_tagged_query_overwrite(
        &mut self,
        tag: Tag,
        path: Path,
        value: Value,
    ) -> CoreResult<Vec<Event>> {
        self.persistence.begin_transaction()?;
        let result = self.apply_tagged_query_overwrite_inner(tag, path, value);
        self.finish_transaction(result)
    }

    /// Apply a server merge routed to one tagged query.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistence layer fails.
    pub fn apply_tagged_query_merge(
        &mut self,
        tag: Tag,
        path: Path,
        children: CompoundWrite,
    ) -> CoreResult<Vec<Event>> {
        self.persistence.begin_transaction()?;
        let result = self.apply_tagged_query_merge_inner(tag, path, children);
        self.finish_transaction(result)
    }

    /// The server finished sending the initial data for a tagged listen.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistence layer fails.
    pub fn apply_tagged_listen_complete(&mut self, tag: Tag) -> CoreResult<Vec<Event>> {
        self.persistence.begin_transaction()?;
        let result = self.apply_tagged_listen_complete_inner(tag);
        self.finish_transaction(result)
    }

    /// The locally visible value at `path`, if pending writes plus cached
    /// server data fully determine it. Writes in `exclude` are left out;
    /// hidden writes are included.
    #[must_use]
    pub fn calc_complete_event_cache(&self, path: &Path, exclude: &[WriteId]) -> Option<Value> {
        let mut server_cache = None;
        let mut node = &self.sync_points;
        let mut walked = 0usize;
        loop {
            if let Some(point) = node.value() {
                let relative = Path::from_segments(path.segments()[walked..].to_vec());
                if let Some(cache) = point.get_complete_server_cache(&relative) {
                    server_cache = Some(cache);
                    break;
                }
            }
            match path.segments().get(walked) {
                Some(segment) => match node.child(segment) {
                    Some(child) => {
                        node = child;
                        walked += 1;
                    }
                    None => break,
                },
                None => break,
            }
        }
        self.pending_writes
            .child_writes(path)
            .calc_complete_event_cache(server_cache.as_ref(), exclude, true)
    }

    fn finish_transaction<T>(&mut self, result: CoreResult<T>) -> CoreResult<T> {
        if result.is_ok() {
            self.persistence.set_transaction_successful();
        }
        self.persistence.end_transaction()?;
        result
    }

    fn apply_to_sync_points(&mut self, operation: &Operation) -> Vec<Event> {
        let Self {
            sync_points,
            pending_writes,
            ..
        } = self;
        let writes = pending_writes.child_writes(&Path::root());
        apply_operation_helper(sync_points, operation, &writes, None)
    }

    fn apply_tagged_operation(&mut self, spec: &QuerySpec, operation: &Operation) -> Vec<Event> {
        let Self {
            sync_points,
            pending_writes,
            ..
        } = self;
        let Some(point) = sync_point_mut(sync_points, &spec.path) else {
            tracing::warn!(query = %spec, "tagged operation for missing sync point");
            return Vec::new();
        };
        let writes = pending_writes.child_writes(&spec.path);
        point.apply_operation(operation, &writes, None)
    }

    fn add_event_registration_inner(
        &mut self,
        spec: &QuerySpec,
        registration: Arc<dyn EventRegistration>,
    ) -> CoreResult<Vec<Event>> {
        let path = &spec.path;

        // Walk down to the registration path looking for a complete server
        // cache and for a default view whose listen already covers us.
        let mut server_cache_value: Option<Value> = None;
        let mut covered_by_ancestor = false;
        {
            let mut node = Some(&self.sync_points);
            let mut remaining = path.clone();
            while let Some(tree) = node {
                if let Some(point) = tree.value() {
                    if server_cache_value.is_none() {
                        server_cache_value = point.get_complete_server_cache(&remaining);
                    }
                    covered_by_ancestor = covered_by_ancestor || point.has_complete_view();
                }
                match remaining.front().map(str::to_owned) {
                    Some(front) => {
                        node = tree.child(&front);
                        remaining = remaining.pop_front();
                    }
                    None => node = None,
                }
            }
        }

        self.persistence.set_query_active(spec)?;

        let server_cache = match &server_cache_value {
            Some(value) => CacheNode::new(
                IndexedValue::new(value.clone(), spec.params.clone()),
                true,
                false,
            ),
            None => {
                let persisted = self.persistence.server_cache(spec)?;
                if persisted.is_fully_initialized() {
                    persisted
                } else {
                    // No authoritative data anywhere; assemble what complete
                    // children the descendant views and the persisted cache
                    // can offer.
                    let mut value = Value::Null;
                    if let Some(subtree) = self.sync_points.subtree(path) {
                        for (key, child) in subtree.children() {
                            if let Some(point) = child.value() {
                                if let Some(complete) =
                                    point.get_complete_server_cache(&Path::root())
                                {
                                    vutil::update_child(&mut value, key, complete);
                                }
                            }
                        }
                    }
                    for (key, child) in vutil::children_of(persisted.value()) {
                        if value.child(key).is_none() {
                            vutil::update_child(&mut value, key, child.clone());
                        }
                    }
                    CacheNode::new(
                        IndexedValue::new(value, spec.params.clone()),
                        false,
                        false,
                    )
                }
            }
        };
        let server_cache_complete = server_cache.is_fully_initialized();

        let view_exists = self
            .sync_points
            .get(path)
            .is_some_and(|point| point.view_exists_for_query(&spec.params));
        if !view_exists && !spec.loads_all_data() {
            debug_assert!(
                !self.query_to_tag.contains_key(spec),
                "filtered queries without views carry no tag"
            );
            let tag = self.next_tag;
            self.next_tag = Tag::new(tag.get() + 1);
            self.query_to_tag.insert(spec.clone(), tag);
            self.tag_to_query.insert(tag, spec.clone());
        }

        let Self {
            sync_points,
            pending_writes,
            ..
        } = self;
        let writes = pending_writes.child_writes(path);
        let point = sync_points.subtree_mut(path).value_mut_or_default();
        let events = point.add_event_registration(
            spec,
            registration,
            &writes,
            &server_cache,
            server_cache_complete,
        );

        if !view_exists && !covered_by_ancestor {
            self.setup_listener(spec);
        }
        Ok(events)
    }

    fn setup_listener(&mut self, spec: &QuerySpec) {
        let tag = self.query_to_tag.get(spec).copied();
        let Self {
            sync_points,
            listen_provider,
            query_to_tag,
            ..
        } = self;
        let subtree = sync_points.subtree(&spec.path);
        if let Some(view) = subtree
            .and_then(Tree::value)
            .and_then(|point| point.view_for_query(&spec.params))
        {
            listen_provider.start_listening(&spec_for_listening(spec), tag, view);
        }
        if tag.is_none() {
            // A default listen shadows every listen at or below its path.
            let mut shadowed = Vec::new();
            if let Some(subtree) = subtree {
                collect_distinct_views(subtree, true, &mut shadowed);
            }
            for stopped in shadowed {
                let stopped_tag = query_to_tag.get(&stopped).copied();
                listen_provider.stop_listening(&spec_for_listening(&stopped), stopped_tag);
            }
        }
    }

    fn remove_event_registration_inner(
        &mut self,
        spec: &QuerySpec,
        listener: Option<ListenerId>,
        error: Option<ListenError>,
    ) -> CoreResult<Vec<Event>> {
        let path = &spec.path;
        let affects_point = self.sync_points.get(path).is_some_and(|point| {
            spec.is_default() || point.view_exists_for_query(&spec.params)
        });
        if !affects_point {
            return Ok(Vec::new());
        }

        let (removed, cancel_events) = {
            let Some(point) = sync_point_mut(&mut self.sync_points, path) else {
                return Ok(Vec::new());
            };
            point.remove_event_registration(spec, listener, error)
        };
        if self
            .sync_points
            .get(path)
            .is_some_and(|point| point.is_empty())
        {
            let _ = self.sync_points.remove(path);
        }

        let mut removing_default = false;
        for removed_spec in &removed {
            self.persistence.set_query_inactive(removed_spec)?;
            removing_default = removing_default || removed_spec.loads_all_data();
        }

        let covered = self.path_covered_by_complete_view(path);
        if removing_default && !covered {
            // The default listen here is gone; descendant views must get
            // their own wire listens back.
            let mut revived = Vec::new();
            if let Some(subtree) = self.sync_points.subtree(path) {
                collect_distinct_views(subtree, false, &mut revived);
            }
            for revived_spec in revived {
                let tag = self.query_to_tag.get(&revived_spec).copied();
                let Self {
                    sync_points,
                    listen_provider,
                    ..
                } = self;
                if let Some(view) = sync_points
                    .subtree(&revived_spec.path)
                    .and_then(Tree::value)
                    .and_then(|point| point.view_for_query(&revived_spec.params))
                {
                    listen_provider.start_listening(
                        &spec_for_listening(&revived_spec),
                        tag,
                        view,
                    );
                }
            }
        }
        if !covered && !removed.is_empty() && error.is_none() {
            if removing_default {
                // One default listen stood in for every view here.
                self.listen_provider
                    .stop_listening(&spec_for_listening(spec), None);
            } else {
                for removed_spec in &removed {
                    let tag = self.query_to_tag.get(removed_spec).copied();
                    self.listen_provider
                        .stop_listening(&spec_for_listening(removed_spec), tag);
                }
            }
        }
        for removed_spec in &removed {
            if let Some(tag) = self.query_to_tag.remove(removed_spec) {
                self.tag_to_query.remove(&tag);
            }
        }
        Ok(cancel_events)
    }

    fn path_covered_by_complete_view(&self, path: &Path) -> bool {
        let mut node = &self.sync_points;
        if node.value().is_some_and(SyncPoint::has_complete_view) {
            return true;
        }
        for segment in path.iter() {
            match node.child(segment) {
                Some(child) => {
                    node = child;
                    if node.value().is_some_and(SyncPoint::has_complete_view) {
                        return true;
                    }
                }
                None => return false,
            }
        }
        false
    }

    fn apply_user_overwrite_inner(
        &mut self,
        path: Path,
        value: Value,
        write_id: WriteId,
        visibility: OverwriteVisibility,
        persist: PersistMode,
    ) -> CoreResult<Vec<Event>> {
        if persist.should_persist() {
            self.persistence.save_user_overwrite(&path, &value, write_id)?;
        }
        let resolved =
            resolve_deferred_value(&value, &generate_server_values(self.clock_skew_ms));
        self.pending_writes
            .add_overwrite(path.clone(), resolved.clone(), write_id, visibility);
        if !visibility.is_visible() {
            return Ok(Vec::new());
        }
        Ok(self.apply_to_sync_points(&Operation::overwrite(
            OperationSource::user(),
            path,
            resolved,
        )))
    }

    fn apply_user_merge_inner(
        &mut self,
        path: Path,
        children: CompoundWrite,
        write_id: WriteId,
        persist: PersistMode,
    ) -> CoreResult<Vec<Event>> {
        if persist.should_persist() {
            self.persistence.save_user_merge(&path, &children, write_id)?;
        }
        let resolved =
            resolve_deferred_merge(&children, &generate_server_values(self.clock_skew_ms));
        self.pending_writes
            .add_merge(path.clone(), resolved.clone(), write_id);
        Ok(self.apply_to_sync_points(&Operation::merge(
            OperationSource::user(),
            path,
            resolved,
        )))
    }

    fn ack_user_write_inner(
        &mut self,
        write_id: WriteId,
        status: AckStatus,
        persist: PersistMode,
    ) -> CoreResult<Vec<Event>> {
        if persist.should_persist() {
            self.persistence.remove_user_write(write_id)?;
        }
        let Some(record) = self.pending_writes.get_write(write_id).cloned() else {
            return Err(CoreError::UnknownWrite {
                write_id: write_id.get(),
            });
        };
        let need_reevaluate = self.pending_writes.remove_write(write_id);
        if !record.visible {
            return Ok(Vec::new());
        }
        if status == AckStatus::Confirm {
            let server_values = generate_server_values(self.clock_skew_ms);
            let payload = match &record.payload {
                WritePayload::Overwrite(value) => {
                    WritePayload::Overwrite(resolve_deferred_value(value, &server_values))
                }
                WritePayload::Merge(merge) => {
                    WritePayload::Merge(resolve_deferred_merge(merge, &server_values))
                }
            };
            self.persistence
                .apply_user_write_to_server_cache(&record.path, &payload)?;
        }
        if !need_reevaluate {
            return Ok(Vec::new());
        }
        let affected = match &record.payload {
            WritePayload::Overwrite(_) => Tree::leaf(true),
            WritePayload::Merge(merge) => {
                let mut tree = Tree::new();
                for (entry_path, _) in merge.entries() {
                    tree.insert(&entry_path, true);
                }
                tree
            }
        };
        Ok(self.apply_to_sync_points(&Operation::ack_user_write(
            record.path.clone(),
            affected,
            status == AckStatus::Revert,
        )))
    }

    fn remove_all_writes_inner(&mut self) -> CoreResult<Vec<Event>> {
        self.persistence.remove_all_user_writes()?;
        let purged = self.pending_writes.purge_all_writes();
        if purged.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.apply_to_sync_points(&Operation::ack_user_write(
            Path::root(),
            Tree::leaf(true),
            true,
        )))
    }

    fn restore_writes_inner(&mut self) -> CoreResult<Vec<Event>> {
        debug_assert!(
            self.sync_points.is_empty(),
            "writes must be restored before listeners register"
        );
        let records = self.persistence.load_user_writes()?;
        tracing::debug!(count = records.len(), "replaying persisted writes");
        let mut events = Vec::new();
        for record in records {
            match record.payload {
                WritePayload::Overwrite(value) => {
                    let visibility = if record.visible {
                        OverwriteVisibility::Visible
                    } else {
                        OverwriteVisibility::Invisible
                    };
                    events.extend(self.apply_user_overwrite_inner(
                        record.path,
                        value,
                        record.write_id,
                        visibility,
                        PersistMode::DoNotPersist,
                    )?);
                }
                WritePayload::Merge(children) => {
                    events.extend(self.apply_user_merge_inner(
                        record.path,
                        children,
                        record.write_id,
                        PersistMode::DoNotPersist,
                    )?);
                }
            }
        }
        Ok(events)
    }

    fn apply_tagged_query_overwrite_inner(
        &mut self,
        tag: Tag,
        path: Path,
        value: Value,
    ) -> CoreResult<Vec<Event>> {
        let Some(spec) = self.tag_to_query.get(&tag).cloned() else {
            // The query was unlistened while the update was in flight.
            tracing::warn!(%tag, %path, "server update for unknown tag");
            return Ok(Vec::new());
        };
        let Some(relative) = spec.path.strip_prefix(&path) else {
            tracing::warn!(%tag, %path, query = %spec, "tagged update outside its query");
            return Ok(Vec::new());
        };
        let target_spec = if relative.is_empty() {
            spec.clone()
        } else {
            QuerySpec::default_at(path)
        };
        self.persistence.update_server_cache(&target_spec, &value)?;
        if relative.is_empty() && !spec.loads_all_data() {
            let keys: BTreeSet<String> = vutil::children_of(&value)
                .map(|(key, _)| key.clone())
                .collect();
            self.persistence.set_tracked_query_keys(&spec, &keys)?;
        }
        let operation = Operation::overwrite(
            OperationSource::for_server_tagged_query(spec.params.clone()),
            relative,
            value,
        );
        Ok(self.apply_tagged_operation(&spec, &operation))
    }

    fn apply_tagged_query_merge_inner(
        &mut self,
        tag: Tag,
        path: Path,
        children: CompoundWrite,
    ) -> CoreResult<Vec<Event>> {
        let Some(spec) = self.tag_to_query.get(&tag).cloned() else {
            tracing::warn!(%tag, %path, "server merge for unknown tag");
            return Ok(Vec::new());
        };
        let Some(relative) = spec.path.strip_prefix(&path) else {
            tracing::warn!(%tag, %path, query = %spec, "tagged merge outside its query");
            return Ok(Vec::new());
        };
        self.persistence.update_server_cache_merge(&path, &children)?;
        if relative.is_empty() && !spec.loads_all_data() {
            let mut added = BTreeSet::new();
            let mut removed = BTreeSet::new();
            for (entry_path, value) in children.entries() {
                if entry_path.len() == 1 {
                    if let Some(key) = entry_path.front() {
                        if vutil::is_empty_value(&value) {
                            removed.insert(key.to_owned());
                        } else {
                            added.insert(key.to_owned());
                        }
                    }
                }
            }
            if !added.is_empty() || !removed.is_empty() {
                self.persistence
                    .update_tracked_query_keys(&spec, &added, &removed)?;
            }
        }
        let operation = Operation::merge(
            OperationSource::for_server_tagged_query(spec.params.clone()),
            relative,
            children,
        );
        Ok(self.apply_tagged_operation(&spec, &operation))
    }

    fn apply_tagged_listen_complete_inner(&mut self, tag: Tag) -> CoreResult<Vec<Event>> {
        let Some(spec) = self.tag_to_query.get(&tag).cloned() else {
            tracing::warn!(%tag, "listen complete for unknown tag");
            return Ok(Vec::new());
        };
        self.persistence.set_query_complete(&spec)?;
        let operation = Operation::listen_complete(
            OperationSource::for_server_tagged_query(spec.params.clone()),
            Path::root(),
        );
        Ok(self.apply_tagged_operation(&spec, &operation))
    }
}

/// The query actually sent over the wire: limit-less non-default orderings
/// listen as the default query.
fn spec_for_listening(spec: &QuerySpec) -> QuerySpec {
    if spec.loads_all_data() && !spec.is_default() {
        spec.with_default_params()
    } else {
        spec.clone()
    }
}

fn validate_no_nan(value: &Value) -> CoreResult<()> {
    match value {
        Value::Float(f) if f.is_nan() => Err(CoreError::NaNValue),
        Value::Map(map) => {
            for child in map.values() {
                validate_no_nan(child)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn sync_point_mut<'t>(tree: &'t mut Tree<SyncPoint>, path: &Path) -> Option<&'t mut SyncPoint> {
    let mut node = tree;
    for segment in path.iter() {
        node = node.child_mut(segment)?;
    }
    node.value_mut()
}

/// The queries whose wire listens a default listen at the subtree root
/// shadows (or, after a removal, the ones that need their own listens back).
///
/// A complete view claims its whole subtree; below one, nothing else is
/// collected. `skip_root_complete` excludes the subtree root's own default
/// view, which is the listen being set up.
fn collect_distinct_views(node: &Tree<SyncPoint>, skip_root_complete: bool, out: &mut Vec<QuerySpec>) {
    if !skip_root_complete {
        if let Some(view) = node.value().and_then(SyncPoint::complete_view) {
            out.push(view.spec().clone());
            return;
        }
    }
    if let Some(point) = node.value() {
        out.extend(point.query_views().map(|view| view.spec().clone()));
    }
    for child in node.children().values() {
        collect_distinct_views(child, false, out);
    }
}

/// Route an operation through the forest: children first, then the sync point
/// at this node, resolving the server cache from the first complete ancestor.
fn apply_operation_helper(
    node: &mut Tree<SyncPoint>,
    operation: &Operation,
    writes: &WriteTreeRef<'_>,
    server_cache: Option<Value>,
) -> Vec<Event> {
    if operation.path().is_empty() {
        return apply_operation_descendants(node, operation, writes, server_cache);
    }
    let server_cache = server_cache.or_else(|| {
        node.value()
            .and_then(|point| point.get_complete_server_cache(&Path::root()))
    });
    let mut events = Vec::new();
    if let Some(child_key) = operation.path().front().map(str::to_owned) {
        if let Some(child_operation) = operation.operation_for_child(&child_key) {
            if let Some(child_tree) = node.child_mut(&child_key) {
                let child_server = server_cache
                    .as_ref()
                    .map(|cache| vutil::get_child(cache, &child_key));
                events.extend(apply_operation_helper(
                    child_tree,
                    &child_operation,
                    &writes.child(&child_key),
                    child_server,
                ));
            }
        }
    }
    if let Some(point) = node.value_mut() {
        events.extend(point.apply_operation(operation, writes, server_cache.as_ref()));
    }
    events
}

fn apply_operation_descendants(
    node: &mut Tree<SyncPoint>,
    operation: &Operation,
    writes: &WriteTreeRef<'_>,
    server_cache: Option<Value>,
) -> Vec<Event> {
    let server_cache = server_cache.or_else(|| {
        node.value()
            .and_then(|point| point.get_complete_server_cache(&Path::root()))
    });
    let mut events = Vec::new();
    let keys: Vec<String> = node.children().keys().cloned().collect();
    for key in keys {
        if let Some(child_operation) = operation.operation_for_child(&key) {
            if let Some(child_tree) = node.child_mut(&key) {
                let child_server = server_cache
                    .as_ref()
                    .map(|cache| vutil::get_child(cache, &key));
                events.extend(apply_operation_descendants(
                    child_tree,
                    &child_operation,
                    &writes.child(&key),
                    child_server,
                ));
            }
        }
    }
    if let Some(point) = node.value_mut() {
        events.extend(point.apply_operation(operation, writes, server_cache.as_ref()));
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventType, ValueEventRegistration};
    use crate::persistence::NoopPersistenceManager;
    use crate::query::QueryParams;
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct RecordingProvider {
        started: Arc<Mutex<Vec<(QuerySpec, Option<Tag>)>>>,
        stopped: Arc<Mutex<Vec<(QuerySpec, Option<Tag>)>>>,
    }

    impl ListenProvider for RecordingProvider {
        fn start_listening(&mut self, spec: &QuerySpec, tag: Option<Tag>, _view: &View) {
            self.started.lock().push((spec.clone(), tag));
        }

        fn stop_listening(&mut self, spec: &QuerySpec, tag: Option<Tag>) {
            self.stopped.lock().push((spec.clone(), tag));
        }
    }

    fn tree_with_provider() -> (
        SyncTree,
        Arc<Mutex<Vec<(QuerySpec, Option<Tag>)>>>,
        Arc<Mutex<Vec<(QuerySpec, Option<Tag>)>>>,
    ) {
        let provider = RecordingProvider::default();
        let started = Arc::clone(&provider.started);
        let stopped = Arc::clone(&provider.stopped);
        let tree = SyncTree::new(
            Box::new(provider),
            Box::new(NoopPersistenceManager::new()),
        );
        (tree, started, stopped)
    }

    fn p(s: &str) -> Path {
        Path::parse(s)
    }

    fn value_events(events: &[Event]) -> Vec<&Event> {
        events
            .iter()
            .filter(|e| matches!(e, Event::Data(d) if d.kind == EventType::Value))
            .collect()
    }

    #[test]
    fn default_listen_starts_without_tag() {
        let (mut tree, started, _) = tree_with_provider();
        let spec = QuerySpec::default_at(p("rooms"));
        let events = tree
            .add_event_registration(&spec, Arc::new(ValueEventRegistration::new()))
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(started.lock().as_slice(), &[(spec, None)]);
    }

    #[test]
    fn filtered_listen_gets_a_tag() {
        let (mut tree, started, _) = tree_with_provider();
        let spec = QuerySpec::new(
            p("scores"),
            QueryParams::default().order_by_key().limit_to_first(2),
        );
        let _ = tree
            .add_event_registration(&spec, Arc::new(ValueEventRegistration::new()))
            .unwrap();
        let tag = tree.tag_for_query(&spec);
        assert!(tag.is_some());
        assert_eq!(started.lock().as_slice(), &[(spec.clone(), tag)]);
        assert_eq!(tree.query_for_tag(tag.unwrap()), Some(&spec));
    }

    #[test]
    fn ancestor_default_listen_covers_descendants() {
        let (mut tree, started, _) = tree_with_provider();
        let parent = QuerySpec::default_at(p("a"));
        let child = QuerySpec::default_at(p("a/b"));
        let _ = tree
            .add_event_registration(&parent, Arc::new(ValueEventRegistration::new()))
            .unwrap();
        let _ = tree
            .add_event_registration(&child, Arc::new(ValueEventRegistration::new()))
            .unwrap();
        // Only the parent needed a wire listen.
        assert_eq!(started.lock().len(), 1);
    }

    #[test]
    fn default_listen_shadows_existing_filtered_listen() {
        let (mut tree, started, stopped) = tree_with_provider();
        let filtered = QuerySpec::new(
            p("a"),
            QueryParams::default().order_by_key().limit_to_first(1),
        );
        let _ = tree
            .add_event_registration(&filtered, Arc::new(ValueEventRegistration::new()))
            .unwrap();
        let tag = tree.tag_for_query(&filtered);
        let _ = tree
            .add_event_registration(
                &QuerySpec::default_at(p("a")),
                Arc::new(ValueEventRegistration::new()),
            )
            .unwrap();
        assert_eq!(started.lock().len(), 2);
        assert_eq!(stopped.lock().as_slice(), &[(filtered, tag)]);
    }

    #[test]
    fn server_overwrite_reaches_listener() {
        let (mut tree, _, _) = tree_with_provider();
        let spec = QuerySpec::default_at(p("chat"));
        let reg = Arc::new(ValueEventRegistration::new());
        let _ = tree.add_event_registration(&spec, reg).unwrap();
        let events = tree
            .apply_server_overwrite(p("chat"), Value::map_from([("m1", Value::Str("hi".into()))]))
            .unwrap();
        let values = value_events(&events);
        assert_eq!(values.len(), 1);
        match values[0] {
            Event::Data(d) => {
                assert_eq!(d.snapshot, Value::map_from([("m1", Value::Str("hi".into()))]));
            }
            Event::Cancel(_) => panic!("expected data event"),
        }
    }

    #[test]
    fn user_overwrite_fires_immediately_and_ack_is_quiet() {
        let (mut tree, _, _) = tree_with_provider();
        let spec = QuerySpec::default_at(p("doc"));
        let _ = tree
            .add_event_registration(&spec, Arc::new(ValueEventRegistration::new()))
            .unwrap();
        let _ = tree.apply_server_overwrite(p("doc"), Value::Int(1)).unwrap();

        let events = tree
            .apply_user_overwrite(
                p("doc"),
                Value::Int(2),
                WriteId::new(1),
                OverwriteVisibility::Visible,
                PersistMode::Persist,
            )
            .unwrap();
        assert_eq!(value_events(&events).len(), 1);

        // The server echo matches the optimistic value; the ack raises no
        // further events.
        let echo = tree.apply_server_overwrite(p("doc"), Value::Int(2)).unwrap();
        assert!(value_events(&echo).is_empty());
        let ack = tree
            .ack_user_write(WriteId::new(1), AckStatus::Confirm, PersistMode::Persist)
            .unwrap();
        assert!(value_events(&ack).is_empty());
    }

    #[test]
    fn reverted_write_rolls_views_back() {
        let (mut tree, _, _) = tree_with_provider();
        let spec = QuerySpec::default_at(p("doc"));
        let _ = tree
            .add_event_registration(&spec, Arc::new(ValueEventRegistration::new()))
            .unwrap();
        let _ = tree.apply_server_overwrite(p("doc"), Value::Int(1)).unwrap();
        let _ = tree
            .apply_user_overwrite(
                p("doc"),
                Value::Int(2),
                WriteId::new(1),
                OverwriteVisibility::Visible,
                PersistMode::Persist,
            )
            .unwrap();
        let events = tree
            .ack_user_write(WriteId::new(1), AckStatus::Revert, PersistMode::Persist)
            .unwrap();
        let values = value_events(&events);
        assert_eq!(values.len(), 1);
        match values[0] {
            Event::Data(d) => assert_eq!(d.snapshot, Value::Int(1)),
            Event::Cancel(_) => panic!("expected data event"),
        }
    }

    #[test]
    fn ack_of_unknown_write_is_an_error() {
        let (mut tree, _, _) = tree_with_provider();
        let result = tree.ack_user_write(WriteId::new(99), AckStatus::Confirm, PersistMode::DoNotPersist);
        assert!(matches!(
            result,
            Err(CoreError::UnknownWrite { write_id: 99 })
        ));
    }

    #[test]
    fn nan_values_are_rejected() {
        let (mut tree, _, _) = tree_with_provider();
        let result = tree.apply_user_overwrite(
            p("x"),
            Value::map_from([("bad", Value::Float(f64::NAN))]),
            WriteId::new(1),
            OverwriteVisibility::Visible,
            PersistMode::Persist,
        );
        assert!(matches!(result, Err(CoreError::NaNValue)));
    }

    #[test]
    fn tagged_update_reaches_only_its_query() {
        let (mut tree, _, _) = tree_with_provider();
        let filtered = QuerySpec::new(
            p("scores"),
            QueryParams::default().order_by_key().limit_to_first(1),
        );
        let _ = tree
            .add_event_registration(&filtered, Arc::new(ValueEventRegistration::new()))
            .unwrap();
        let tag = tree.tag_for_query(&filtered).unwrap();
        let events = tree
            .apply_tagged_query_overwrite(
                tag,
                p("scores"),
                Value::map_from([("a", Value::Int(1))]),
            )
            .unwrap();
        assert_eq!(value_events(&events).len(), 1);

        // Unknown tags are a race with unlisten, not an error.
        let stale = tree
            .apply_tagged_query_overwrite(Tag::new(999), p("scores"), Value::Int(1))
            .unwrap();
        assert!(stale.is_empty());
    }

    #[test]
    fn removing_default_listener_revives_descendant_listens() {
        let (mut tree, started, stopped) = tree_with_provider();
        let filtered = QuerySpec::new(
            p("a/b"),
            QueryParams::default().order_by_key().limit_to_first(1),
        );
        let _ = tree
            .add_event_registration(&filtered, Arc::new(ValueEventRegistration::new()))
            .unwrap();
        let parent = QuerySpec::default_at(p("a"));
        let reg = Arc::new(ValueEventRegistration::new());
        let id = reg.listener_id();
        let _ = tree.add_event_registration(&parent, reg).unwrap();
        // The default listen shadowed the filtered one.
        assert_eq!(stopped.lock().len(), 1);

        started.lock().clear();
        let _ = tree
            .remove_event_registration(&parent, Some(id), None)
            .unwrap();
        // The filtered listen came back, and the default one stopped.
        let restarted = started.lock();
        assert_eq!(restarted.len(), 1);
        assert_eq!(restarted[0].0, filtered);
        assert_eq!(stopped.lock().last(), Some(&(parent, None)));
    }

    #[test]
    fn keep_synced_holds_the_listen_without_events() {
        let (mut tree, started, stopped) = tree_with_provider();
        let spec = QuerySpec::default_at(p("warm"));
        tree.set_keep_synchronized(&spec, true).unwrap();
        assert_eq!(started.lock().len(), 1);
        let events = tree.apply_server_overwrite(p("warm"), Value::Int(1)).unwrap();
        assert!(events.is_empty());
        tree.set_keep_synchronized(&spec, false).unwrap();
        assert_eq!(stopped.lock().len(), 1);
        assert!(tree.is_empty());
    }

    #[test]
    fn calc_complete_event_cache_layers_writes() {
        let (mut tree, _, _) = tree_with_provider();
        let spec = QuerySpec::default_at(p("doc"));
        let _ = tree
            .add_event_registration(&spec, Arc::new(ValueEventRegistration::new()))
            .unwrap();
        let _ = tree
            .apply_server_overwrite(p("doc"), Value::map_from([("a", Value::Int(1))]))
            .unwrap();
        let _ = tree
            .apply_user_overwrite(
                p("doc/b"),
                Value::Int(2),
                WriteId::new(1),
                OverwriteVisibility::Visible,
                PersistMode::Persist,
            )
            .unwrap();
        assert_eq!(
            tree.calc_complete_event_cache(&p("doc"), &[]),
            Some(Value::map_from([("a", Value::Int(1)), ("b", Value::Int(2))]))
        );
        assert_eq!(
            tree.calc_complete_event_cache(&p("doc"), &[WriteId::new(1)]),
            Some(Value::map_from([("a", Value::Int(1))]))
        );
    }

    #[test]
    fn remove_all_writes_reverts_optimistic_state() {
        let (mut tree, _, _) = tree_with_provider();
        let spec = QuerySpec::default_at(p("doc"));
        let _ = tree
            .add_event_registration(&spec, Arc::new(ValueEventRegistration::new()))
            .unwrap();
        let _ = tree.apply_server_overwrite(p("doc"), Value::Int(1)).unwrap();
        let _ = tree
            .apply_user_overwrite(
                p("doc"),
                Value::Int(2),
                WriteId::new(1),
                OverwriteVisibility::Visible,
                PersistMode::Persist,
            )
            .unwrap();
        let events = tree.remove_all_writes().unwrap();
        let values = value_events(&events);
        assert_eq!(values.len(), 1);
        match values[0] {
            Event::Data(d) => assert_eq!(d.snapshot, Value::Int(1)),
            Event::Cancel(_) => panic!("expected data event"),
        }
    }
}
