//! Applies operations to a view's caches and collects the resulting changes.

use treesync_codec::{Path, Value, PRIORITY_KEY};

use crate::events::{Change, ChildChangeAccumulator};
use crate::operation::Operation;
use crate::query::{IndexedValue, Post, QueryComparator};
use crate::tree::Tree;
use crate::view::cache::{CacheNode, ViewCache};
use crate::view::filter::{CompleteChildSource, NoCompleteSource, NodeFilter};
use crate::vutil;
use crate::writes::{CompoundWrite, WriteTreeRef};

/// Applies operations to a [`ViewCache`] through a query's filter chain.
#[derive(Debug)]
pub struct ViewProcessor {
    filter: Box<dyn NodeFilter>,
}

impl ViewProcessor {
    /// A processor for the given filter.
    #[must_use]
    pub fn new(filter: Box<dyn NodeFilter>) -> Self {
        Self { filter }
    }

    /// The filter this processor applies.
    #[must_use]
    pub fn filter(&self) -> &dyn NodeFilter {
        self.filter.as_ref()
    }

    /// Apply one operation, returning the new cache and the changes views
    /// must report.
    #[must_use]
    pub fn apply_operation(
        &self,
        old: &ViewCache,
        operation: &Operation,
        writes: &WriteTreeRef<'_>,
        complete_cache: Option<&Value>,
    ) -> (ViewCache, Vec<Change>) {
        let mut acc = ChildChangeAccumulator::new();
        let new_cache = match operation {
            Operation::Overwrite {
                source,
                path,
                value,
            } => {
                if source.is_from_user() {
                    self.apply_user_overwrite(old, path, value, writes, complete_cache, &mut acc)
                } else {
                    let filter_server =
                        source.is_tagged() || (old.server().is_filtered() && !path.is_empty());
                    self.apply_server_overwrite(
                        old,
                        path,
                        value,
                        writes,
                        complete_cache,
                        filter_server,
                        &mut acc,
                    )
                }
            }
            Operation::Merge {
                source,
                path,
                children,
            } => {
                if source.is_from_user() {
                    self.apply_user_merge(old, path, children, writes, complete_cache, &mut acc)
                } else {
                    let filter_server = source.is_tagged() || old.server().is_filtered();
                    self.apply_server_merge(
                        old,
                        path,
                        children,
                        writes,
                        complete_cache,
                        filter_server,
                        &mut acc,
                    )
                }
            }
            Operation::AckUserWrite {
                path,
                affected,
                revert,
            } => {
                if *revert {
                    self.revert_user_write(old, path, writes, complete_cache, &mut acc)
                } else {
                    self.ack_user_write(old, path, affected, writes, complete_cache, &mut acc)
                }
            }
            Operation::ListenComplete { path, .. } => {
                self.listen_complete(old, path, writes, &mut acc)
            }
        };
        let mut changes = acc.into_changes();
        Self::maybe_add_value_event(old, &new_cache, &mut changes);
        (new_cache, changes)
    }

    fn maybe_add_value_event(old: &ViewCache, new: &ViewCache, changes: &mut Vec<Change>) {
        let local = new.local();
        if !local.is_fully_initialized() {
            return;
        }
        let value = local.value();
        let is_leaf_or_empty = vutil::is_leaf_value(value) || vutil::is_empty_value(value);
        let should_fire = !changes.is_empty()
            || !old.local().is_fully_initialized()
            || match old.complete_local_snap() {
                None => true,
                Some(old_value) => {
                    (is_leaf_or_empty && value != old_value)
                        || vutil::get_priority(value) != vutil::get_priority(old_value)
                }
            };
        if should_fire {
            changes.push(Change::value(value.clone()));
        }
    }

    fn generate_event_cache_after_server_event(
        &self,
        view_cache: &ViewCache,
        change_path: &Path,
        writes: &WriteTreeRef<'_>,
        source: &dyn CompleteChildSource,
        acc: &mut ChildChangeAccumulator,
    ) -> ViewCache {
        let old_local = view_cache.local();
        if writes.shadowing_write(change_path).is_some() {
            // A pending write hides the server change from local views.
            return view_cache.clone();
        }
        let new_local = if change_path.is_empty() {
            debug_assert!(
                view_cache.server().is_fully_initialized(),
                "complete server event on incomplete cache"
            );
            if view_cache.server().is_filtered() {
                let server_snap = view_cache.complete_server_snap();
                let complete_children = match server_snap {
                    Some(value) if value.is_map() => value.clone(),
                    _ => Value::Null,
                };
                let complete_event_children =
                    writes.calc_complete_event_children(&complete_children);
                self.filter.update_full_value(
                    old_local.indexed(),
                    &IndexedValue::new(complete_event_children, self.filter.params().clone()),
                    Some(acc),
                )
            } else {
                let complete_node = writes
                    .calc_complete_event_cache(view_cache.complete_server_snap(), &[], false)
                    .unwrap_or(Value::Null);
                self.filter.update_full_value(
                    old_local.indexed(),
                    &IndexedValue::new(complete_node, self.filter.params().clone()),
                    Some(acc),
                )
            }
        } else if change_path.front() == Some(PRIORITY_KEY) {
            match writes
                .calc_event_cache_after_server_overwrite(change_path, view_cache.server().value())
            {
                Some(updated_priority) => {
                    self.filter.update_priority(old_local.indexed(), &updated_priority)
                }
                None => old_local.indexed().clone(),
            }
        } else {
            let child_key = change_path.front().unwrap_or_default().to_owned();
            let child_change_path = change_path.pop_front();
            let new_event_child = if old_local.is_complete_for_child(&child_key) {
                let event_child_update = writes.calc_event_cache_after_server_overwrite(
                    change_path,
                    view_cache.server().value(),
                );
                let mut child = vutil::get_child(old_local.value(), &child_key);
                if let Some(update) = event_child_update {
                    vutil::update_child_at(&mut child, &child_change_path, update);
                }
                Some(child)
            } else {
                writes.calc_complete_child(&child_key, view_cache.server())
            };
            match new_event_child {
                Some(child) => self.filter.update_child(
                    old_local.indexed(),
                    &child_key,
                    &child,
                    &child_change_path,
                    source,
                    Some(acc),
                ),
                None => old_local.indexed().clone(),
            }
        };
        let fully_initialized = old_local.is_fully_initialized() || change_path.is_empty();
        view_cache.update_local_snap(new_local, fully_initialized, self.filter.filters_values())
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_server_overwrite(
        &self,
        old: &ViewCache,
        change_path: &Path,
        changed_value: &Value,
        writes: &WriteTreeRef<'_>,
        complete_cache: Option<&Value>,
        filter_server_node: bool,
        acc: &mut ChildChangeAccumulator,
    ) -> ViewCache {
        let old_server = old.server();
        let server_filter: &dyn NodeFilter = if filter_server_node {
            self.filter.as_ref()
        } else {
            self.filter.indexed_filter()
        };
        let new_server = if change_path.is_empty() {
            server_filter.update_full_value(
                old_server.indexed(),
                &IndexedValue::new(changed_value.clone(), server_filter.params().clone()),
                None,
            )
        } else if server_filter.filters_values() && !old_server.is_filtered() {
            // A deep update on an unfiltered cache: recompute the whole
            // filtered value from the patched cache.
            let mut new_server_value = old_server.value().clone();
            vutil::update_child_at(&mut new_server_value, change_path, changed_value.clone());
            server_filter.update_full_value(
                old_server.indexed(),
                &IndexedValue::new(new_server_value, server_filter.params().clone()),
                None,
            )
        } else {
            let child_key = change_path.front().unwrap_or_default().to_owned();
            if !old_server.is_complete_for_path(change_path) && change_path.len() > 1 {
                if filter_server_node {
                    // Deep update below a child we know nothing about,
                    // intended for a different listener.
                    return old.clone();
                }
                // An unfiltered view adopts a deep update even when the
                // parent is unknown: patch what we have and treat the result
                // as the complete value.
                let mut new_server_value = old_server.value().clone();
                vutil::update_child_at(&mut new_server_value, change_path, changed_value.clone());
                let new_server = server_filter.update_full_value(
                    old_server.indexed(),
                    &IndexedValue::new(new_server_value, server_filter.params().clone()),
                    None,
                );
                let new_view_cache =
                    old.update_server_snap(new_server, true, server_filter.filters_values());
                let source = WriteTreeSource {
                    writes,
                    view_cache: &new_view_cache,
                    opt_complete_server_cache: complete_cache,
                };
                return self.generate_event_cache_after_server_event(
                    &new_view_cache,
                    &Path::root(),
                    writes,
                    &source,
                    acc,
                );
            }
            let child_change_path = change_path.pop_front();
            let mut new_child = vutil::get_child(old_server.value(), &child_key);
            vutil::update_child_at(&mut new_child, &child_change_path, changed_value.clone());
            if child_key == PRIORITY_KEY {
                server_filter.update_priority(old_server.indexed(), &new_child)
            } else {
                server_filter.update_child(
                    old_server.indexed(),
                    &child_key,
                    &new_child,
                    &child_change_path,
                    &NoCompleteSource,
                    None,
                )
            }
        };
        let new_view_cache = old.update_server_snap(
            new_server,
            old_server.is_fully_initialized() || change_path.is_empty(),
            server_filter.filters_values(),
        );
        let source = WriteTreeSource {
            writes,
            view_cache: &new_view_cache,
            opt_complete_server_cache: complete_cache,
        };
        self.generate_event_cache_after_server_event(
            &new_view_cache,
            change_path,
            writes,
            &source,
            acc,
        )
    }

    fn apply_user_overwrite(
        &self,
        old: &ViewCache,
        change_path: &Path,
        changed_value: &Value,
        writes: &WriteTreeRef<'_>,
        complete_cache: Option<&Value>,
        acc: &mut ChildChangeAccumulator,
    ) -> ViewCache {
        let old_local = old.local();
        let source = WriteTreeSource {
            writes,
            view_cache: old,
            opt_complete_server_cache: complete_cache,
        };
        if change_path.is_empty() {
            let new_local = self.filter.update_full_value(
                old_local.indexed(),
                &IndexedValue::new(changed_value.clone(), self.filter.params().clone()),
                Some(acc),
            );
            old.update_local_snap(new_local, true, self.filter.filters_values())
        } else if change_path.front() == Some(PRIORITY_KEY) {
            let new_local = self.filter.update_priority(old_local.indexed(), changed_value);
            old.update_local_snap(
                new_local,
                old_local.is_fully_initialized(),
                old_local.is_filtered(),
            )
        } else {
            let child_key = change_path.front().unwrap_or_default().to_owned();
            let child_change_path = change_path.pop_front();
            let old_child = vutil::get_child(old_local.value(), &child_key);
            let new_child = if child_change_path.is_empty() {
                changed_value.clone()
            } else {
                match source.complete_child(&child_key) {
                    Some(mut complete_child) => {
                        let priority_on_empty = child_change_path.back() == Some(PRIORITY_KEY)
                            && vutil::is_empty_value(&vutil::get_child_at(
                                &complete_child,
                                &child_change_path.parent().unwrap_or_else(Path::root),
                            ));
                        // A priority write against a node the pending writes
                        // leave empty has nothing to attach to.
                        if !priority_on_empty {
                            vutil::update_child_at(
                                &mut complete_child,
                                &child_change_path,
                                changed_value.clone(),
                            );
                        }
                        complete_child
                    }
                    None => Value::Null,
                }
            };
            if old_child == new_child {
                old.clone()
            } else {
                let new_local = self.filter.update_child(
                    old_local.indexed(),
                    &child_key,
                    &new_child,
                    &child_change_path,
                    &source,
                    Some(acc),
                );
                old.update_local_snap(
                    new_local,
                    old_local.is_fully_initialized(),
                    self.filter.filters_values(),
                )
            }
        }
    }

    fn apply_user_merge(
        &self,
        old: &ViewCache,
        path: &Path,
        changed_children: &CompoundWrite,
        writes: &WriteTreeRef<'_>,
        complete_cache: Option<&Value>,
        acc: &mut ChildChangeAccumulator,
    ) -> ViewCache {
        // Apply writes into known-complete locations first so later writes
        // see consistent data.
        let mut current = old.clone();
        for (relative_path, child_value) in changed_children.entries() {
            let write_path = path.join(&relative_path);
            if old.local().is_complete_for_path(&write_path) {
                current = self.apply_user_overwrite(
                    &current,
                    &write_path,
                    &child_value,
                    writes,
                    complete_cache,
                    acc,
                );
            }
        }
        for (relative_path, child_value) in changed_children.entries() {
            let write_path = path.join(&relative_path);
            if !old.local().is_complete_for_path(&write_path) {
                current = self.apply_user_overwrite(
                    &current,
                    &write_path,
                    &child_value,
                    writes,
                    complete_cache,
                    acc,
                );
            }
        }
        current
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_server_merge(
        &self,
        old: &ViewCache,
        path: &Path,
        changed_children: &CompoundWrite,
        writes: &WriteTreeRef<'_>,
        complete_cache: Option<&Value>,
        filter_server_node: bool,
        acc: &mut ChildChangeAccumulator,
    ) -> ViewCache {
        // A merge intended for data we no longer have can be ignored.
        if vutil::is_empty_value(old.server().value()) && !old.server().is_fully_initialized() {
            return old.clone();
        }
        let merge_tree = if path.is_empty() {
            changed_children.clone()
        } else {
            let mut rooted = CompoundWrite::empty();
            rooted.add_writes(path, changed_children);
            rooted
        };
        let server_value = old.server().value().clone();
        let child_writes = merge_tree.child_compound_writes();
        let mut current = old.clone();
        for (child_key, child_write) in &child_writes {
            if let Some(server_child) = server_value.child(child_key) {
                let new_child = child_write.apply_to(server_child);
                current = self.apply_server_overwrite(
                    &current,
                    &Path::from_segments(vec![child_key.clone()]),
                    &new_child,
                    writes,
                    complete_cache,
                    filter_server_node,
                    acc,
                );
            }
        }
        for (child_key, child_write) in &child_writes {
            // A deep merge into a child we know nothing about cannot be
            // applied; a complete write of the child always can.
            let is_unknown_deep_merge = !old.server().is_complete_for_child(child_key)
                && child_write.root_write().is_none();
            if server_value.child(child_key).is_none() && !is_unknown_deep_merge {
                let new_child = child_write.apply_to(&Value::Null);
                current = self.apply_server_overwrite(
                    &current,
                    &Path::from_segments(vec![child_key.clone()]),
                    &new_child,
                    writes,
                    complete_cache,
                    filter_server_node,
                    acc,
                );
            }
        }
        current
    }

    fn ack_user_write(
        &self,
        old: &ViewCache,
        ack_path: &Path,
        affected: &Tree<bool>,
        writes: &WriteTreeRef<'_>,
        complete_cache: Option<&Value>,
        acc: &mut ChildChangeAccumulator,
    ) -> ViewCache {
        if writes.shadowing_write(ack_path).is_some() {
            return old.clone();
        }
        let filter_server_node = old.server().is_filtered();
        let server = old.server();
        if affected.value().is_some() {
            // An acknowledged overwrite: re-apply the server's value.
            if (ack_path.is_empty() && server.is_fully_initialized())
                || server.is_complete_for_path(ack_path)
            {
                let server_value = vutil::get_child_at(server.value(), ack_path);
                self.apply_server_overwrite(
                    old,
                    ack_path,
                    &server_value,
                    writes,
                    complete_cache,
                    filter_server_node,
                    acc,
                )
            } else if ack_path.is_empty() {
                // Everything may have been affected; re-apply all known
                // children as a merge.
                let mut changed_children = CompoundWrite::empty();
                for (key, child) in vutil::children_of(server.value()) {
                    changed_children
                        .add_write(&Path::from_segments(vec![key.clone()]), child.clone());
                }
                self.apply_server_merge(
                    old,
                    ack_path,
                    &changed_children,
                    writes,
                    complete_cache,
                    filter_server_node,
                    acc,
                )
            } else {
                old.clone()
            }
        } else {
            // An acknowledged merge: re-apply the affected paths we have
            // server data for.
            let mut changed_children = CompoundWrite::empty();
            affected.for_each_value(&mut |merge_path, _| {
                let server_cache_path = ack_path.join(merge_path);
                if server.is_complete_for_path(&server_cache_path) {
                    changed_children.add_write(
                        merge_path,
                        vutil::get_child_at(server.value(), &server_cache_path),
                    );
                }
            });
            self.apply_server_merge(
                old,
                ack_path,
                &changed_children,
                writes,
                complete_cache,
                filter_server_node,
                acc,
            )
        }
    }

    fn revert_user_write(
        &self,
        old: &ViewCache,
        path: &Path,
        writes: &WriteTreeRef<'_>,
        complete_cache: Option<&Value>,
        acc: &mut ChildChangeAccumulator,
    ) -> ViewCache {
        if writes.shadowing_write(path).is_some() {
            return old.clone();
        }
        let source = WriteTreeSource {
            writes,
            view_cache: old,
            opt_complete_server_cache: complete_cache,
        };
        let old_local = old.local().indexed().clone();
        let new_local = if path.is_empty() || path.front() == Some(PRIORITY_KEY) {
            let new_value = if old.server().is_fully_initialized() {
                writes
                    .calc_complete_event_cache(old.complete_server_snap(), &[], false)
                    .unwrap_or(Value::Null)
            } else {
                writes.calc_complete_event_children(old.server().value())
            };
            self.filter.update_full_value(
                &old_local,
                &IndexedValue::new(new_value, self.filter.params().clone()),
                Some(acc),
            )
        } else {
            let child_key = path.front().unwrap_or_default().to_owned();
            let new_child = writes.calc_complete_child(&child_key, old.server());
            let mut updated = match new_child {
                Some(child) => self.filter.update_child(
                    &old_local,
                    &child_key,
                    &child,
                    &path.pop_front(),
                    &source,
                    Some(acc),
                ),
                None if old_local.value().child(&child_key).is_some() => self.filter.update_child(
                    &old_local,
                    &child_key,
                    &Value::Null,
                    &path.pop_front(),
                    &source,
                    Some(acc),
                ),
                None => old_local.clone(),
            };
            if vutil::is_empty_value(updated.value()) && old.server().is_fully_initialized() {
                // The view emptied out; a complete recalculation may find a
                // leaf value underneath.
                let complete = writes
                    .calc_complete_event_cache(old.complete_server_snap(), &[], false)
                    .unwrap_or(Value::Null);
                if vutil::is_leaf_value(&complete) {
                    updated = self.filter.update_full_value(
                        &updated,
                        &IndexedValue::new(complete, self.filter.params().clone()),
                        Some(acc),
                    );
                }
            }
            updated
        };
        let complete = old.server().is_fully_initialized()
            || writes.shadowing_write(&Path::root()).is_some();
        old.update_local_snap(new_local, complete, self.filter.filters_values())
    }

    fn listen_complete(
        &self,
        old: &ViewCache,
        path: &Path,
        writes: &WriteTreeRef<'_>,
        acc: &mut ChildChangeAccumulator,
    ) -> ViewCache {
        let old_server = old.server();
        let new_view_cache = old.update_server_snap(
            old_server.indexed().clone(),
            old_server.is_fully_initialized() || path.is_empty(),
            old_server.is_filtered(),
        );
        self.generate_event_cache_after_server_event(
            &new_view_cache,
            path,
            writes,
            &NoCompleteSource,
            acc,
        )
    }
}

/// A [`CompleteChildSource`] backed by the pending writes and the view's (or
/// an explicitly provided) server cache.
struct WriteTreeSource<'a> {
    writes: &'a WriteTreeRef<'a>,
    view_cache: &'a ViewCache,
    opt_complete_server_cache: Option<&'a Value>,
}

impl CompleteChildSource for WriteTreeSource<'_> {
    fn complete_child(&self, child_key: &str) -> Option<Value> {
        let local = self.view_cache.local();
        if local.is_complete_for_child(child_key) {
            return Some(vutil::get_child(local.value(), child_key));
        }
        match self.opt_complete_server_cache {
            Some(server_value) => {
                let node = CacheNode::new(
                    IndexedValue::default_index(server_value.clone()),
                    true,
                    false,
                );
                self.writes.calc_complete_child(child_key, &node)
            }
            None => self
                .writes
                .calc_complete_child(child_key, self.view_cache.server()),
        }
    }

    fn child_after(
        &self,
        comparator: &QueryComparator,
        post: &Post,
        reverse: bool,
    ) -> Option<(String, Value)> {
        let complete = self
            .opt_complete_server_cache
            .or_else(|| self.view_cache.complete_server_snap());
        self.writes
            .calc_next_node_after_post(complete, post, reverse, comparator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use crate::operation::OperationSource;
    use crate::query::QueryParams;
    use crate::view::filter::filter_from_params;
    use crate::writes::WriteTree;

    fn processor(params: &QueryParams) -> ViewProcessor {
        ViewProcessor::new(filter_from_params(params))
    }

    fn apply(
        processor: &ViewProcessor,
        cache: &ViewCache,
        operation: &Operation,
    ) -> (ViewCache, Vec<Change>) {
        let writes = WriteTree::new();
        let write_ref = writes.child_writes(&Path::root());
        processor.apply_operation(cache, operation, &write_ref, None)
    }

    #[test]
    fn server_overwrite_initializes_view() {
        let params = QueryParams::default();
        let processor = processor(&params);
        let cache = ViewCache::empty(&params);
        let op = Operation::overwrite(
            OperationSource::server(),
            Path::root(),
            Value::map_from([("a", Value::Int(1))]),
        );
        let (new_cache, changes) = apply(&processor, &cache, &op);
        assert!(new_cache.local().is_fully_initialized());
        assert!(new_cache.server().is_fully_initialized());
        let kinds: Vec<EventType> = changes.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![EventType::ChildAdded, EventType::Value]);
    }

    #[test]
    fn user_overwrite_updates_local_only() {
        let params = QueryParams::default();
        let processor = processor(&params);
        let cache = ViewCache::empty(&params);
        let init = Operation::overwrite(OperationSource::server(), Path::root(), Value::Null);
        let (cache, _) = apply(&processor, &cache, &init);
        let op = Operation::overwrite(
            OperationSource::user(),
            Path::parse("a"),
            Value::Int(5),
        );
        let (new_cache, changes) = apply(&processor, &cache, &op);
        assert_eq!(
            vutil::get_child(new_cache.local().value(), "a"),
            Value::Int(5)
        );
        assert!(vutil::is_empty_value(new_cache.server().value()));
        assert!(changes.iter().any(|c| c.kind == EventType::ChildAdded));
    }

    #[test]
    fn server_merge_on_uninitialized_cache_is_dropped() {
        let params = QueryParams::default();
        let processor = processor(&params);
        let cache = ViewCache::empty(&params);
        let merge = CompoundWrite::from_children([("a", Value::Int(1))]);
        let op = Operation::merge(OperationSource::server(), Path::root(), merge);
        let (new_cache, changes) = apply(&processor, &cache, &op);
        assert_eq!(&new_cache, &cache);
        assert!(changes.is_empty());
    }

    #[test]
    fn listen_complete_marks_initialized_and_fires_value() {
        let params = QueryParams::default();
        let processor = processor(&params);
        let cache = ViewCache::empty(&params);
        let op = Operation::listen_complete(OperationSource::server(), Path::root());
        let (new_cache, changes) = apply(&processor, &cache, &op);
        assert!(new_cache.server().is_fully_initialized());
        assert!(new_cache.local().is_fully_initialized());
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, EventType::Value);
        assert!(changes[0].value.is_null());
    }

    #[test]
    fn tagged_deep_overwrite_below_unknown_child_is_ignored() {
        let params = QueryParams::default().order_by_value().limit_to_first(1);
        let processor = processor(&params);
        let cache = ViewCache::empty(&params);
        // A tagged init goes through the limiting filter, so child "z" falls
        // outside the stored window.
        let init = Operation::overwrite(
            OperationSource::for_server_tagged_query(params.clone()),
            Path::root(),
            Value::map_from([("a", Value::Int(1)), ("z", Value::Int(9))]),
        );
        let (cache, _) = apply(&processor, &cache, &init);
        assert!(cache.server().is_filtered());
        let deep = Operation::overwrite(
            OperationSource::for_server_tagged_query(params.clone()),
            Path::parse("z/nested"),
            Value::Int(10),
        );
        let (new_cache, changes) = apply(&processor, &cache, &deep);
        assert_eq!(&new_cache, &cache);
        assert!(changes.is_empty());
    }

    #[test]
    fn deep_overwrite_on_unfiltered_view_establishes_value() {
        let params = QueryParams::default();
        let processor = processor(&params);
        let cache = ViewCache::empty(&params);
        let op = Operation::overwrite(
            OperationSource::server(),
            Path::parse("fruit/apple"),
            Value::from("red"),
        );
        let (new_cache, changes) = apply(&processor, &cache, &op);
        assert!(new_cache.local().is_fully_initialized());
        let expected = Value::map_from([(
            "fruit",
            Value::map_from([("apple", Value::from("red"))]),
        )]);
        assert_eq!(new_cache.local().value(), &expected);
        let value_changes: Vec<&Change> = changes
            .iter()
            .filter(|c| c.kind == EventType::Value)
            .collect();
        assert_eq!(value_changes.len(), 1);
        assert_eq!(value_changes[0].value, expected);
    }
}
