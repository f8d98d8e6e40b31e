//! The log of outstanding local writes and the overlay derived from it.
//!
//! Every local write is recorded with its id until the server acknowledges
//! it. The visible writes are additionally folded into a [`CompoundWrite`]
//! overlay for cheap lookups; removing a write that other writes overlap
//! forces a rebuild of the overlay from the log.

use treesync_codec::{Path, Value};

use crate::query::{Post, QueryComparator};
use crate::types::{OverwriteVisibility, WriteId};
use crate::view::CacheNode;
use crate::vutil;
use crate::writes::CompoundWrite;

/// The payload of a recorded write.
#[derive(Debug, Clone, PartialEq)]
pub enum WritePayload {
    /// A value replacing everything at the write path.
    Overwrite(Value),
    /// Independent writes below the write path.
    Merge(CompoundWrite),
}

/// One outstanding local write.
#[derive(Debug, Clone, PartialEq)]
pub struct UserWriteRecord {
    /// The id assigned to the write.
    pub write_id: WriteId,
    /// The location the write targets.
    pub path: Path,
    /// The written data.
    pub payload: WritePayload,
    /// Whether local views see the write before acknowledgement.
    pub visible: bool,
}

impl UserWriteRecord {
    /// Whether this record is an overwrite.
    #[must_use]
    pub const fn is_overwrite(&self) -> bool {
        matches!(self.payload, WritePayload::Overwrite(_))
    }

    fn contains_path(&self, path: &Path) -> bool {
        match &self.payload {
            WritePayload::Overwrite(_) => self.path.contains(path),
            WritePayload::Merge(merge) => merge
                .entries()
                .iter()
                .any(|(child_path, _)| self.path.join(child_path).contains(path)),
        }
    }

    fn overlaps(&self, path: &Path) -> bool {
        self.path.contains(path) || path.contains(&self.path)
    }
}

/// The set of outstanding writes, with fast lookups for the visible ones.
#[derive(Debug, Clone, Default)]
pub struct WriteTree {
    visible_writes: CompoundWrite,
    all_writes: Vec<UserWriteRecord>,
    last_write_id: Option<WriteId>,
}

impl WriteTree {
    /// An empty write tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A reference to this tree scoped to a location.
    #[must_use]
    pub fn child_writes(&self, path: &Path) -> WriteTreeRef<'_> {
        WriteTreeRef {
            path: path.clone(),
            tree: self,
        }
    }

    /// Record an overwrite. Ids must arrive in increasing order.
    pub fn add_overwrite(
        &mut self,
        path: Path,
        value: Value,
        write_id: WriteId,
        visibility: OverwriteVisibility,
    ) {
        debug_assert!(
            self.last_write_id.is_none_or(|last| write_id > last),
            "write ids must be added in order"
        );
        let visible = visibility.is_visible();
        if visible {
            self.visible_writes.add_write(&path, value.clone());
        }
        self.all_writes.push(UserWriteRecord {
            write_id,
            path,
            payload: WritePayload::Overwrite(value),
            visible,
        });
        self.last_write_id = Some(write_id);
    }

    /// Record a merge. Ids must arrive in increasing order.
    pub fn add_merge(&mut self, path: Path, children: CompoundWrite, write_id: WriteId) {
        debug_assert!(
            self.last_write_id.is_none_or(|last| write_id > last),
            "write ids must be added in order"
        );
        self.visible_writes.add_writes(&path, &children);
        self.all_writes.push(UserWriteRecord {
            write_id,
            path,
            payload: WritePayload::Merge(children),
            visible: true,
        });
        self.last_write_id = Some(write_id);
    }

    /// The record for a write id, if still outstanding.
    #[must_use]
    pub fn get_write(&self, write_id: WriteId) -> Option<&UserWriteRecord> {
        self.all_writes.iter().find(|r| r.write_id == write_id)
    }

    /// All outstanding records, oldest first.
    #[must_use]
    pub fn outstanding_writes(&self) -> &[UserWriteRecord] {
        &self.all_writes
    }

    /// Drop every outstanding write, returning the purged records.
    pub fn purge_all_writes(&mut self) -> Vec<UserWriteRecord> {
        self.visible_writes = CompoundWrite::empty();
        std::mem::take(&mut self.all_writes)
    }

    /// Remove an acknowledged write from the log.
    ///
    /// Returns whether views must re-evaluate state for the write's path:
    /// `false` when the write was invisible or completely shadowed by a later
    /// write, `true` otherwise. Overlapping writes force a rebuild of the
    /// visible overlay from the log.
    pub fn remove_write(&mut self, write_id: WriteId) -> bool {
        let Some(index) = self.all_writes.iter().position(|r| r.write_id == write_id) else {
            return false;
        };
        let removed = self.all_writes.remove(index);
        let mut removed_was_visible = removed.visible;
        let mut overlaps = false;
        for (i, record) in self.all_writes.iter().enumerate().rev() {
            if !record.visible {
                continue;
            }
            if i >= index && record.contains_path(&removed.path) {
                // A later write shadows the removed one entirely.
                removed_was_visible = false;
                break;
            }
            if record.overlaps(&removed.path) {
                overlaps = true;
            }
        }
        if !removed_was_visible {
            return false;
        }
        if overlaps {
            self.reset_tree();
        } else {
            match &removed.payload {
                WritePayload::Overwrite(_) => self.visible_writes.remove_write(&removed.path),
                WritePayload::Merge(merge) => {
                    for (child_path, _) in merge.entries() {
                        self.visible_writes
                            .remove_write(&removed.path.join(&child_path));
                    }
                }
            }
        }
        true
    }

    /// The complete value a visible write pins at `path`, if any.
    #[must_use]
    pub fn get_complete_write_data(&self, path: &Path) -> Option<Value> {
        self.visible_writes.get_complete_value(path)
    }

    fn reset_tree(&mut self) {
        self.visible_writes =
            layer_tree(&self.all_writes, &Path::root(), |r| r.visible);
    }

    fn calc_complete_event_cache(
        &self,
        tree_path: &Path,
        complete_server_cache: Option<&Value>,
        write_ids_to_exclude: &[WriteId],
        include_hidden_writes: bool,
    ) -> Option<Value> {
        if write_ids_to_exclude.is_empty() && !include_hidden_writes {
            if let Some(shadowing) = self.visible_writes.get_complete_value(tree_path) {
                return Some(shadowing);
            }
            let sub_merge = self.visible_writes.child_compound_write(tree_path);
            if sub_merge.is_empty() {
                return complete_server_cache.cloned();
            }
            if complete_server_cache.is_none() && !sub_merge.has_complete_write(&Path::root()) {
                return None;
            }
            let base = complete_server_cache.cloned().unwrap_or(Value::Null);
            return Some(sub_merge.apply_to(&base));
        }
        let merge = self.visible_writes.child_compound_write(tree_path);
        if !include_hidden_writes && merge.is_empty() {
            return complete_server_cache.cloned();
        }
        let merge_at_path = layer_tree(&self.all_writes, tree_path, |r| {
            (r.visible || include_hidden_writes)
                && !write_ids_to_exclude.contains(&r.write_id)
                && r.overlaps(tree_path)
        });
        if merge_at_path.is_empty() {
            return complete_server_cache.cloned();
        }
        if complete_server_cache.is_none() && !merge_at_path.has_complete_write(&Path::root()) {
            return None;
        }
        let base = complete_server_cache.cloned().unwrap_or(Value::Null);
        Some(merge_at_path.apply_to(&base))
    }

    fn calc_complete_event_children(
        &self,
        tree_path: &Path,
        complete_server_children: &Value,
    ) -> Value {
        let merge = self.visible_writes.child_compound_write(tree_path);
        if let Some(top_level_set) = merge.root_write() {
            let mut result = Value::Null;
            for (key, child) in vutil::children_of(top_level_set) {
                vutil::update_child(&mut result, key, child.clone());
            }
            return result;
        }
        let mut result = Value::Null;
        for (key, child) in vutil::children_of(complete_server_children) {
            let child_merge = merge.child_compound_write(&Path::from_segments(vec![key.clone()]));
            let merged = child_merge.apply_to(child);
            if !vutil::is_empty_value(&merged) {
                vutil::update_child(&mut result, key, merged);
            }
        }
        for (key, value) in merge.complete_children() {
            if !vutil::is_empty_value(&value) {
                vutil::update_child(&mut result, &key, value);
            }
        }
        result
    }

    fn calc_event_cache_after_server_overwrite(
        &self,
        tree_path: &Path,
        child_path: &Path,
        existing_server_cache: &Value,
    ) -> Option<Value> {
        let path = tree_path.join(child_path);
        if self.visible_writes.has_complete_write(&path) {
            // The write shadows the server change entirely.
            return None;
        }
        let child_merge = self.visible_writes.child_compound_write(&path);
        if child_merge.is_empty() {
            return Some(vutil::get_child_at(existing_server_cache, child_path));
        }
        Some(child_merge.apply_to(&vutil::get_child_at(existing_server_cache, child_path)))
    }

    fn calc_complete_child(
        &self,
        tree_path: &Path,
        child_key: &str,
        existing_server_cache: &CacheNode,
    ) -> Option<Value> {
        let path = tree_path.child(child_key);
        if let Some(shadowing) = self.visible_writes.get_complete_value(&path) {
            return Some(shadowing);
        }
        if existing_server_cache.is_complete_for_child(child_key) {
            let child_merge = self.visible_writes.child_compound_write(&path);
            let server_child = vutil::get_child(existing_server_cache.value(), child_key);
            return Some(child_merge.apply_to(&server_child));
        }
        None
    }

    fn calc_next_node_after_post(
        &self,
        tree_path: &Path,
        complete_server_data: Option<&Value>,
        post: &Post,
        reverse: bool,
        comparator: &QueryComparator,
    ) -> Option<(String, Value)> {
        let merge = self.visible_writes.child_compound_write(tree_path);
        let base = complete_server_data.cloned().unwrap_or(Value::Null);
        let to_iterate = merge.apply_to(&base);
        if vutil::is_empty_value(&to_iterate) {
            return None;
        }
        let mut best: Option<(String, Value)> = None;
        for (key, value) in vutil::children_of(&to_iterate) {
            let entry = comparator.entry_post(key, value);
            let beyond = if reverse {
                comparator.cmp_posts(&entry, post) == std::cmp::Ordering::Less
            } else {
                comparator.cmp_posts(&entry, post) == std::cmp::Ordering::Greater
            };
            if !beyond {
                continue;
            }
            let closer = match &best {
                None => true,
                Some((best_key, best_value)) => {
                    let best_entry = comparator.entry_post(best_key, best_value);
                    if reverse {
                        comparator.cmp_posts(&entry, &best_entry) == std::cmp::Ordering::Greater
                    } else {
                        comparator.cmp_posts(&entry, &best_entry) == std::cmp::Ordering::Less
                    }
                }
            };
            if closer {
                best = Some((key.clone(), value.clone()));
            }
        }
        best
    }
}

/// Build an overlay at `tree_root` from the records passing `filter`.
fn layer_tree<F>(records: &[UserWriteRecord], tree_root: &Path, filter: F) -> CompoundWrite
where
    F: Fn(&UserWriteRecord) -> bool,
{
    let mut compound = CompoundWrite::empty();
    for record in records.iter().filter(|r| filter(r)) {
        match &record.payload {
            WritePayload::Overwrite(value) => {
                if tree_root.contains(&record.path) {
                    let relative = tree_root
                        .strip_prefix(&record.path)
                        .unwrap_or_else(Path::root);
                    compound.add_write(&relative, value.clone());
                } else if record.path.contains(tree_root) {
                    let relative = record
                        .path
                        .strip_prefix(tree_root)
                        .unwrap_or_else(Path::root);
                    compound.add_write(&Path::root(), vutil::get_child_at(value, &relative));
                }
            }
            WritePayload::Merge(merge) => {
                if tree_root.contains(&record.path) {
                    let relative = tree_root
                        .strip_prefix(&record.path)
                        .unwrap_or_else(Path::root);
                    compound.add_writes(&relative, merge);
                } else if record.path.contains(tree_root) {
                    let relative = record
                        .path
                        .strip_prefix(tree_root)
                        .unwrap_or_else(Path::root);
                    compound.add_writes(&Path::root(), &merge.child_compound_write(&relative));
                }
            }
        }
    }
    compound
}

/// A [`WriteTree`] scoped to a location: every path argument is relative to
/// the location, as seen by the views living there.
#[derive(Debug, Clone)]
pub struct WriteTreeRef<'a> {
    path: Path,
    tree: &'a WriteTree,
}

impl<'a> WriteTreeRef<'a> {
    /// The location this reference is scoped to.
    #[must_use]
    pub const fn path(&self) -> &Path {
        &self.path
    }

    /// A reference scoped one level deeper.
    #[must_use]
    pub fn child(&self, key: &str) -> WriteTreeRef<'a> {
        WriteTreeRef {
            path: self.path.child(key),
            tree: self.tree,
        }
    }

    /// The local value at the scoped location, if pending writes plus the
    /// server cache fully determine it.
    #[must_use]
    pub fn calc_complete_event_cache(
        &self,
        complete_server_cache: Option<&Value>,
        write_ids_to_exclude: &[WriteId],
        include_hidden_writes: bool,
    ) -> Option<Value> {
        self.tree.calc_complete_event_cache(
            &self.path,
            complete_server_cache,
            write_ids_to_exclude,
            include_hidden_writes,
        )
    }

    /// The children of the scoped location that writes plus the known server
    /// children fully determine.
    #[must_use]
    pub fn calc_complete_event_children(&self, complete_server_children: &Value) -> Value {
        self.tree
            .calc_complete_event_children(&self.path, complete_server_children)
    }

    /// The local value for a subpath after a server overwrite there, or
    /// `None` if a pending write shadows it completely.
    #[must_use]
    pub fn calc_event_cache_after_server_overwrite(
        &self,
        child_path: &Path,
        existing_server_cache: &Value,
    ) -> Option<Value> {
        self.tree
            .calc_event_cache_after_server_overwrite(&self.path, child_path, existing_server_cache)
    }

    /// A complete value for one child, if writes or the server cache provide
    /// one.
    #[must_use]
    pub fn calc_complete_child(
        &self,
        child_key: &str,
        existing_server_cache: &CacheNode,
    ) -> Option<Value> {
        self.tree
            .calc_complete_child(&self.path, child_key, existing_server_cache)
    }

    /// The complete value a visible write pins at a subpath, if any.
    #[must_use]
    pub fn shadowing_write(&self, path: &Path) -> Option<Value> {
        self.tree
            .visible_writes
            .get_complete_value(&self.path.join(path))
    }

    /// The next child beyond `post` in query order, merging pending writes
    /// over the server data.
    #[must_use]
    pub fn calc_next_node_after_post(
        &self,
        complete_server_data: Option<&Value>,
        post: &Post,
        reverse: bool,
        comparator: &QueryComparator,
    ) -> Option<(String, Value)> {
        self.tree.calc_next_node_after_post(
            &self.path,
            complete_server_data,
            post,
            reverse,
            comparator,
        )
    }
}
