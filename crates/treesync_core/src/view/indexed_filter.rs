//! The innermost filter: keeps everything, tracks changes.

use treesync_codec::{Path, Value};

use crate::events::{Change, ChildChangeAccumulator};
use crate::query::{IndexedValue, QueryParams};
use crate::view::filter::{CompleteChildSource, NodeFilter};
use crate::vutil;

/// A filter that applies no query shape: it maintains the index and reports
/// child changes, nothing more.
#[derive(Debug)]
pub struct IndexedFilter {
    params: QueryParams,
}

impl IndexedFilter {
    /// An indexed filter for the given parameters' ordering.
    #[must_use]
    pub const fn new(params: QueryParams) -> Self {
        Self { params }
    }
}

impl NodeFilter for IndexedFilter {
    fn update_child(
        &self,
        indexed: &IndexedValue,
        child_key: &str,
        new_child: &Value,
        _affected_path: &Path,
        _source: &dyn CompleteChildSource,
        accumulator: Option<&mut ChildChangeAccumulator>,
    ) -> IndexedValue {
        let old_child = vutil::get_child(indexed.value(), child_key);
        if &old_child == new_child {
            return indexed.clone();
        }
        if let Some(acc) = accumulator {
            if vutil::is_empty_value(new_child) {
                if !vutil::is_empty_value(&old_child) {
                    acc.track(Change::child_removed(child_key, old_child));
                }
            } else if vutil::is_empty_value(&old_child) {
                acc.track(Change::child_added(child_key, new_child.clone()));
            } else {
                acc.track(Change::child_changed(
                    child_key,
                    new_child.clone(),
                    old_child,
                ));
            }
        }
        indexed.update_child(child_key, new_child.clone())
    }

    fn update_full_value(
        &self,
        old: &IndexedValue,
        new: &IndexedValue,
        accumulator: Option<&mut ChildChangeAccumulator>,
    ) -> IndexedValue {
        if let Some(acc) = accumulator {
            for (key, old_child) in vutil::children_of(old.value()) {
                if new.value().child(key).is_none() {
                    acc.track(Change::child_removed(key, old_child.clone()));
                }
            }
            for (key, new_child) in vutil::children_of(new.value()) {
                match old.value().child(key) {
                    Some(old_child) if old_child != new_child => {
                        acc.track(Change::child_changed(
                            key,
                            new_child.clone(),
                            old_child.clone(),
                        ));
                    }
                    Some(_) => {}
                    None => acc.track(Change::child_added(key, new_child.clone())),
                }
            }
        }
        new.clone()
    }

    fn update_priority(&self, old: &IndexedValue, priority: &Value) -> IndexedValue {
        old.update_priority(priority.clone())
    }

    fn filters_values(&self) -> bool {
        false
    }

    fn indexed_filter(&self) -> &dyn NodeFilter {
        self
    }

    fn params(&self) -> &QueryParams {
        &self.params
    }
}
