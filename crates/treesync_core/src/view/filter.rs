//! Node filters: how a query shapes the data a view keeps.
//!
//! Filters form a chain: a limited filter wraps a ranged filter, which wraps
//! the plain indexed filter. The inner indexed filter is also used directly
//! when complete (unfiltered) data must be maintained alongside a filtered
//! view.

use std::fmt;

use treesync_codec::{Path, Value};

use crate::events::ChildChangeAccumulator;
use crate::query::{IndexedValue, Post, QueryComparator, QueryParams};
use crate::view::limited_filter::LimitedFilter;
use crate::view::ranged_filter::RangedFilter;

/// A source of children a filter may consult when it needs data outside the
/// snapshot it is updating, such as refilling a limited window.
pub trait CompleteChildSource {
    /// A complete value for one child, if one is known.
    fn complete_child(&self, child_key: &str) -> Option<Value>;

    /// The child just beyond `post` in query order (before it, when
    /// `reverse`), if one is known.
    fn child_after(
        &self,
        comparator: &QueryComparator,
        post: &Post,
        reverse: bool,
    ) -> Option<(String, Value)>;
}

/// A source that knows nothing.
pub struct NoCompleteSource;

impl CompleteChildSource for NoCompleteSource {
    fn complete_child(&self, _child_key: &str) -> Option<Value> {
        None
    }

    fn child_after(
        &self,
        _comparator: &QueryComparator,
        _post: &Post,
        _reverse: bool,
    ) -> Option<(String, Value)> {
        None
    }
}

/// Applies a query's shape to snapshots as they change.
pub trait NodeFilter: fmt::Debug + Send + Sync {
    /// Update one child of a snapshot.
    fn update_child(
        &self,
        indexed: &IndexedValue,
        child_key: &str,
        new_child: &Value,
        affected_path: &Path,
        source: &dyn CompleteChildSource,
        accumulator: Option<&mut ChildChangeAccumulator>,
    ) -> IndexedValue;

    /// Replace a whole snapshot.
    fn update_full_value(
        &self,
        old: &IndexedValue,
        new: &IndexedValue,
        accumulator: Option<&mut ChildChangeAccumulator>,
    ) -> IndexedValue;

    /// Replace a snapshot's priority.
    fn update_priority(&self, old: &IndexedValue, priority: &Value) -> IndexedValue;

    /// Whether this filter can drop data.
    fn filters_values(&self) -> bool;

    /// The innermost (non-filtering) filter of the chain.
    fn indexed_filter(&self) -> &dyn NodeFilter;

    /// The parameters this filter implements.
    fn params(&self) -> &QueryParams;
}

/// The filter implementing a query's parameters.
#[must_use]
pub fn filter_from_params(params: &QueryParams) -> Box<dyn NodeFilter> {
    if params.loads_all_data() {
        Box::new(super::indexed_filter::IndexedFilter::new(params.clone()))
    } else if params.limit().is_none() {
        Box::new(RangedFilter::new(params.clone()))
    } else {
        Box::new(LimitedFilter::new(params.clone()))
    }
}
