//! A filter that keeps only children inside a query's range.

use treesync_codec::{Path, Value};

use crate::events::ChildChangeAccumulator;
use crate::query::{IndexedValue, Post, QueryComparator, QueryParams};
use crate::view::filter::{CompleteChildSource, NodeFilter};
use crate::view::indexed_filter::IndexedFilter;
use crate::vutil;

/// Keeps children between a query's start and end posts; drops the rest.
#[derive(Debug)]
pub struct RangedFilter {
    indexed: IndexedFilter,
    comparator: QueryComparator,
    start: Post,
    end: Post,
}

impl RangedFilter {
    /// A ranged filter for the given parameters.
    #[must_use]
    pub fn new(params: QueryParams) -> Self {
        let comparator = params.comparator();
        let start = comparator.start_post(&params);
        let end = comparator.end_post(&params);
        Self {
            indexed: IndexedFilter::new(params),
            comparator,
            start,
            end,
        }
    }

    /// Whether a child falls inside the range.
    #[must_use]
    pub fn matches(&self, child_key: &str, value: &Value) -> bool {
        let entry = self.comparator.entry_post(child_key, value);
        self.comparator.cmp_posts(&self.start, &entry) != std::cmp::Ordering::Greater
            && self.comparator.cmp_posts(&entry, &self.end) != std::cmp::Ordering::Greater
    }

    /// The post at the start of the range.
    #[must_use]
    pub const fn start_post(&self) -> &Post {
        &self.start
    }

    /// The post at the end of the range.
    #[must_use]
    pub const fn end_post(&self) -> &Post {
        &self.end
    }

    /// The comparator for this filter's ordering.
    #[must_use]
    pub const fn comparator(&self) -> &QueryComparator {
        &self.comparator
    }
}

impl NodeFilter for RangedFilter {
    fn update_child(
        &self,
        indexed: &IndexedValue,
        child_key: &str,
        new_child: &Value,
        affected_path: &Path,
        source: &dyn CompleteChildSource,
        accumulator: Option<&mut ChildChangeAccumulator>,
    ) -> IndexedValue {
        let effective = if self.matches(child_key, new_child) {
            new_child
        } else {
            &Value::Null
        };
        self.indexed
            .update_child(indexed, child_key, effective, affected_path, source, accumulator)
    }

    fn update_full_value(
        &self,
        old: &IndexedValue,
        new: &IndexedValue,
        accumulator: Option<&mut ChildChangeAccumulator>,
    ) -> IndexedValue {
        // Leaves have no children inside any range.
        let mut filtered = if vutil::is_leaf_value(new.value()) {
            Value::Null
        } else {
            let mut value = new.value().clone();
            vutil::update_priority(&mut value, Value::Null);
            let out_of_range: Vec<String> = vutil::children_of(&value)
                .filter(|(k, v)| !self.matches(k, v))
                .map(|(k, _)| k.clone())
                .collect();
            for key in out_of_range {
                vutil::update_child(&mut value, &key, Value::Null);
            }
            value
        };
        if vutil::is_empty_value(&filtered) {
            filtered = Value::Null;
        }
        let filtered_indexed = IndexedValue::new(filtered, self.params().clone());
        self.indexed
            .update_full_value(old, &filtered_indexed, accumulator)
    }

    fn update_priority(&self, old: &IndexedValue, _priority: &Value) -> IndexedValue {
        // Filtered views carry no priority.
        old.clone()
    }

    fn filters_values(&self) -> bool {
        true
    }

    fn indexed_filter(&self) -> &dyn NodeFilter {
        &self.indexed
    }

    fn params(&self) -> &QueryParams {
        self.indexed.params()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_range_filter(start: i64, end: i64) -> RangedFilter {
        RangedFilter::new(
            QueryParams::default()
                .order_by_value()
                .start_at(Value::Int(start))
                .end_at(Value::Int(end)),
        )
    }

    #[test]
    fn matches_respects_bounds() {
        let filter = value_range_filter(2, 4);
        assert!(!filter.matches("a", &Value::Int(1)));
        assert!(filter.matches("a", &Value::Int(2)));
        assert!(filter.matches("a", &Value::Int(4)));
        assert!(!filter.matches("a", &Value::Int(5)));
    }

    #[test]
    fn update_child_drops_out_of_range() {
        let filter = value_range_filter(2, 4);
        let snap = IndexedValue::new(
            Value::map_from([("a", Value::Int(3))]),
            QueryParams::default().order_by_value(),
        );
        let updated = filter.update_child(
            &snap,
            "b",
            &Value::Int(9),
            &Path::root(),
            &crate::view::filter::NoCompleteSource,
            None,
        );
        assert!(updated.value().child("b").is_none());
        let updated = filter.update_child(
            &snap,
            "b",
            &Value::Int(3),
            &Path::root(),
            &crate::view::filter::NoCompleteSource,
            None,
        );
        assert!(updated.value().child("b").is_some());
    }

    #[test]
    fn full_value_prunes_and_strips_priority() {
        let filter = value_range_filter(2, 4);
        let old = IndexedValue::new(Value::Null, QueryParams::default().order_by_value());
        let mut new_value = Value::map_from([
            ("low", Value::Int(1)),
            ("mid", Value::Int(3)),
            ("high", Value::Int(9)),
        ]);
        vutil::update_priority(&mut new_value, Value::Int(1));
        let new = IndexedValue::new(new_value, QueryParams::default().order_by_value());
        let result = filter.update_full_value(&old, &new, None);
        assert_eq!(
            result.value(),
            &Value::map_from([("mid", Value::Int(3))])
        );
    }

    #[test]
    fn leaf_filters_to_empty() {
        let filter = value_range_filter(0, 9);
        let old = IndexedValue::new(Value::Null, QueryParams::default().order_by_value());
        let new = IndexedValue::new(Value::Int(5), QueryParams::default().order_by_value());
        let result = filter.update_full_value(&old, &new, None);
        assert!(result.value().is_null());
    }
}
