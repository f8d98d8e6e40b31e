//! A filter that keeps a bounded window of children.

use std::cmp::Ordering;

use treesync_codec::{Path, Value};

use crate::events::{Change, ChildChangeAccumulator};
use crate::query::{IndexedValue, QueryParams};
use crate::view::filter::{CompleteChildSource, NodeFilter};
use crate::view::ranged_filter::RangedFilter;
use crate::vutil;

/// Keeps at most `limit` children inside the range, anchored at the start of
/// the range for limit-to-first queries and at the end for limit-to-last.
#[derive(Debug)]
pub struct LimitedFilter {
    ranged: RangedFilter,
    limit: usize,
    reverse: bool,
}

impl LimitedFilter {
    /// A limited filter for the given parameters.
    #[must_use]
    pub fn new(params: QueryParams) -> Self {
        let limit = params.limit().unwrap_or(0);
        let reverse = params.anchors_at_end();
        Self {
            ranged: RangedFilter::new(params),
            limit,
            reverse,
        }
    }

    /// Compare two entries in window order: query order for limit-to-first,
    /// reversed for limit-to-last, so the window always begins at the anchor.
    fn cmp_in_direction(
        &self,
        a: (&str, &Value),
        b: (&str, &Value),
    ) -> Ordering {
        let comparator = self.ranged.comparator();
        let ordering = comparator.cmp_entries(a, b);
        if self.reverse {
            ordering.reverse()
        } else {
            ordering
        }
    }

    fn full_limit_update_child(
        &self,
        indexed: &IndexedValue,
        child_key: &str,
        new_child: &Value,
        source: &dyn CompleteChildSource,
        mut accumulator: Option<&mut ChildChangeAccumulator>,
    ) -> IndexedValue {
        let comparator = self.ranged.comparator();
        // The entry at the open edge of the window: the last child for
        // limit-to-first, the first child for limit-to-last.
        let window_boundary = if self.reverse {
            indexed.first_child()
        } else {
            indexed.last_child()
        };
        let in_range = self.ranged.matches(child_key, new_child);

        if let Some(old_child) = indexed.value().child(child_key).cloned() {
            // The child is currently inside the window. Find the candidate
            // that would replace it, skipping entries already in the window.
            let boundary_post = window_boundary
                .map(|(k, v)| comparator.entry_post(k, v))
                .unwrap_or_else(crate::query::Post::min);
            let mut next_child = source.child_after(comparator, &boundary_post, self.reverse);
            while let Some((next_key, next_value)) = &next_child {
                if next_key != child_key && indexed.value().child(next_key).is_none() {
                    break;
                }
                let next_post = comparator.entry_post(next_key, next_value);
                next_child = source.child_after(comparator, &next_post, self.reverse);
            }
            let compare_next = match &next_child {
                None => Ordering::Greater,
                Some((next_key, next_value)) => self.cmp_in_direction(
                    (next_key.as_str(), next_value),
                    (child_key, new_child),
                ),
            };
            let remains_in_window = in_range
                && !vutil::is_empty_value(new_child)
                && compare_next != Ordering::Less;
            if remains_in_window {
                if let Some(acc) = accumulator.as_deref_mut() {
                    acc.track(Change::child_changed(
                        child_key,
                        new_child.clone(),
                        old_child,
                    ));
                }
                indexed.update_child(child_key, new_child.clone())
            } else {
                if let Some(acc) = accumulator.as_deref_mut() {
                    acc.track(Change::child_removed(child_key, old_child));
                }
                let shrunk = indexed.update_child(child_key, Value::Null);
                let next_in_range = next_child
                    .as_ref()
                    .is_some_and(|(k, v)| self.ranged.matches(k, v));
                if next_in_range {
                    if let Some((next_key, next_value)) = next_child {
                        if let Some(acc) = accumulator.as_deref_mut() {
                            acc.track(Change::child_added(next_key.clone(), next_value.clone()));
                        }
                        return shrunk.update_child(&next_key, next_value);
                    }
                }
                shrunk
            }
        } else if vutil::is_empty_value(new_child) {
            // Removing a child that was never in the window.
            indexed.clone()
        } else if in_range {
            // Does the new child displace the window boundary?
            if let Some((boundary_key, boundary_value)) = window_boundary {
                if self.cmp_in_direction(
                    (boundary_key, boundary_value),
                    (child_key, new_child),
                ) != Ordering::Less
                {
                    let boundary_key = boundary_key.to_owned();
                    let boundary_value = boundary_value.clone();
                    if let Some(acc) = accumulator.as_deref_mut() {
                        acc.track(Change::child_removed(
                            boundary_key.clone(),
                            boundary_value,
                        ));
                        acc.track(Change::child_added(child_key, new_child.clone()));
                    }
                    return indexed
                        .update_child(child_key, new_child.clone())
                        .update_child(&boundary_key, Value::Null);
                }
            }
            indexed.clone()
        } else {
            indexed.clone()
        }
    }
}

impl NodeFilter for LimitedFilter {
    fn update_child(
        &self,
        indexed: &IndexedValue,
        child_key: &str,
        new_child: &Value,
        affected_path: &Path,
        source: &dyn CompleteChildSource,
        accumulator: Option<&mut ChildChangeAccumulator>,
    ) -> IndexedValue {
        let effective = if self.ranged.matches(child_key, new_child) {
            new_child.clone()
        } else {
            Value::Null
        };
        if indexed.value().child(child_key).unwrap_or(&Value::Null) == &effective {
            return indexed.clone();
        }
        if indexed.child_count() < self.limit {
            self.ranged.indexed_filter().update_child(
                indexed,
                child_key,
                &effective,
                affected_path,
                source,
                accumulator,
            )
        } else {
            self.full_limit_update_child(indexed, child_key, &effective, source, accumulator)
        }
    }

    fn update_full_value(
        &self,
        old: &IndexedValue,
        new: &IndexedValue,
        accumulator: Option<&mut ChildChangeAccumulator>,
    ) -> IndexedValue {
        let filtered = if vutil::is_leaf_value(new.value()) || vutil::is_empty_value(new.value()) {
            Value::Null
        } else {
            let mut value = new.value().clone();
            vutil::update_priority(&mut value, Value::Null);
            let mut entries: Vec<(String, Value)> = vutil::children_of(&value)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            entries.sort_by(|a, b| {
                self.cmp_in_direction((a.0.as_str(), &a.1), (b.0.as_str(), &b.1))
            });
            let mut kept = 0usize;
            for (key, child) in entries {
                if kept < self.limit && self.ranged.matches(&key, &child) {
                    kept += 1;
                } else {
                    vutil::update_child(&mut value, &key, Value::Null);
                }
            }
            value
        };
        let filtered_indexed = IndexedValue::new(filtered, self.params().clone());
        self.ranged
            .indexed_filter()
            .update_full_value(old, &filtered_indexed, accumulator)
    }

    fn update_priority(&self, old: &IndexedValue, _priority: &Value) -> IndexedValue {
        old.clone()
    }

    fn filters_values(&self) -> bool {
        true
    }

    fn indexed_filter(&self) -> &dyn NodeFilter {
        self.ranged.indexed_filter()
    }

    fn params(&self) -> &QueryParams {
        self.ranged.params()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use crate::query::{Post, QueryComparator};
    use crate::view::filter::NoCompleteSource;

    struct MapSource(Value);

    impl CompleteChildSource for MapSource {
        fn complete_child(&self, child_key: &str) -> Option<Value> {
            self.0.child(child_key).cloned()
        }

        fn child_after(
            &self,
            comparator: &QueryComparator,
            post: &Post,
            reverse: bool,
        ) -> Option<(String, Value)> {
            let mut best: Option<(String, Value)> = None;
            for (key, value) in vutil::children_of(&self.0) {
                let entry = comparator.entry_post(key, value);
                let beyond = if reverse {
                    comparator.cmp_posts(&entry, post) == Ordering::Less
                } else {
                    comparator.cmp_posts(&entry, post) == Ordering::Greater
                };
                if !beyond {
                    continue;
                }
                let closer = match &best {
                    None => true,
                    Some((bk, bv)) => {
                        let b = comparator.entry_post(bk, bv);
                        if reverse {
                            comparator.cmp_posts(&entry, &b) == Ordering::Greater
                        } else {
                            comparator.cmp_posts(&entry, &b) == Ordering::Less
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

    fn limit_first(n: usize) -> (LimitedFilter, QueryParams) {
        let params = QueryParams::default().order_by_value().limit_to_first(n);
        (LimitedFilter::new(params.clone()), params)
    }

    #[test]
    fn full_value_keeps_window() {
        let (filter, params) = limit_first(2);
        let old = IndexedValue::new(Value::Null, params.clone());
        let new = IndexedValue::new(
            Value::map_from([
                ("a", Value::Int(3)),
                ("b", Value::Int(1)),
                ("c", Value::Int(2)),
            ]),
            params,
        );
        let result = filter.update_full_value(&old, &new, None);
        assert_eq!(
            result.value(),
            &Value::map_from([("b", Value::Int(1)), ("c", Value::Int(2))])
        );
    }

    #[test]
    fn limit_last_keeps_tail() {
        let params = QueryParams::default().order_by_value().limit_to_last(2);
        let filter = LimitedFilter::new(params.clone());
        let old = IndexedValue::new(Value::Null, params.clone());
        let new = IndexedValue::new(
            Value::map_from([
                ("a", Value::Int(3)),
                ("b", Value::Int(1)),
                ("c", Value::Int(2)),
            ]),
            params,
        );
        let result = filter.update_full_value(&old, &new, None);
        assert_eq!(
            result.value(),
            &Value::map_from([("a", Value::Int(3)), ("c", Value::Int(2))])
        );
    }

    #[test]
    fn underfull_window_accepts_new_children() {
        let (filter, params) = limit_first(3);
        let snap = IndexedValue::new(Value::map_from([("a", Value::Int(1))]), params);
        let result = filter.update_child(
            &snap,
            "b",
            &Value::Int(2),
            &Path::root(),
            &NoCompleteSource,
            None,
        );
        assert_eq!(result.child_count(), 2);
    }

    #[test]
    fn new_child_displaces_boundary() {
        let (filter, params) = limit_first(2);
        let snap = IndexedValue::new(
            Value::map_from([("a", Value::Int(1)), ("b", Value::Int(5))]),
            params,
        );
        let mut acc = ChildChangeAccumulator::new();
        let result = filter.update_child(
            &snap,
            "c",
            &Value::Int(2),
            &Path::root(),
            &NoCompleteSource,
            Some(&mut acc),
        );
        assert_eq!(
            result.value(),
            &Value::map_from([("a", Value::Int(1)), ("c", Value::Int(2))])
        );
        // The accumulator reports removals ahead of additions.
        let kinds: Vec<EventType> = acc.into_changes().into_iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![EventType::ChildRemoved, EventType::ChildAdded]);
    }

    #[test]
    fn out_of_window_child_is_ignored() {
        let (filter, params) = limit_first(2);
        let snap = IndexedValue::new(
            Value::map_from([("a", Value::Int(1)), ("b", Value::Int(2))]),
            params,
        );
        let result = filter.update_child(
            &snap,
            "z",
            &Value::Int(9),
            &Path::root(),
            &NoCompleteSource,
            None,
        );
        assert_eq!(result.value(), snap.value());
    }

    #[test]
    fn removed_child_refills_from_source() {
        let (filter, params) = limit_first(2);
        let snap = IndexedValue::new(
            Value::map_from([("a", Value::Int(1)), ("b", Value::Int(2))]),
            params,
        );
        let source = MapSource(Value::map_from([
            ("a", Value::Int(1)),
            ("b", Value::Int(2)),
            ("c", Value::Int(3)),
        ]));
        let mut acc = ChildChangeAccumulator::new();
        let result = filter.update_child(
            &snap,
            "a",
            &Value::Null,
            &Path::root(),
            &source,
            Some(&mut acc),
        );
        assert_eq!(
            result.value(),
            &Value::map_from([("b", Value::Int(2)), ("c", Value::Int(3))])
        );
        let kinds: Vec<(String, EventType)> = acc
            .into_changes()
            .into_iter()
            .map(|c| (c.child_key, c.kind))
            .collect();
        assert!(kinds.contains(&("a".into(), EventType::ChildRemoved)));
        assert!(kinds.contains(&("c".into(), EventType::ChildAdded)));
    }
}
