//! A value paired with its children sorted in query order.

use treesync_codec::Value;

use crate::query::{QueryComparator, QueryParams};
use crate::vutil;

/// A snapshot of a location with its children indexed by a query's ordering.
///
/// The index is the list of real (non-reserved) children sorted by the
/// query's comparator; leaves and empty values have an empty index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedValue {
    value: Value,
    params: QueryParams,
    index: Vec<String>,
}

impl IndexedValue {
    /// Index a value under the given query parameters.
    #[must_use]
    pub fn new(value: Value, params: QueryParams) -> Self {
        let comparator = params.comparator();
        let mut entries: Vec<(&String, &Value)> = vutil::children_of(&value).collect();
        entries.sort_by(|a, b| comparator.cmp_entries((a.0, a.1), (b.0, b.1)));
        let index = entries.into_iter().map(|(k, _)| k.clone()).collect();
        Self {
            value,
            params,
            index,
        }
    }

    /// Index a value under default parameters (priority order).
    #[must_use]
    pub fn default_index(value: Value) -> Self {
        Self::new(value, QueryParams::default())
    }

    /// The underlying value.
    #[must_use]
    pub const fn value(&self) -> &Value {
        &self.value
    }

    /// The query parameters this value is indexed under.
    #[must_use]
    pub const fn params(&self) -> &QueryParams {
        &self.params
    }

    /// The comparator for this index.
    #[must_use]
    pub fn comparator(&self) -> QueryComparator {
        self.params.comparator()
    }

    /// Child keys in query order.
    #[must_use]
    pub fn index(&self) -> &[String] {
        &self.index
    }

    /// Children in query order.
    pub fn children(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.index
            .iter()
            .filter_map(|k| self.value.child(k).map(|v| (k.as_str(), v)))
    }

    /// Number of indexed children.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.index.len()
    }

    /// The first child in query order.
    #[must_use]
    pub fn first_child(&self) -> Option<(&str, &Value)> {
        self.children().next()
    }

    /// The last child in query order.
    #[must_use]
    pub fn last_child(&self) -> Option<(&str, &Value)> {
        self.children().last()
    }

    /// The key ordered immediately before `key`, if any.
    #[must_use]
    pub fn predecessor_child_name(&self, key: &str) -> Option<&str> {
        let pos = self.index.iter().position(|k| k == key)?;
        pos.checked_sub(1).map(|p| self.index[p].as_str())
    }

    /// A new snapshot with one child replaced (or removed, for empty values).
    #[must_use]
    pub fn update_child(&self, key: &str, new_child: Value) -> Self {
        let mut value = self.value.clone();
        vutil::update_child(&mut value, key, new_child);
        Self::new(value, self.params.clone())
    }

    /// A new snapshot with the node priority replaced.
    #[must_use]
    pub fn update_priority(&self, priority: Value) -> Self {
        let mut value = self.value.clone();
        vutil::update_priority(&mut value, priority);
        Self::new(value, self.params.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use treesync_codec::PRIORITY_KEY;

    fn prioritized(v: i64, p: i64) -> Value {
        Value::map_from([(".value", Value::Int(v)), (PRIORITY_KEY, Value::Int(p))])
    }

    #[test]
    fn index_orders_by_priority_then_key() {
        let value = Value::map_from([
            ("a", prioritized(1, 3)),
            ("b", prioritized(2, 1)),
            ("c", Value::Int(3)),
        ]);
        let indexed = IndexedValue::default_index(value);
        assert_eq!(indexed.index(), ["c", "b", "a"]);
        assert_eq!(indexed.first_child().map(|(k, _)| k), Some("c"));
        assert_eq!(indexed.last_child().map(|(k, _)| k), Some("a"));
    }

    #[test]
    fn predecessor_names() {
        let value = Value::map_from([("a", Value::Int(1)), ("b", Value::Int(2))]);
        let indexed = IndexedValue::default_index(value);
        assert_eq!(indexed.predecessor_child_name("a"), None);
        assert_eq!(indexed.predecessor_child_name("b"), Some("a"));
        assert_eq!(indexed.predecessor_child_name("zz"), None);
    }

    #[test]
    fn update_child_reindexes() {
        let value = Value::map_from([("a", Value::Int(1))]);
        let indexed = IndexedValue::new(value, QueryParams::default().order_by_value());
        let updated = indexed.update_child("b", Value::Int(0));
        assert_eq!(updated.index(), ["b", "a"]);
        let removed = updated.update_child("a", Value::Null);
        assert_eq!(removed.index(), ["b"]);
    }

    #[test]
    fn leaves_have_empty_index() {
        let indexed = IndexedValue::default_index(Value::Int(42));
        assert_eq!(indexed.child_count(), 0);
        assert!(indexed.first_child().is_none());
    }
}
