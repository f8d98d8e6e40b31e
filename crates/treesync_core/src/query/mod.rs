//! Query descriptions: ordering, range bounds, and limits.

mod comparator;
mod indexed;

pub use comparator::{Post, PostIndex, PostKey, QueryComparator};
pub use indexed::IndexedValue;

use serde::{Deserialize, Serialize};
use treesync_codec::{Path, Value};

/// The child attribute a query orders by.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum OrderBy {
    /// Order by each child's priority, then key. The default.
    #[default]
    Priority,
    /// Order by key alone.
    Key,
    /// Order by each child's own value.
    Value,
    /// Order by the value at a path inside each child.
    Child(String),
}

/// One end of a query range: an ordering value, optionally pinned to a key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Bound {
    /// The ordering value at the bound.
    pub value: Value,
    /// The key at the bound, for disambiguating equal ordering values.
    pub key: Option<String>,
}

/// The parameters of a query: ordering, range, and limit.
///
/// Default parameters load all data at a location in priority order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct QueryParams {
    order_by: OrderBy,
    start_at: Option<Bound>,
    end_at: Option<Bound>,
    equal_to: Option<Bound>,
    limit_first: Option<usize>,
    limit_last: Option<usize>,
}

impl QueryParams {
    /// Order results by priority (the default).
    #[must_use]
    pub fn order_by_priority(mut self) -> Self {
        self.order_by = OrderBy::Priority;
        self
    }

    /// Order results by key.
    #[must_use]
    pub fn order_by_key(mut self) -> Self {
        self.order_by = OrderBy::Key;
        self
    }

    /// Order results by each child's value.
    #[must_use]
    pub fn order_by_value(mut self) -> Self {
        self.order_by = OrderBy::Value;
        self
    }

    /// Order results by the value at `path` inside each child.
    #[must_use]
    pub fn order_by_child(mut self, path: impl Into<String>) -> Self {
        self.order_by = OrderBy::Child(path.into());
        self
    }

    /// Include only children at or after this ordering value.
    #[must_use]
    pub fn start_at(mut self, value: Value) -> Self {
        self.start_at = Some(Bound { value, key: None });
        self
    }

    /// Include only children at or after this ordering value and key.
    #[must_use]
    pub fn start_at_with_key(mut self, value: Value, key: impl Into<String>) -> Self {
        self.start_at = Some(Bound {
            value,
            key: Some(key.into()),
        });
        self
    }

    /// Include only children at or before this ordering value.
    #[must_use]
    pub fn end_at(mut self, value: Value) -> Self {
        self.end_at = Some(Bound { value, key: None });
        self
    }

    /// Include only children at or before this ordering value and key.
    #[must_use]
    pub fn end_at_with_key(mut self, value: Value, key: impl Into<String>) -> Self {
        self.end_at = Some(Bound {
            value,
            key: Some(key.into()),
        });
        self
    }

    /// Include only children whose ordering value equals this value.
    #[must_use]
    pub fn equal_to(mut self, value: Value) -> Self {
        self.equal_to = Some(Bound { value, key: None });
        self
    }

    /// Include only the child with this ordering value and key.
    #[must_use]
    pub fn equal_to_with_key(mut self, value: Value, key: impl Into<String>) -> Self {
        self.equal_to = Some(Bound {
            value,
            key: Some(key.into()),
        });
        self
    }

    /// Keep only the first `n` children in query order.
    #[must_use]
    pub fn limit_to_first(mut self, n: usize) -> Self {
        self.limit_first = Some(n);
        self.limit_last = None;
        self
    }

    /// Keep only the last `n` children in query order.
    #[must_use]
    pub fn limit_to_last(mut self, n: usize) -> Self {
        self.limit_last = Some(n);
        self.limit_first = None;
        self
    }

    /// The configured ordering.
    #[must_use]
    pub const fn order_by(&self) -> &OrderBy {
        &self.order_by
    }

    /// The start bound, with an `equal_to` bound standing in for both ends.
    #[must_use]
    pub const fn start_bound(&self) -> Option<&Bound> {
        match (&self.equal_to, &self.start_at) {
            (Some(eq), _) => Some(eq),
            (None, start) => start.as_ref(),
        }
    }

    /// The end bound, with an `equal_to` bound standing in for both ends.
    #[must_use]
    pub const fn end_bound(&self) -> Option<&Bound> {
        match (&self.equal_to, &self.end_at) {
            (Some(eq), _) => Some(eq),
            (None, end) => end.as_ref(),
        }
    }

    /// Whether a start bound is in effect.
    #[must_use]
    pub const fn has_start(&self) -> bool {
        self.start_at.is_some() || self.equal_to.is_some()
    }

    /// Whether an end bound is in effect.
    #[must_use]
    pub const fn has_end(&self) -> bool {
        self.end_at.is_some() || self.equal_to.is_some()
    }

    /// The limit, if one is set.
    #[must_use]
    pub const fn limit(&self) -> Option<usize> {
        match (self.limit_first, self.limit_last) {
            (Some(n), _) | (None, Some(n)) => Some(n),
            (None, None) => None,
        }
    }

    /// Whether the limit anchors at the end of the range.
    #[must_use]
    pub const fn anchors_at_end(&self) -> bool {
        self.limit_last.is_some()
    }

    /// Whether these parameters keep every child of the location.
    #[must_use]
    pub const fn loads_all_data(&self) -> bool {
        !self.has_start() && !self.has_end() && self.limit().is_none()
    }

    /// Whether these are the default parameters.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.loads_all_data() && self.order_by == OrderBy::Priority
    }

    /// The comparator implementing this query's ordering.
    #[must_use]
    pub fn comparator(&self) -> QueryComparator {
        QueryComparator::new(self.order_by.clone())
    }
}

/// A query: a location plus parameters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct QuerySpec {
    /// The location the query observes.
    pub path: Path,
    /// The query parameters.
    pub params: QueryParams,
}

impl QuerySpec {
    /// The default query at a location: all data, priority order.
    #[must_use]
    pub fn default_at(path: Path) -> Self {
        Self {
            path,
            params: QueryParams::default(),
        }
    }

    /// A query at a location with explicit parameters.
    #[must_use]
    pub const fn new(path: Path, params: QueryParams) -> Self {
        Self { path, params }
    }

    /// Whether this is the default query at its location.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.params.is_default()
    }

    /// Whether this query keeps every child at its location.
    #[must_use]
    pub const fn loads_all_data(&self) -> bool {
        self.params.loads_all_data()
    }

    /// The default query at the same location.
    #[must_use]
    pub fn with_default_params(&self) -> Self {
        Self::default_at(self.path.clone())
    }
}

impl std::fmt::Display for QuerySpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path)?;
        if !self.params.is_default() {
            write!(f, " (filtered)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_load_all_data() {
        let params = QueryParams::default();
        assert!(params.loads_all_data());
        assert!(params.is_default());
        assert!(params.limit().is_none());
    }

    #[test]
    fn bounds_make_params_non_default() {
        let params = QueryParams::default().start_at(Value::Int(3));
        assert!(params.has_start());
        assert!(!params.has_end());
        assert!(!params.loads_all_data());
    }

    #[test]
    fn equal_to_bounds_both_ends() {
        let params = QueryParams::default().equal_to(Value::Str("x".into()));
        assert!(params.has_start());
        assert!(params.has_end());
        assert_eq!(params.start_bound(), params.end_bound());
    }

    #[test]
    fn limits_are_exclusive() {
        let params = QueryParams::default().limit_to_first(3).limit_to_last(2);
        assert_eq!(params.limit(), Some(2));
        assert!(params.anchors_at_end());
    }

    #[test]
    fn ordering_changes_defaultness() {
        let params = QueryParams::default().order_by_key();
        assert!(params.loads_all_data());
        assert!(!params.is_default());
    }
}
