//! The ordering used to index children under a query.
//!
//! Children are ordered by an extracted index value (priority, key, value, or
//! a named child attribute) with the key as tie-break. Range bounds are
//! expressed as *posts*: virtual entries that may sit before every real entry
//! or after every real entry, so bound checks are plain comparisons.

use std::cmp::Ordering;

use treesync_codec::{Path, Value};

use crate::query::{Bound, OrderBy, QueryParams};
use crate::vutil;

/// The key slot of a post: a sentinel or a real child key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostKey {
    /// Sorts before every real key.
    MinKey,
    /// A real child key.
    Named(String),
    /// Sorts after every real key.
    MaxKey,
}

/// The index slot of a post: a sentinel or an extracted ordering value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostIndex {
    /// Sorts before every defined index value.
    Min,
    /// An extracted ordering value.
    Defined(Value),
    /// Sorts after every defined index value.
    Max,
}

/// A virtual entry in query order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    /// The key slot.
    pub key: PostKey,
    /// The index slot.
    pub index: PostIndex,
}

impl Post {
    /// The post before every entry.
    #[must_use]
    pub const fn min() -> Self {
        Self {
            key: PostKey::MinKey,
            index: PostIndex::Min,
        }
    }

    /// The post after every entry.
    #[must_use]
    pub const fn max() -> Self {
        Self {
            key: PostKey::MaxKey,
            index: PostIndex::Max,
        }
    }

    /// A post for a real entry.
    #[must_use]
    pub fn named(key: impl Into<String>, index: Value) -> Self {
        Self {
            key: PostKey::Named(key.into()),
            index: PostIndex::Defined(index),
        }
    }
}

/// Comparator implementing a query's child ordering.
#[derive(Debug, Clone)]
pub struct QueryComparator {
    order_by: OrderBy,
}

impl QueryComparator {
    /// A comparator for the given ordering.
    #[must_use]
    pub const fn new(order_by: OrderBy) -> Self {
        Self { order_by }
    }

    /// The index value this ordering extracts from a child.
    #[must_use]
    pub fn extracted_index(&self, value: &Value) -> Value {
        match &self.order_by {
            OrderBy::Priority => vutil::get_priority(value),
            OrderBy::Key => Value::Null,
            OrderBy::Value => vutil::base_value(value).clone(),
            OrderBy::Child(child_path) => {
                vutil::get_child_at(value, &Path::parse(child_path))
            }
        }
    }

    /// The post for a real child entry.
    #[must_use]
    pub fn entry_post(&self, key: &str, value: &Value) -> Post {
        Post::named(key, self.extracted_index(value))
    }

    /// Compare two posts in query order.
    #[must_use]
    pub fn cmp_posts(&self, a: &Post, b: &Post) -> Ordering {
        cmp_index(&a.index, &b.index).then_with(|| cmp_keys_slot(&a.key, &b.key))
    }

    /// Compare two real entries in query order.
    #[must_use]
    pub fn cmp_entries(&self, a: (&str, &Value), b: (&str, &Value)) -> Ordering {
        self.cmp_posts(&self.entry_post(a.0, a.1), &self.entry_post(b.0, b.1))
    }

    /// Whether the ordering position of a child may have changed between two
    /// versions of its value.
    #[must_use]
    pub fn index_changed(&self, old_value: &Value, new_value: &Value) -> bool {
        compare_order_values(&self.extracted_index(old_value), &self.extracted_index(new_value))
            != Ordering::Equal
    }

    /// The inclusive lower bound of a query's range as a post.
    #[must_use]
    pub fn start_post(&self, params: &QueryParams) -> Post {
        match params.start_bound() {
            Some(bound) => self.bound_post(bound, BoundEnd::Start),
            None => Post::min(),
        }
    }

    /// The inclusive upper bound of a query's range as a post.
    #[must_use]
    pub fn end_post(&self, params: &QueryParams) -> Post {
        match params.end_bound() {
            Some(bound) => self.bound_post(bound, BoundEnd::End),
            None => Post::max(),
        }
    }

    fn bound_post(&self, bound: &Bound, end: BoundEnd) -> Post {
        if self.order_by == OrderBy::Key {
            // Key-ordered bounds carry the key as the bound value.
            let key = match bound.value.as_str() {
                Some(k) => PostKey::Named(k.to_owned()),
                None => end.open_key(),
            };
            return Post {
                key,
                index: PostIndex::Defined(Value::Null),
            };
        }
        let key = match &bound.key {
            Some(k) => PostKey::Named(k.clone()),
            None => end.open_key(),
        };
        Post {
            key,
            index: PostIndex::Defined(bound.value.clone()),
        }
    }
}

#[derive(Clone, Copy)]
enum BoundEnd {
    Start,
    End,
}

impl BoundEnd {
    const fn open_key(self) -> PostKey {
        match self {
            Self::Start => PostKey::MinKey,
            Self::End => PostKey::MaxKey,
        }
    }
}

fn cmp_index(a: &PostIndex, b: &PostIndex) -> Ordering {
    match (a, b) {
        (PostIndex::Min, PostIndex::Min) | (PostIndex::Max, PostIndex::Max) => Ordering::Equal,
        (PostIndex::Min, _) | (_, PostIndex::Max) => Ordering::Less,
        (PostIndex::Max, _) | (_, PostIndex::Min) => Ordering::Greater,
        (PostIndex::Defined(x), PostIndex::Defined(y)) => compare_order_values(x, y),
    }
}

fn cmp_keys_slot(a: &PostKey, b: &PostKey) -> Ordering {
    match (a, b) {
        (PostKey::MinKey, PostKey::MinKey) | (PostKey::MaxKey, PostKey::MaxKey) => Ordering::Equal,
        (PostKey::MinKey, _) | (_, PostKey::MaxKey) => Ordering::Less,
        (PostKey::MaxKey, _) | (_, PostKey::MinKey) => Ordering::Greater,
        (PostKey::Named(x), PostKey::Named(y)) => compare_keys(x, y),
    }
}

/// Compare ordering values: null, then booleans, then numbers, then strings,
/// then maps. Numbers compare numerically across representations; maps all
/// compare equal (their keys break the tie).
#[must_use]
pub fn compare_order_values(a: &Value, b: &Value) -> Ordering {
    let rank = order_rank(a).cmp(&order_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Str(x), Value::Str(y)) => x.cmp(y),
        _ if a.is_number() && b.is_number() => {
            match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            }
        }
        _ => Ordering::Equal,
    }
}

const fn order_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Int(_) | Value::Float(_) => 2,
        Value::Str(_) => 3,
        Value::Map(_) => 4,
    }
}

/// Compare child keys: keys that parse as integers sort first, numerically;
/// the rest sort lexicographically.
#[must_use]
pub fn compare_keys(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use treesync_codec::PRIORITY_KEY;

    fn with_priority(value: Value, priority: Value) -> Value {
        let mut v = value;
        vutil::update_priority(&mut v, priority);
        v
    }

    #[test]
    fn keys_sort_numerically_then_lexically() {
        assert_eq!(compare_keys("2", "10"), Ordering::Less);
        assert_eq!(compare_keys("10", "abc"), Ordering::Less);
        assert_eq!(compare_keys("abc", "abd"), Ordering::Less);
        assert_eq!(compare_keys("5", "5"), Ordering::Equal);
    }

    #[test]
    fn order_values_rank_types() {
        assert_eq!(
            compare_order_values(&Value::Null, &Value::Bool(false)),
            Ordering::Less
        );
        assert_eq!(
            compare_order_values(&Value::Bool(true), &Value::Int(0)),
            Ordering::Less
        );
        assert_eq!(
            compare_order_values(&Value::Int(2), &Value::Float(1.5)),
            Ordering::Greater
        );
        assert_eq!(
            compare_order_values(&Value::Str("z".into()), &Value::empty_map()),
            Ordering::Less
        );
        assert_eq!(
            compare_order_values(&Value::Int(1), &Value::Float(1.0)),
            Ordering::Equal
        );
    }

    #[test]
    fn priority_ordering_with_key_tiebreak() {
        let cmp = QueryComparator::new(OrderBy::Priority);
        let low = with_priority(Value::Int(1), Value::Int(1));
        let high = with_priority(Value::Int(2), Value::Int(2));
        let none = Value::Int(3);
        assert_eq!(cmp.cmp_entries(("a", &none), ("b", &low)), Ordering::Less);
        assert_eq!(cmp.cmp_entries(("z", &low), ("a", &high)), Ordering::Less);
        assert_eq!(cmp.cmp_entries(("b", &low), ("a", &low)), Ordering::Greater);
    }

    #[test]
    fn key_ordering_ignores_values() {
        let cmp = QueryComparator::new(OrderBy::Key);
        assert_eq!(
            cmp.cmp_entries(("a", &Value::Int(9)), ("b", &Value::Int(1))),
            Ordering::Less
        );
    }

    #[test]
    fn child_ordering_extracts_nested_attribute() {
        let cmp = QueryComparator::new(OrderBy::Child("info/age".into()));
        let young = Value::map_from([(
            "info",
            Value::map_from([("age", Value::Int(10))]),
        )]);
        let old = Value::map_from([(
            "info",
            Value::map_from([("age", Value::Int(40))]),
        )]);
        assert_eq!(cmp.cmp_entries(("z", &young), ("a", &old)), Ordering::Less);
    }

    #[test]
    fn posts_bracket_all_entries() {
        let cmp = QueryComparator::new(OrderBy::Priority);
        let entry = cmp.entry_post("k", &Value::Int(1));
        assert_eq!(cmp.cmp_posts(&Post::min(), &entry), Ordering::Less);
        assert_eq!(cmp.cmp_posts(&entry, &Post::max()), Ordering::Less);
    }

    #[test]
    fn start_post_uses_bound_value_and_key() {
        let cmp = QueryComparator::new(OrderBy::Value);
        let params = QueryParams::default()
            .order_by_value()
            .start_at_with_key(Value::Int(5), "m");
        let start = cmp.start_post(&params);
        // Entries with the same index value but earlier keys fall outside.
        let before = cmp.entry_post("a", &Value::Int(5));
        let after = cmp.entry_post("z", &Value::Int(5));
        assert_eq!(cmp.cmp_posts(&start, &before), Ordering::Greater);
        assert_eq!(cmp.cmp_posts(&start, &after), Ordering::Less);
    }

    #[test]
    fn key_order_bound_comes_from_bound_value() {
        let cmp = QueryComparator::new(OrderBy::Key);
        let params = QueryParams::default()
            .order_by_key()
            .start_at(Value::Str("m".into()));
        let start = cmp.start_post(&params);
        assert_eq!(
            cmp.cmp_posts(&start, &cmp.entry_post("a", &Value::Null)),
            Ordering::Greater
        );
        assert_eq!(
            cmp.cmp_posts(&start, &cmp.entry_post("x", &Value::Null)),
            Ordering::Less
        );
    }

    #[test]
    fn priority_index_is_extracted() {
        let cmp = QueryComparator::new(OrderBy::Priority);
        let v = Value::map_from([("x", Value::Int(1)), (PRIORITY_KEY, Value::Int(7))]);
        assert_eq!(cmp.extracted_index(&v), Value::Int(7));
    }
}
