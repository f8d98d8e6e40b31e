//! The two snapshots a view maintains.

use treesync_codec::{Path, Value};

use crate::query::{IndexedValue, QueryParams};

/// One cached snapshot plus what is known about it: whether the data is
/// complete, and whether a query filter has already been applied to it.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheNode {
    indexed: IndexedValue,
    fully_initialized: bool,
    filtered: bool,
}

impl CacheNode {
    /// A cache node.
    #[must_use]
    pub const fn new(indexed: IndexedValue, fully_initialized: bool, filtered: bool) -> Self {
        Self {
            indexed,
            fully_initialized,
            filtered,
        }
    }

    /// An empty, uninitialized node.
    #[must_use]
    pub fn empty(params: QueryParams) -> Self {
        Self {
            indexed: IndexedValue::new(Value::Null, params),
            fully_initialized: false,
            filtered: false,
        }
    }

    /// The indexed snapshot.
    #[must_use]
    pub const fn indexed(&self) -> &IndexedValue {
        &self.indexed
    }

    /// The raw snapshot value.
    #[must_use]
    pub const fn value(&self) -> &Value {
        self.indexed.value()
    }

    /// Whether the snapshot covers its whole location.
    #[must_use]
    pub const fn is_fully_initialized(&self) -> bool {
        self.fully_initialized
    }

    /// Whether a query filter has been applied to the snapshot.
    #[must_use]
    pub const fn is_filtered(&self) -> bool {
        self.filtered
    }

    /// Whether the snapshot is authoritative for everything at `path`.
    #[must_use]
    pub fn is_complete_for_path(&self, path: &Path) -> bool {
        match path.front() {
            None => self.fully_initialized && !self.filtered,
            Some(key) => self.is_complete_for_child(key),
        }
    }

    /// Whether the snapshot is authoritative for one child.
    #[must_use]
    pub fn is_complete_for_child(&self, key: &str) -> bool {
        (self.fully_initialized && !self.filtered) || self.value().child(key).is_some()
    }

    /// The snapshot value, if it covers the whole location.
    #[must_use]
    pub fn complete_snap(&self) -> Option<&Value> {
        self.fully_initialized.then(|| self.value())
    }
}

/// The pair of snapshots a view maintains: what the local app sees (pending
/// writes layered in) and what the server has confirmed.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewCache {
    local: CacheNode,
    server: CacheNode,
}

impl ViewCache {
    /// A view cache from its two snapshots.
    #[must_use]
    pub const fn new(local: CacheNode, server: CacheNode) -> Self {
        Self { local, server }
    }

    /// An empty cache for a fresh view.
    #[must_use]
    pub fn empty(params: &QueryParams) -> Self {
        Self {
            local: CacheNode::empty(params.clone()),
            server: CacheNode::empty(params.clone()),
        }
    }

    /// The local (event) snapshot.
    #[must_use]
    pub const fn local(&self) -> &CacheNode {
        &self.local
    }

    /// The server snapshot.
    #[must_use]
    pub const fn server(&self) -> &CacheNode {
        &self.server
    }

    /// The local value, if complete.
    #[must_use]
    pub fn complete_local_snap(&self) -> Option<&Value> {
        self.local.complete_snap()
    }

    /// The server value, if complete.
    #[must_use]
    pub fn complete_server_snap(&self) -> Option<&Value> {
        self.server.complete_snap()
    }

    /// A copy with the local snapshot replaced.
    #[must_use]
    pub fn update_local_snap(
        &self,
        indexed: IndexedValue,
        fully_initialized: bool,
        filtered: bool,
    ) -> Self {
        Self {
            local: CacheNode::new(indexed, fully_initialized, filtered),
            server: self.server.clone(),
        }
    }

    /// A copy with the server snapshot replaced.
    #[must_use]
    pub fn update_server_snap(
        &self,
        indexed: IndexedValue,
        fully_initialized: bool,
        filtered: bool,
    ) -> Self {
        Self {
            local: self.local.clone(),
            server: CacheNode::new(indexed, fully_initialized, filtered),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(value: Value, fully: bool, filtered: bool) -> CacheNode {
        CacheNode::new(IndexedValue::default_index(value), fully, filtered)
    }

    #[test]
    fn completeness_for_paths() {
        let full = node(Value::map_from([("a", Value::Int(1))]), true, false);
        assert!(full.is_complete_for_path(&Path::root()));
        assert!(full.is_complete_for_path(&Path::parse("missing")));

        let filtered = node(Value::map_from([("a", Value::Int(1))]), true, true);
        assert!(!filtered.is_complete_for_path(&Path::root()));
        assert!(filtered.is_complete_for_child("a"));
        assert!(!filtered.is_complete_for_child("b"));

        let partial = node(Value::map_from([("a", Value::Int(1))]), false, false);
        assert!(!partial.is_complete_for_path(&Path::root()));
        assert!(partial.is_complete_for_child("a"));
    }

    #[test]
    fn complete_snap_requires_initialization() {
        assert!(node(Value::Int(1), false, false).complete_snap().is_none());
        assert_eq!(
            node(Value::Int(1), true, false).complete_snap(),
            Some(&Value::Int(1))
        );
    }

    #[test]
    fn updates_replace_one_side() {
        let cache = ViewCache::empty(&QueryParams::default());
        let updated = cache.update_server_snap(
            IndexedValue::default_index(Value::Int(1)),
            true,
            false,
        );
        assert_eq!(updated.complete_server_snap(), Some(&Value::Int(1)));
        assert!(updated.complete_local_snap().is_none());
    }
}
