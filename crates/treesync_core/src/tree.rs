//! A generic tree keyed by path segments, with optional values at nodes.
//!
//! Used for sparse overlays of pending writes, the forest of sync points,
//! and prune bookkeeping. A node may carry a value, children, both, or
//! neither; emptiness is defined recursively.

use std::collections::BTreeMap;

use treesync_codec::Path;

/// A tree node with an optional value and named children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree<T> {
    value: Option<T>,
    children: BTreeMap<String, Tree<T>>,
}

impl<T> Default for Tree<T> {
    fn default() -> Self {
        Self {
            value: None,
            children: BTreeMap::new(),
        }
    }
}

impl<T> Tree<T> {
    /// An empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A tree with a value at its root and no children.
    #[must_use]
    pub fn leaf(value: T) -> Self {
        Self {
            value: Some(value),
            children: BTreeMap::new(),
        }
    }

    /// The value at this node.
    #[must_use]
    pub const fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Mutable access to the value at this node.
    pub fn value_mut(&mut self) -> Option<&mut T> {
        self.value.as_mut()
    }

    /// Set or clear the value at this node.
    pub fn set_value(&mut self, value: Option<T>) {
        self.value = value;
    }

    /// Mutable access to the value at this node, defaulting it first.
    pub fn value_mut_or_default(&mut self) -> &mut T
    where
        T: Default,
    {
        self.value.get_or_insert_with(T::default)
    }

    /// Take the value at this node, leaving `None`.
    pub fn take_value(&mut self) -> Option<T> {
        self.value.take()
    }

    /// The named children of this node.
    #[must_use]
    pub const fn children(&self) -> &BTreeMap<String, Tree<T>> {
        &self.children
    }

    /// A direct child by key.
    #[must_use]
    pub fn child(&self, key: &str) -> Option<&Tree<T>> {
        self.children.get(key)
    }

    /// Mutable access to a direct child by key.
    pub fn child_mut(&mut self, key: &str) -> Option<&mut Tree<T>> {
        self.children.get_mut(key)
    }

    /// The subtree at `path`, if every node along the way exists.
    #[must_use]
    pub fn subtree(&self, path: &Path) -> Option<&Tree<T>> {
        let mut node = self;
        for segment in path.iter() {
            node = node.children.get(segment)?;
        }
        Some(node)
    }

    /// The subtree at `path`, creating empty nodes along the way.
    pub fn subtree_mut(&mut self, path: &Path) -> &mut Tree<T> {
        let mut node = self;
        for segment in path.iter() {
            node = node
                .children
                .entry(segment.to_owned())
                .or_insert_with(Tree::new);
        }
        node
    }

    /// The value stored exactly at `path`.
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&T> {
        self.subtree(path).and_then(Tree::value)
    }

    /// Store a value exactly at `path`.
    pub fn insert(&mut self, path: &Path, value: T) {
        self.subtree_mut(path).value = Some(value);
    }

    /// Remove the value exactly at `path`, pruning empty branches.
    pub fn remove(&mut self, path: &Path) -> Option<T> {
        let removed = self.subtree_exact_mut(path)?.value.take();
        if removed.is_some() {
            self.prune_empty(path);
        }
        removed
    }

    /// Replace the whole subtree at `path`.
    pub fn set_subtree(&mut self, path: &Path, subtree: Tree<T>) {
        match path.parent() {
            None => *self = subtree,
            Some(parent) => {
                let key = path.back().unwrap_or_default().to_owned();
                if subtree.is_empty() {
                    if let Some(node) = self.subtree_exact_mut(&parent) {
                        node.children.remove(&key);
                    }
                    self.prune_empty(&parent);
                } else {
                    self.subtree_mut(&parent).children.insert(key, subtree);
                }
            }
        }
    }

    /// Whether the tree holds no value anywhere.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.children.values().all(Tree::is_empty)
    }

    /// The shallowest value on the way from the root to `path`, with the
    /// path it was found at.
    #[must_use]
    pub fn find_root_most_value(&self, path: &Path) -> Option<(Path, &T)> {
        self.find_root_most_matching(path, |_| true)
    }

    /// The shallowest value matching `pred` on the way from the root to
    /// `path`, with the path it was found at.
    pub fn find_root_most_matching<F>(&self, path: &Path, pred: F) -> Option<(Path, &T)>
    where
        F: Fn(&T) -> bool,
    {
        let mut node = self;
        let mut walked: Vec<String> = Vec::new();
        loop {
            if let Some(value) = node.value.as_ref() {
                if pred(value) {
                    return Some((Path::from_segments(walked), value));
                }
            }
            let depth = walked.len();
            let segment = path.segments().get(depth)?;
            node = node.children.get(segment)?;
            walked.push(segment.clone());
        }
    }

    /// The deepest value on the way from the root to `path`.
    #[must_use]
    pub fn leaf_most_value(&self, path: &Path) -> Option<&T> {
        let mut node = self;
        let mut found = node.value.as_ref();
        for segment in path.iter() {
            match node.children.get(segment) {
                Some(child) => {
                    node = child;
                    found = node.value.as_ref().or(found);
                }
                None => break,
            }
        }
        found
    }

    /// Whether any value in the tree matches `pred`.
    pub fn any_value<F>(&self, pred: &F) -> bool
    where
        F: Fn(&T) -> bool,
    {
        self.value.as_ref().is_some_and(|v| pred(v))
            || self.children.values().any(|c| c.any_value(pred))
    }

    /// Visit every value in the tree with its path relative to this node.
    pub fn for_each_value<F>(&self, f: &mut F)
    where
        F: FnMut(&Path, &T),
    {
        self.for_each_inner(&mut Vec::new(), f);
    }

    /// Visit every value mutably with its path relative to this node.
    pub fn for_each_value_mut<F>(&mut self, f: &mut F)
    where
        F: FnMut(&Path, &mut T),
    {
        self.for_each_inner_mut(&mut Vec::new(), f);
    }

    fn for_each_inner<F>(&self, prefix: &mut Vec<String>, f: &mut F)
    where
        F: FnMut(&Path, &T),
    {
        if let Some(value) = self.value.as_ref() {
            f(&Path::from_segments(prefix.clone()), value);
        }
        for (key, child) in &self.children {
            prefix.push(key.clone());
            child.for_each_inner(prefix, f);
            prefix.pop();
        }
    }

    fn for_each_inner_mut<F>(&mut self, prefix: &mut Vec<String>, f: &mut F)
    where
        F: FnMut(&Path, &mut T),
    {
        if let Some(value) = self.value.as_mut() {
            f(&Path::from_segments(prefix.clone()), value);
        }
        for (key, child) in &mut self.children {
            prefix.push(key.clone());
            child.for_each_inner_mut(prefix, f);
            prefix.pop();
        }
    }

    fn subtree_exact_mut(&mut self, path: &Path) -> Option<&mut Tree<T>> {
        let mut node = self;
        for segment in path.iter() {
            node = node.children.get_mut(segment)?;
        }
        Some(node)
    }

    fn prune_empty(&mut self, path: &Path) {
        for depth in (0..=path.len()).rev() {
            let prefix = Path::from_segments(path.segments()[..depth].to_vec());
            let empty = self
                .subtree(&prefix)
                .is_some_and(|n| n.value.is_none() && n.children.values().all(Tree::is_empty));
            if empty && depth > 0 {
                let parent = Path::from_segments(path.segments()[..depth - 1].to_vec());
                if let Some(node) = self.subtree_exact_mut(&parent) {
                    node.children.remove(&path.segments()[depth - 1]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Path {
        Path::parse(s)
    }

    #[test]
    fn insert_and_get() {
        let mut tree = Tree::new();
        tree.insert(&p("a/b"), 1);
        assert_eq!(tree.get(&p("a/b")), Some(&1));
        assert_eq!(tree.get(&p("a")), None);
        assert_eq!(tree.get(&p("a/b/c")), None);
    }

    #[test]
    fn remove_prunes_empty_branches() {
        let mut tree = Tree::new();
        tree.insert(&p("a/b/c"), 1);
        assert_eq!(tree.remove(&p("a/b/c")), Some(1));
        assert!(tree.is_empty());
        assert!(tree.children().is_empty());
    }

    #[test]
    fn root_most_value_finds_shallowest() {
        let mut tree = Tree::new();
        tree.insert(&p("a"), 1);
        tree.insert(&p("a/b/c"), 2);
        let (found_path, value) = tree.find_root_most_value(&p("a/b/c/d")).unwrap();
        assert_eq!(found_path, p("a"));
        assert_eq!(*value, 1);
    }

    #[test]
    fn root_most_matching_skips_non_matching() {
        let mut tree = Tree::new();
        tree.insert(&p("a"), 1);
        tree.insert(&p("a/b"), 2);
        let (found_path, value) = tree
            .find_root_most_matching(&p("a/b/c"), |v| *v > 1)
            .unwrap();
        assert_eq!(found_path, p("a/b"));
        assert_eq!(*value, 2);
    }

    #[test]
    fn leaf_most_value_finds_deepest() {
        let mut tree = Tree::new();
        tree.insert(&p("a"), 1);
        tree.insert(&p("a/b"), 2);
        assert_eq!(tree.leaf_most_value(&p("a/b/c")), Some(&2));
        assert_eq!(tree.leaf_most_value(&p("a")), Some(&1));
        assert_eq!(tree.leaf_most_value(&p("x")), None);
    }

    #[test]
    fn set_subtree_replaces_and_clears() {
        let mut tree = Tree::new();
        tree.insert(&p("a/b"), 1);
        let mut replacement = Tree::new();
        replacement.insert(&p("c"), 9);
        tree.set_subtree(&p("a"), replacement);
        assert_eq!(tree.get(&p("a/c")), Some(&9));
        assert_eq!(tree.get(&p("a/b")), None);
        tree.set_subtree(&p("a"), Tree::new());
        assert!(tree.is_empty());
    }

    #[test]
    fn for_each_visits_in_order() {
        let mut tree = Tree::new();
        tree.insert(&p("b"), 2);
        tree.insert(&p("a"), 1);
        tree.insert(&Path::root(), 0);
        let mut seen = Vec::new();
        tree.for_each_value(&mut |path, v| seen.push((path.clone(), *v)));
        assert_eq!(
            seen,
            vec![(Path::root(), 0), (p("a"), 1), (p("b"), 2)]
        );
    }
}
