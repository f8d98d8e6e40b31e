//! The prune forest: which subtrees an eviction pass removes and which it
//! must keep.

use treesync_codec::Path;

use crate::tree::Tree;

/// A tree of prune decisions: `true` marks a subtree for pruning, `false`
/// marks one to keep. A keep mark beneath a prune mark wins for the data it
/// covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneForest {
    tree: Tree<bool>,
}

impl PruneForest {
    /// A forest with no decisions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any subtree is marked for pruning.
    #[must_use]
    pub fn prunes_anything(&self) -> bool {
        self.tree.any_value(&|prune| *prune)
    }

    /// Mark the subtree at `path` for pruning.
    ///
    /// Marking below an existing keep is a contract violation; the keep wins
    /// and the call is ignored.
    pub fn prune_path(&mut self, path: &Path) {
        if self
            .tree
            .find_root_most_matching(path, |prune| !*prune)
            .is_some()
        {
            debug_assert!(false, "pruning a path that was already kept");
            return;
        }
        if self
            .tree
            .find_root_most_matching(path, |prune| *prune)
            .is_none()
        {
            self.tree.set_subtree(path, Tree::leaf(true));
        }
    }

    /// Mark the subtree at `path` to keep.
    pub fn keep_path(&mut self, path: &Path) {
        if self
            .tree
            .find_root_most_matching(path, |prune| !*prune)
            .is_none()
        {
            self.tree.insert(path, false);
        }
    }

    /// Whether the node at `path` falls under a prune mark with no deeper
    /// keep overriding it at that exact spot.
    #[must_use]
    pub fn should_prune_unkept_descendants(&self, path: &Path) -> bool {
        self.tree.leaf_most_value(path).copied().unwrap_or(false)
    }

    /// Whether `path` is covered by a keep mark.
    #[must_use]
    pub fn should_keep(&self, path: &Path) -> bool {
        !self.tree.leaf_most_value(path).copied().unwrap_or(true)
    }

    /// Whether any decision applies at or below `path`.
    #[must_use]
    pub fn affects_path(&self, path: &Path) -> bool {
        self.tree.find_root_most_value(path).is_some()
            || self
                .tree
                .subtree(path)
                .is_some_and(|subtree| !subtree.is_empty())
    }

    /// The forest one level down, inheriting this node's decision for
    /// children with no decision of their own.
    #[must_use]
    pub fn child(&self, key: &str) -> PruneForest {
        let mut child_tree = self.tree.child(key).cloned().unwrap_or_default();
        if child_tree.value().is_none() {
            if let Some(inherited) = self.tree.value() {
                child_tree.set_value(Some(*inherited));
            }
        }
        Self { tree: child_tree }
    }

    /// Fold over every kept path.
    pub fn fold_kept_nodes<A, F>(&self, start: A, f: &mut F) -> A
    where
        F: FnMut(A, &Path) -> A,
    {
        let mut kept = Vec::new();
        self.tree.for_each_value(&mut |path, prune| {
            if !*prune {
                kept.push(path.clone());
            }
        });
        kept.into_iter().fold(start, |acc, path| f(acc, &path))
    }
}
