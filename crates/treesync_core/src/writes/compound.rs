//! A sparse overlay of values keyed by path.

use std::collections::BTreeMap;

use treesync_codec::{Path, Value, PRIORITY_KEY};

use crate::tree::Tree;
use crate::vutil;

/// A set of pending writes, normalized so only the root-most write on any
/// path holds a value: adding a write under an existing ancestor write folds
/// it into the ancestor instead of storing a second node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompoundWrite {
    write_tree: Tree<Value>,
}

impl CompoundWrite {
    /// An overlay with no writes.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// An overlay from one write per immediate child.
    #[must_use]
    pub fn from_children<K, I>(children: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut write = Self::empty();
        for (key, value) in children {
            write.add_write(&Path::parse(&key.into()), value);
        }
        write
    }

    /// An overlay from the top-level entries of a map value, reserved keys
    /// included (so a `".priority"` entry becomes a priority write).
    #[must_use]
    pub fn from_value_merge(value: &Value) -> Self {
        let mut write = Self::empty();
        if let Some(map) = value.as_map() {
            for (key, child) in map {
                write.add_write(&Path::from_segments(vec![key.clone()]), child.clone());
            }
        }
        write
    }

    /// An overlay from explicit path/value pairs.
    #[must_use]
    pub fn from_path_merge<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (Path, Value)>,
    {
        let mut write = Self::empty();
        for (path, value) in entries {
            write.add_write(&path, value);
        }
        write
    }

    /// Whether the overlay holds no writes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.write_tree.is_empty()
    }

    /// Record a write at `path`.
    ///
    /// If an ancestor write already covers `path` the new value is folded
    /// into it, except that a priority write aimed at a node the ancestor
    /// leaves empty is dropped (empty nodes cannot carry priorities).
    pub fn add_write(&mut self, path: &Path, value: Value) {
        if path.is_empty() {
            self.write_tree = Tree::leaf(value);
            return;
        }
        if let Some((found_path, _)) = self.write_tree.find_root_most_value(path) {
            let relative = found_path
                .strip_prefix(path)
                .unwrap_or_else(Path::root);
            if path.back() == Some(PRIORITY_KEY) {
                let parent_relative = relative.parent().unwrap_or_else(Path::root);
                let existing = self
                    .write_tree
                    .get(&found_path)
                    .map(|v| vutil::get_child_at(v, &parent_relative))
                    .unwrap_or(Value::Null);
                if vutil::is_empty_value(&existing) {
                    return;
                }
            }
            if let Some(node) = self
                .write_tree
                .subtree_mut(&found_path)
                .value_mut()
            {
                vutil::update_child_at(node, &relative, value);
            }
        } else {
            // Descendant writes below `path` are shadowed; replace them.
            self.write_tree.set_subtree(path, Tree::leaf(value));
        }
    }

    /// Fold every write of another overlay in under a path prefix.
    pub fn add_writes(&mut self, path: &Path, other: &CompoundWrite) {
        for (relative, value) in other.entries() {
            self.add_write(&path.join(&relative), value);
        }
    }

    /// Remove the write at `path` and any writes below it.
    pub fn remove_write(&mut self, path: &Path) {
        if path.is_empty() {
            self.write_tree = Tree::new();
        } else {
            self.write_tree.set_subtree(path, Tree::new());
        }
    }

    /// Whether a write at or above `path` fully determines its value.
    #[must_use]
    pub fn has_complete_write(&self, path: &Path) -> bool {
        self.write_tree.find_root_most_value(path).is_some()
    }

    /// The write covering the root, if any.
    #[must_use]
    pub fn root_write(&self) -> Option<&Value> {
        self.write_tree.value()
    }

    /// The complete value at `path`, if some write at or above it covers it.
    #[must_use]
    pub fn get_complete_value(&self, path: &Path) -> Option<Value> {
        let (found_path, value) = self.write_tree.find_root_most_value(path)?;
        let relative = found_path.strip_prefix(path).unwrap_or_else(Path::root);
        Some(vutil::get_child_at(value, &relative))
    }

    /// Immediate children whose values are fully determined by writes.
    #[must_use]
    pub fn complete_children(&self) -> Vec<(String, Value)> {
        match self.write_tree.value() {
            Some(root) => vutil::children_of(root)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => self
                .write_tree
                .children()
                .iter()
                .filter_map(|(k, child)| child.value().map(|v| (k.clone(), v.clone())))
                .collect(),
        }
    }

    /// The overlay scoped to the writes at or below `path`.
    #[must_use]
    pub fn child_compound_write(&self, path: &Path) -> CompoundWrite {
        if path.is_empty() {
            return self.clone();
        }
        if let Some((found_path, value)) = self.write_tree.find_root_most_value(path) {
            let relative = found_path.strip_prefix(path).unwrap_or_else(Path::root);
            return CompoundWrite {
                write_tree: Tree::leaf(vutil::get_child_at(value, &relative)),
            };
        }
        CompoundWrite {
            write_tree: self
                .write_tree
                .subtree(path)
                .cloned()
                .unwrap_or_default(),
        }
    }

    /// The overlay split by immediate child.
    #[must_use]
    pub fn child_compound_writes(&self) -> BTreeMap<String, CompoundWrite> {
        match self.write_tree.value() {
            Some(root) => vutil::children_of(root)
                .map(|(k, v)| {
                    (
                        k.clone(),
                        CompoundWrite {
                            write_tree: Tree::leaf(v.clone()),
                        },
                    )
                })
                .collect(),
            None => self
                .write_tree
                .children()
                .iter()
                .map(|(k, child)| {
                    (
                        k.clone(),
                        CompoundWrite {
                            write_tree: child.clone(),
                        },
                    )
                })
                .collect(),
        }
    }

    /// All writes as path/value pairs, shallowest first.
    #[must_use]
    pub fn entries(&self) -> Vec<(Path, Value)> {
        let mut out = Vec::new();
        self.write_tree
            .for_each_value(&mut |path, value| out.push((path.clone(), value.clone())));
        out
    }

    /// Apply every write on top of a base value.
    ///
    /// Priority writes at a node are applied after that node's other writes,
    /// and dropped if the node ends up empty.
    #[must_use]
    pub fn apply_to(&self, base: &Value) -> Value {
        let mut result = base.clone();
        apply_subtree(&self.write_tree, &Path::root(), &mut result);
        result
    }
}

fn apply_subtree(node: &Tree<Value>, path: &Path, target: &mut Value) {
    if let Some(value) = node.value() {
        vutil::update_child_at(target, path, value.clone());
        return;
    }
    let mut priority_write = None;
    for (key, child) in node.children() {
        if key == PRIORITY_KEY {
            priority_write = child.value();
        } else {
            apply_subtree(child, &path.child(key), target);
        }
    }
    if let Some(priority) = priority_write {
        if !vutil::is_empty_value(&vutil::get_child_at(target, path)) {
            vutil::update_child_at(target, &path.child(PRIORITY_KEY), priority.clone());
        }
    }
}
