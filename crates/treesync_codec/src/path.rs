//! Slash-separated paths addressing locations in the value tree.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A location in the tree, as an ordered list of child keys.
///
/// The empty path addresses the root. Parsing collapses repeated and
/// surrounding slashes, so `"/foo//bar/"` and `"foo/bar"` are the same path.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    /// The root path.
    #[must_use]
    pub const fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Parse a slash-separated path string.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        Self {
            segments: raw
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }

    /// Build a path from owned segments.
    #[must_use]
    pub fn from_segments(segments: Vec<String>) -> Self {
        Self { segments }
    }

    /// Whether this is the root path.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// The segments in order.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The first segment, if any.
    #[must_use]
    pub fn front(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    /// The last segment, if any.
    #[must_use]
    pub fn back(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// The path without its first segment. The root pops to itself.
    #[must_use]
    pub fn pop_front(&self) -> Self {
        Self {
            segments: self.segments.iter().skip(1).cloned().collect(),
        }
    }

    /// The parent path. The root has no parent.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// This path extended by one segment.
    #[must_use]
    pub fn child(&self, key: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(key.to_owned());
        Self { segments }
    }

    /// This path extended by another path.
    #[must_use]
    pub fn join(&self, suffix: &Path) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(suffix.segments.iter().cloned());
        Self { segments }
    }

    /// Whether `self` is an ancestor of (or equal to) `other`.
    #[must_use]
    pub fn contains(&self, other: &Path) -> bool {
        other.segments.len() >= self.segments.len()
            && self
                .segments
                .iter()
                .zip(other.segments.iter())
                .all(|(a, b)| a == b)
    }

    /// `other` relative to `self`, if `self` is an ancestor of `other`.
    #[must_use]
    pub fn strip_prefix(&self, other: &Path) -> Option<Path> {
        if !self.contains(other) {
            return None;
        }
        Some(Path {
            segments: other.segments[self.segments.len()..].to_vec(),
        })
    }

    /// Iterate over the segments.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(String::as_str)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            write!(f, "/")
        } else {
            write!(f, "/{}", self.segments.join("/"))
        }
    }
}

impl From<&str> for Path {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<String> for Path {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<Path> for String {
    fn from(path: Path) -> Self {
        path.segments.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_collapses_slashes() {
        assert_eq!(Path::parse("/foo//bar/"), Path::parse("foo/bar"));
        assert_eq!(Path::parse(""), Path::root());
        assert_eq!(Path::parse("/"), Path::root());
    }

    #[test]
    fn pop_front_and_parent() {
        let p = Path::parse("a/b/c");
        assert_eq!(p.front(), Some("a"));
        assert_eq!(p.pop_front(), Path::parse("b/c"));
        assert_eq!(p.parent(), Some(Path::parse("a/b")));
        assert_eq!(Path::root().parent(), None);
        assert_eq!(Path::root().pop_front(), Path::root());
    }

    #[test]
    fn containment_and_relative() {
        let base = Path::parse("a/b");
        let deep = Path::parse("a/b/c/d");
        assert!(base.contains(&deep));
        assert!(base.contains(&base));
        assert!(!deep.contains(&base));
        assert_eq!(base.strip_prefix(&deep), Some(Path::parse("c/d")));
        assert_eq!(deep.strip_prefix(&base), None);
        assert!(Path::root().contains(&base));
    }

    #[test]
    fn display_and_string_roundtrip() {
        let p = Path::parse("a/b");
        assert_eq!(p.to_string(), "/a/b");
        assert_eq!(Path::from(String::from(p.clone())), p);
        assert_eq!(Path::root().to_string(), "/");
    }
}
