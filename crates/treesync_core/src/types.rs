//! Identifier newtypes used throughout the engine.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Monotonic identifier assigned to each local write.
///
/// Ids are allocated by the write tree, starting at zero, and survive
/// restarts through the persisted write log.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct WriteId(i64);

impl WriteId {
    /// Wrap a raw write id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for WriteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "write:{}", self.0)
    }
}

/// Opaque identifier the server uses to route updates for non-default
/// queries.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Tag(u64);

impl Tag {
    /// Wrap a raw tag.
    #[must_use]
    pub const fn new(tag: u64) -> Self {
        Self(tag)
    }

    /// The raw tag.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tag:{}", self.0)
    }
}

/// Identifier of a tracked query in the persistence layer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct QueryId(u64);

impl QueryId {
    /// Wrap a raw query id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The next id after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "query:{}", self.0)
    }
}

/// Identity of a registered listener, used to target removal and to
/// associate events with the callback that should observe them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

impl ListenerId {
    /// Allocate a process-unique listener id.
    #[must_use]
    pub fn fresh() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a raw id. Test harnesses use this to pin ids to callbacks.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener:{}", self.0)
    }
}

/// Whether a local overwrite is visible to local views or applied silently
/// (held back until the server acknowledges it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwriteVisibility {
    /// The write is reflected in local views immediately.
    Visible,
    /// The write is hidden from local views until acknowledged.
    Invisible,
}

impl OverwriteVisibility {
    /// Whether this is [`OverwriteVisibility::Visible`].
    #[must_use]
    pub const fn is_visible(self) -> bool {
        matches!(self, Self::Visible)
    }
}

/// Whether an operation should be written to the persistence layer.
///
/// Replaying the persisted write log on startup applies writes that are
/// already stored, so the replay path skips persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistMode {
    /// Record the operation durably.
    Persist,
    /// Apply in memory only.
    DoNotPersist,
}

impl PersistMode {
    /// Whether this is [`PersistMode::Persist`].
    #[must_use]
    pub const fn should_persist(self) -> bool {
        matches!(self, Self::Persist)
    }
}

/// Outcome of a server round trip for a local write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    /// The server accepted the write.
    Confirm,
    /// The server rejected the write; local state must roll back.
    Revert,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        assert_eq!(WriteId::new(3).to_string(), "write:3");
        assert_eq!(Tag::new(9).to_string(), "tag:9");
        assert_eq!(ListenerId::new(2).to_string(), "listener:2");
    }

    #[test]
    fn fresh_listener_ids_are_unique() {
        let a = ListenerId::fresh();
        let b = ListenerId::fresh();
        assert_ne!(a, b);
    }
}
