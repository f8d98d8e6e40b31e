//! Operations: the normalized form of every mutation the engine applies.
//!
//! User writes, server updates, acknowledgements, and listen completions are
//! all expressed as operations targeting a path. As an operation descends the
//! tree of sync points it is rewritten relative to each child.

use treesync_codec::{Path, Value};

use crate::query::QueryParams;
use crate::tree::Tree;
use crate::writes::CompoundWrite;

/// Where an operation came from.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationSource {
    origin: Origin,
    query_params: Option<QueryParams>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    User,
    Server,
}

impl OperationSource {
    /// An operation caused by a local write.
    #[must_use]
    pub const fn user() -> Self {
        Self {
            origin: Origin::User,
            query_params: None,
        }
    }

    /// An operation caused by a server update for a complete location.
    #[must_use]
    pub const fn server() -> Self {
        Self {
            origin: Origin::Server,
            query_params: None,
        }
    }

    /// An operation caused by a server update routed to one tagged query.
    #[must_use]
    pub const fn for_server_tagged_query(params: QueryParams) -> Self {
        Self {
            origin: Origin::Server,
            query_params: Some(params),
        }
    }

    /// Whether this operation originated locally.
    #[must_use]
    pub const fn is_from_user(&self) -> bool {
        matches!(self.origin, Origin::User)
    }

    /// Whether this operation came from the server.
    #[must_use]
    pub const fn is_from_server(&self) -> bool {
        matches!(self.origin, Origin::Server)
    }

    /// Whether this operation targets a single tagged query.
    #[must_use]
    pub const fn is_tagged(&self) -> bool {
        self.query_params.is_some()
    }

    /// The parameters of the tagged query, if any.
    #[must_use]
    pub const fn query_params(&self) -> Option<&QueryParams> {
        self.query_params.as_ref()
    }
}

/// A mutation to apply at a path.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Replace everything at the path with a value.
    Overwrite {
        /// Where the overwrite came from.
        source: OperationSource,
        /// The location being replaced.
        path: Path,
        /// The new value.
        value: Value,
    },
    /// Apply independent writes below the path.
    Merge {
        /// Where the merge came from.
        source: OperationSource,
        /// The location the merge is rooted at.
        path: Path,
        /// The writes, keyed by path below `path`.
        children: CompoundWrite,
    },
    /// The server finished a round trip for a local write.
    AckUserWrite {
        /// The path of the acknowledged write.
        path: Path,
        /// Which subpaths the write affected (values are `true`).
        affected: Tree<bool>,
        /// Whether the write was rejected and must be rolled back.
        revert: bool,
    },
    /// The server finished sending the initial data for a listen.
    ListenComplete {
        /// Where the completion came from; always a server source.
        source: OperationSource,
        /// The listened location.
        path: Path,
    },
}

impl Operation {
    /// An overwrite operation.
    #[must_use]
    pub fn overwrite(source: OperationSource, path: Path, value: Value) -> Self {
        Self::Overwrite {
            source,
            path,
            value,
        }
    }

    /// A merge operation.
    #[must_use]
    pub fn merge(source: OperationSource, path: Path, children: CompoundWrite) -> Self {
        Self::Merge {
            source,
            path,
            children,
        }
    }

    /// An acknowledgement operation. Acks are always user-sourced.
    #[must_use]
    pub fn ack_user_write(path: Path, affected: Tree<bool>, revert: bool) -> Self {
        Self::AckUserWrite {
            path,
            affected,
            revert,
        }
    }

    /// A listen-complete operation.
    #[must_use]
    pub fn listen_complete(source: OperationSource, path: Path) -> Self {
        debug_assert!(source.is_from_server(), "listen completes come from the server");
        Self::ListenComplete { source, path }
    }

    /// The source of this operation.
    #[must_use]
    pub fn source(&self) -> &OperationSource {
        static USER: OperationSource = OperationSource::user();
        match self {
            Self::Overwrite { source, .. }
            | Self::Merge { source, .. }
            | Self::ListenComplete { source, .. } => source,
            Self::AckUserWrite { .. } => &USER,
        }
    }

    /// The path this operation targets.
    #[must_use]
    pub const fn path(&self) -> &Path {
        match self {
            Self::Overwrite { path, .. }
            | Self::Merge { path, .. }
            | Self::AckUserWrite { path, .. }
            | Self::ListenComplete { path, .. } => path,
        }
    }

    /// Rewrite this operation relative to one child of its target.
    ///
    /// Returns `None` when the operation does not touch that child.
    #[must_use]
    pub fn operation_for_child(&self, child_key: &str) -> Option<Operation> {
        match self {
            Self::Overwrite {
                source,
                path,
                value,
            } => {
                if path.is_empty() {
                    Some(Self::Overwrite {
                        source: source.clone(),
                        path: Path::root(),
                        value: crate::vutil::get_child(value, child_key),
                    })
                } else if path.front() == Some(child_key) {
                    Some(Self::Overwrite {
                        source: source.clone(),
                        path: path.pop_front(),
                        value: value.clone(),
                    })
                } else {
                    None
                }
            }
            Self::Merge {
                source,
                path,
                children,
            } => {
                if !path.is_empty() {
                    if path.front() == Some(child_key) {
                        Some(Self::Merge {
                            source: source.clone(),
                            path: path.pop_front(),
                            children: children.clone(),
                        })
                    } else {
                        None
                    }
                } else {
                    let child_merge =
                        children.child_compound_write(&Path::from_segments(vec![child_key.into()]));
                    if child_merge.is_empty() {
                        None
                    } else if let Some(root_write) = child_merge.root_write() {
                        // The merge pins this whole child; descend as an
                        // overwrite.
                        Some(Self::Overwrite {
                            source: source.clone(),
                            path: Path::root(),
                            value: root_write.clone(),
                        })
                    } else {
                        Some(Self::Merge {
                            source: source.clone(),
                            path: Path::root(),
                            children: child_merge,
                        })
                    }
                }
            }
            Self::AckUserWrite {
                path,
                affected,
                revert,
            } => {
                if !path.is_empty() {
                    if path.front() == Some(child_key) {
                        Some(Self::AckUserWrite {
                            path: path.pop_front(),
                            affected: affected.clone(),
                            revert: *revert,
                        })
                    } else {
                        None
                    }
                } else if affected.value().is_some() {
                    debug_assert!(
                        affected.children().is_empty(),
                        "affected trees are normalized"
                    );
                    // The write affected the whole subtree; so does the ack.
                    Some(self.clone())
                } else {
                    let child_tree = affected.child(child_key).cloned().unwrap_or_default();
                    Some(Self::AckUserWrite {
                        path: Path::root(),
                        affected: child_tree,
                        revert: *revert,
                    })
                }
            }
            Self::ListenComplete { source, path } => {
                if path.is_empty() {
                    Some(Self::ListenComplete {
                        source: source.clone(),
                        path: Path::root(),
                    })
                } else if path.front() == Some(child_key) {
                    Some(Self::ListenComplete {
                        source: source.clone(),
                        path: path.pop_front(),
                    })
                } else {
                    None
                }
            }
        }
    }
}
