//! # treesync_core
//!
//! The client-side synchronization engine for TreeSync: it materializes
//! query views over a remote JSON-like tree, layers optimistic local writes
//! over server state, raises ordered data events, and keeps an optional
//! durable cache so listens survive restarts.
//!
//! The entry point is [`SyncTree`]. Mutations arrive as local writes
//! ([`SyncTree::apply_user_overwrite`], [`SyncTree::apply_user_merge`]) or
//! server pushes ([`SyncTree::apply_server_overwrite`] and friends); each
//! call returns the [`events::Event`]s the registered listeners must see,
//! already in delivery order. Wire listens are driven through the
//! [`ListenProvider`] the tree is built with, and durable state through a
//! [`persistence::PersistenceManager`].

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod config;
mod error;
pub mod events;
mod operation;
pub mod persistence;
pub mod query;
mod server_values;
mod sync_point;
mod sync_tree;
mod tree;
pub mod types;
pub mod view;
mod vutil;
pub mod writes;

pub use config::{SyncConfig, DEFAULT_CACHE_SIZE_BYTES};
pub use error::{CoreError, CoreResult, ListenError};
pub use operation::{Operation, OperationSource};
pub use server_values::{
    generate_server_values, resolve_deferred_merge, resolve_deferred_value, server_values_at,
    SERVER_VALUE_KEY,
};
pub use sync_point::SyncPoint;
pub use sync_tree::{ListenProvider, SyncTree};
pub use tree::Tree;
pub use vutil::{
    get_child, get_child_at, get_priority, is_empty_value, is_leaf_value, prune_nulls,
    update_child, update_child_at, update_priority,
};
