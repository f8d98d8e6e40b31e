//! The storage engine seam beneath the persistence manager.

use std::collections::BTreeSet;
use std::fmt;

use treesync_codec::{Path, Value};

use crate::error::CoreResult;
use crate::persistence::prune::PruneForest;
use crate::persistence::tracked::TrackedQuery;
use crate::types::{QueryId, WriteId};
use crate::writes::CompoundWrite;

/// Durable storage for the write log, the server cache, and tracked-query
/// bookkeeping.
///
/// All mutations must happen between [`begin_transaction`] and
/// [`end_transaction`]; a mutation outside a transaction is a contract
/// violation. The in-repo implementation is [`MemoryStorageEngine`]; on-disk
/// engines implement the same trait externally.
///
/// [`begin_transaction`]: PersistenceStorageEngine::begin_transaction
/// [`end_transaction`]: PersistenceStorageEngine::end_transaction
/// [`MemoryStorageEngine`]: crate::persistence::MemoryStorageEngine
pub trait PersistenceStorageEngine: fmt::Debug + Send {
    /// Record a pending overwrite in the write log.
    fn save_user_overwrite(
        &mut self,
        path: &Path,
        value: &Value,
        write_id: WriteId,
    ) -> CoreResult<()>;

    /// Record a pending merge in the write log.
    fn save_user_merge(
        &mut self,
        path: &Path,
        children: &CompoundWrite,
        write_id: WriteId,
    ) -> CoreResult<()>;

    /// Drop one write from the log.
    fn remove_user_write(&mut self, write_id: WriteId) -> CoreResult<()>;

    /// Drop the whole write log.
    fn remove_all_user_writes(&mut self) -> CoreResult<()>;

    /// Load the write log in write-id order.
    fn load_user_writes(&mut self) -> CoreResult<Vec<crate::writes::UserWriteRecord>>;

    /// The cached server value at `path`.
    fn server_cache(&mut self, path: &Path) -> CoreResult<Value>;

    /// Replace the cached server value at `path`.
    fn overwrite_server_cache(&mut self, path: &Path, value: &Value) -> CoreResult<()>;

    /// Merge values into the cached server value at `path`.
    fn merge_into_server_cache(
        &mut self,
        path: &Path,
        children: &CompoundWrite,
    ) -> CoreResult<()>;

    /// An estimate of the server cache's size in bytes.
    fn server_cache_estimated_size(&mut self) -> CoreResult<u64>;

    /// Insert or update a tracked query.
    fn save_tracked_query(&mut self, query: &TrackedQuery) -> CoreResult<()>;

    /// Remove a tracked query and its tracked keys.
    fn delete_tracked_query(&mut self, id: QueryId) -> CoreResult<()>;

    /// Load every tracked query.
    fn load_tracked_queries(&mut self) -> CoreResult<Vec<TrackedQuery>>;

    /// Mark every active tracked query inactive, stamping `last_use`.
    /// Runs once at startup: queries active at the time of a crash must not
    /// stay active.
    fn reset_previously_active_tracked_queries(&mut self, last_use: u64) -> CoreResult<()>;

    /// Replace the tracked child keys of a filtered query.
    fn save_tracked_query_keys(
        &mut self,
        id: QueryId,
        keys: &BTreeSet<String>,
    ) -> CoreResult<()>;

    /// Apply a delta to the tracked child keys of a filtered query.
    fn update_tracked_query_keys(
        &mut self,
        id: QueryId,
        added: &BTreeSet<String>,
        removed: &BTreeSet<String>,
    ) -> CoreResult<()>;

    /// The tracked child keys of a filtered query.
    fn load_tracked_query_keys(&mut self, id: QueryId) -> CoreResult<BTreeSet<String>>;

    /// Remove pruned data below `root` from the server cache.
    fn prune_cache(&mut self, root: &Path, forest: &PruneForest) -> CoreResult<()>;

    /// Open a transaction. Transactions do not nest.
    fn begin_transaction(&mut self) -> CoreResult<()>;

    /// Close the current transaction, rolling back unless it was marked
    /// successful.
    fn end_transaction(&mut self) -> CoreResult<()>;

    /// Mark the current transaction successful.
    fn set_transaction_successful(&mut self);
}
