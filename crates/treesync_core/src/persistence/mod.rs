//! Local persistence: the write log, the cached server state, and the
//! bookkeeping that decides what is safe to evict.

use std::collections::BTreeSet;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use treesync_codec::{Path, Value};

use crate::error::CoreResult;
use crate::query::{IndexedValue, QuerySpec};
use crate::types::WriteId;
use crate::view::CacheNode;
use crate::vutil;
use crate::writes::{CompoundWrite, UserWriteRecord, WritePayload};

pub mod engine;
pub mod memory;
pub mod policy;
pub mod prune;
pub mod record;
pub mod tracked;

pub use engine::PersistenceStorageEngine;
pub use memory::MemoryStorageEngine;
pub use policy::{CachePolicy, LruCachePolicy};
pub use prune::PruneForest;
pub use tracked::{TrackedQuery, TrackedQueryManager};

use crate::config::SyncConfig;

/// Build the persistence manager a configuration calls for.
///
/// # Errors
///
/// Returns an error if loading tracked state from the engine fails.
pub fn manager_from_config(
    config: &SyncConfig,
    engine: Box<dyn PersistenceStorageEngine>,
) -> CoreResult<Box<dyn PersistenceManager>> {
    if config.persistence_enabled() {
        let policy = Box::new(LruCachePolicy::new(config.cache_size_bytes()));
        Ok(Box::new(DefaultPersistenceManager::new(engine, policy)?))
    } else {
        Ok(Box::new(NoopPersistenceManager::new()))
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}

/// What the sync tree asks of local persistence.
///
/// Mutations happen between `begin_transaction` and `end_transaction`;
/// transactions do not nest, and changes are discarded on `end_transaction`
/// unless `set_transaction_successful` was called.
pub trait PersistenceManager: fmt::Debug + Send {
    /// Record a pending overwrite in the durable write log.
    fn save_user_overwrite(
        &mut self,
        path: &Path,
        value: &Value,
        write_id: WriteId,
    ) -> CoreResult<()>;

    /// Record a pending merge in the durable write log.
    fn save_user_merge(
        &mut self,
        path: &Path,
        children: &CompoundWrite,
        write_id: WriteId,
    ) -> CoreResult<()>;

    /// Drop one write from the log, after acknowledgement.
    fn remove_user_write(&mut self, write_id: WriteId) -> CoreResult<()>;

    /// Drop the whole write log.
    fn remove_all_user_writes(&mut self) -> CoreResult<()>;

    /// Load the write log in write-id order.
    fn load_user_writes(&mut self) -> CoreResult<Vec<UserWriteRecord>>;

    /// Fold a confirmed write into the cached server state, for locations no
    /// active listen covers.
    fn apply_user_write_to_server_cache(
        &mut self,
        path: &Path,
        payload: &WritePayload,
    ) -> CoreResult<()>;

    /// The cached server state for a query, with completeness and filtering
    /// flags.
    fn server_cache(&mut self, spec: &QuerySpec) -> CoreResult<CacheNode>;

    /// Store a server update for a query.
    fn update_server_cache(&mut self, spec: &QuerySpec, value: &Value) -> CoreResult<()>;

    /// Store a server merge at a path.
    fn update_server_cache_merge(
        &mut self,
        path: &Path,
        children: &CompoundWrite,
    ) -> CoreResult<()>;

    /// Note that a listen is attached to a query.
    fn set_query_active(&mut self, spec: &QuerySpec) -> CoreResult<()>;

    /// Note that a query's last listen detached.
    fn set_query_inactive(&mut self, spec: &QuerySpec) -> CoreResult<()>;

    /// Note that a query's cached data is complete.
    fn set_query_complete(&mut self, spec: &QuerySpec) -> CoreResult<()>;

    /// Replace the tracked child keys of a filtered query.
    fn set_tracked_query_keys(
        &mut self,
        spec: &QuerySpec,
        keys: &BTreeSet<String>,
    ) -> CoreResult<()>;

    /// Apply a delta to the tracked child keys of a filtered query.
    fn update_tracked_query_keys(
        &mut self,
        spec: &QuerySpec,
        added: &BTreeSet<String>,
        removed: &BTreeSet<String>,
    ) -> CoreResult<()>;

    /// Open a transaction.
    fn begin_transaction(&mut self) -> CoreResult<()>;

    /// Close the current transaction.
    fn end_transaction(&mut self) -> CoreResult<()>;

    /// Mark the current transaction successful.
    fn set_transaction_successful(&mut self);
}

/// The manager used when local persistence is disabled. Stores nothing but
/// still enforces the transaction contract.
#[derive(Debug, Default)]
pub struct NoopPersistenceManager {
    in_transaction: bool,
}

impl NoopPersistenceManager {
    /// A fresh no-op manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceManager for NoopPersistenceManager {
    fn save_user_overwrite(&mut self, _: &Path, _: &Value, _: WriteId) -> CoreResult<()> {
        Ok(())
    }

    fn save_user_merge(&mut self, _: &Path, _: &CompoundWrite, _: WriteId) -> CoreResult<()> {
        Ok(())
    }

    fn remove_user_write(&mut self, _: WriteId) -> CoreResult<()> {
        Ok(())
    }

    fn remove_all_user_writes(&mut self) -> CoreResult<()> {
        Ok(())
    }

    fn load_user_writes(&mut self) -> CoreResult<Vec<UserWriteRecord>> {
        Ok(Vec::new())
    }

    fn apply_user_write_to_server_cache(
        &mut self,
        _: &Path,
        _: &WritePayload,
    ) -> CoreResult<()> {
        Ok(())
    }

    fn server_cache(&mut self, spec: &QuerySpec) -> CoreResult<CacheNode> {
        Ok(CacheNode::new(
            IndexedValue::new(Value::Null, spec.params.clone()),
            false,
            false,
        ))
    }

    fn update_server_cache(&mut self, _: &QuerySpec, _: &Value) -> CoreResult<()> {
        Ok(())
    }

    fn update_server_cache_merge(&mut self, _: &Path, _: &CompoundWrite) -> CoreResult<()> {
        Ok(())
    }

    fn set_query_active(&mut self, _: &QuerySpec) -> CoreResult<()> {
        Ok(())
    }

    fn set_query_inactive(&mut self, _: &QuerySpec) -> CoreResult<()> {
        Ok(())
    }

    fn set_query_complete(&mut self, _: &QuerySpec) -> CoreResult<()> {
        Ok(())
    }

    fn set_tracked_query_keys(&mut self, _: &QuerySpec, _: &BTreeSet<String>) -> CoreResult<()> {
        Ok(())
    }

    fn update_tracked_query_keys(
        &mut self,
        _: &QuerySpec,
        _: &BTreeSet<String>,
        _: &BTreeSet<String>,
    ) -> CoreResult<()> {
        Ok(())
    }

    fn begin_transaction(&mut self) -> CoreResult<()> {
        debug_assert!(!self.in_transaction, "transactions do not nest");
        self.in_transaction = true;
        Ok(())
    }

    fn end_transaction(&mut self) -> CoreResult<()> {
        debug_assert!(self.in_transaction, "no transaction to end");
        self.in_transaction = false;
        Ok(())
    }

    fn set_transaction_successful(&mut self) {}
}

/// The production manager: a storage engine plus tracked-query bookkeeping
/// and an eviction policy.
#[derive(Debug)]
pub struct DefaultPersistenceManager {
    engine: Box<dyn PersistenceStorageEngine>,
    tracked: TrackedQueryManager,
    policy: Box<dyn CachePolicy>,
    server_updates_since_check: u64,
    in_transaction: bool,
}

impl DefaultPersistenceManager {
    /// Build a manager over an engine, resetting crash-stale tracked state.
    ///
    /// # Errors
    ///
    /// Returns an error if loading tracked queries from the engine fails.
    pub fn new(
        mut engine: Box<dyn PersistenceStorageEngine>,
        policy: Box<dyn CachePolicy>,
    ) -> CoreResult<Self> {
        let tracked = TrackedQueryManager::new(engine.as_mut(), now_ms())?;
        Ok(Self {
            engine,
            tracked,
            policy,
            server_updates_since_check: 0,
            in_transaction: false,
        })
    }

    fn prune_check_after_server_update(&mut self) -> CoreResult<()> {
        self.server_updates_since_check += 1;
        if !self
            .policy
            .should_check_cache_size(self.server_updates_since_check)
        {
            return Ok(());
        }
        self.server_updates_since_check = 0;
        loop {
            let size = self.engine.server_cache_estimated_size()?;
            let prunable = self.tracked.count_of_prunable_queries();
            if !self.policy.should_prune(size, prunable) {
                return Ok(());
            }
            tracing::debug!(size, prunable, "pruning server cache");
            let forest = self
                .tracked
                .prune_old_queries(self.engine.as_mut(), self.policy.as_ref())?;
            if !forest.prunes_anything() {
                return Ok(());
            }
            self.engine.prune_cache(&Path::root(), &forest)?;
        }
    }
}

impl PersistenceManager for DefaultPersistenceManager {
    fn save_user_overwrite(
        &mut self,
        path: &Path,
        value: &Value,
        write_id: WriteId,
    ) -> CoreResult<()> {
        self.engine.save_user_overwrite(path, value, write_id)
    }

    fn save_user_merge(
        &mut self,
        path: &Path,
        children: &CompoundWrite,
        write_id: WriteId,
    ) -> CoreResult<()> {
        self.engine.save_user_merge(path, children, write_id)
    }

    fn remove_user_write(&mut self, write_id: WriteId) -> CoreResult<()> {
        self.engine.remove_user_write(write_id)
    }

    fn remove_all_user_writes(&mut self) -> CoreResult<()> {
        self.engine.remove_all_user_writes()
    }

    fn load_user_writes(&mut self) -> CoreResult<Vec<UserWriteRecord>> {
        self.engine.load_user_writes()
    }

    fn apply_user_write_to_server_cache(
        &mut self,
        path: &Path,
        payload: &WritePayload,
    ) -> CoreResult<()> {
        // Locations under an active listen get their data from the server
        // echo instead.
        if self.tracked.has_active_default_query(path) {
            return Ok(());
        }
        match payload {
            WritePayload::Overwrite(value) => {
                self.engine.overwrite_server_cache(path, value)?;
                self.tracked
                    .ensure_complete_tracked_query(self.engine.as_mut(), path, now_ms())
            }
            WritePayload::Merge(children) => {
                for (child_path, value) in children.entries() {
                    self.engine
                        .overwrite_server_cache(&path.join(&child_path), &value)?;
                }
                Ok(())
            }
        }
    }

    fn server_cache(&mut self, spec: &QuerySpec) -> CoreResult<CacheNode> {
        let complete = self.tracked.is_query_complete(spec);
        let tracked_keys: Option<BTreeSet<String>> = if complete {
            if spec.loads_all_data() {
                None
            } else {
                match self.tracked.find_tracked_query(spec) {
                    Some(query) if query.complete => {
                        Some(self.engine.load_tracked_query_keys(query.id)?)
                    }
                    _ => None,
                }
            }
        } else {
            Some(
                self.tracked
                    .known_complete_children(self.engine.as_mut(), &spec.path)?,
            )
        };
        let cached = self.engine.server_cache(&spec.path)?;
        match tracked_keys {
            Some(keys) => {
                let mut filtered = Value::empty_map();
                for key in keys {
                    let child = vutil::get_child(&cached, &key);
                    if !vutil::is_empty_value(&child) {
                        vutil::update_child(&mut filtered, &key, child);
                    }
                }
                Ok(CacheNode::new(
                    IndexedValue::new(filtered, spec.params.clone()),
                    complete,
                    true,
                ))
            }
            None => Ok(CacheNode::new(
                IndexedValue::new(cached, spec.params.clone()),
                complete,
                false,
            )),
        }
    }

    fn update_server_cache(&mut self, spec: &QuerySpec, value: &Value) -> CoreResult<()> {
        if spec.loads_all_data() {
            self.engine.overwrite_server_cache(&spec.path, value)?;
        } else {
            // Filtered data must not clobber siblings outside the window.
            let children = CompoundWrite::from_children(
                vutil::children_of(value).map(|(key, child)| (key.clone(), child.clone())),
            );
            self.engine
                .merge_into_server_cache(&spec.path, &children)?;
        }
        self.prune_check_after_server_update()
    }

    fn update_server_cache_merge(
        &mut self,
        path: &Path,
        children: &CompoundWrite,
    ) -> CoreResult<()> {
        self.engine.merge_into_server_cache(path, children)?;
        self.prune_check_after_server_update()
    }

    fn set_query_active(&mut self, spec: &QuerySpec) -> CoreResult<()> {
        self.tracked
            .set_query_active(self.engine.as_mut(), spec, now_ms())
    }

    fn set_query_inactive(&mut self, spec: &QuerySpec) -> CoreResult<()> {
        self.tracked
            .set_query_inactive(self.engine.as_mut(), spec, now_ms())
    }

    fn set_query_complete(&mut self, spec: &QuerySpec) -> CoreResult<()> {
        if spec.loads_all_data() {
            self.tracked
                .set_queries_complete(self.engine.as_mut(), &spec.path)
        } else {
            self.tracked.set_query_complete(self.engine.as_mut(), spec)
        }
    }

    fn set_tracked_query_keys(
        &mut self,
        spec: &QuerySpec,
        keys: &BTreeSet<String>,
    ) -> CoreResult<()> {
        debug_assert!(!spec.loads_all_data(), "only filtered queries track keys");
        if let Some(query) = self.tracked.find_tracked_query(spec) {
            self.engine.save_tracked_query_keys(query.id, keys)?;
        }
        Ok(())
    }

    fn update_tracked_query_keys(
        &mut self,
        spec: &QuerySpec,
        added: &BTreeSet<String>,
        removed: &BTreeSet<String>,
    ) -> CoreResult<()> {
        debug_assert!(!spec.loads_all_data(), "only filtered queries track keys");
        if let Some(query) = self.tracked.find_tracked_query(spec) {
            self.engine
                .update_tracked_query_keys(query.id, added, removed)?;
        }
        Ok(())
    }

    fn begin_transaction(&mut self) -> CoreResult<()> {
        debug_assert!(!self.in_transaction, "transactions do not nest");
        self.in_transaction = true;
        self.engine.begin_transaction()
    }

    fn end_transaction(&mut self) -> CoreResult<()> {
        debug_assert!(self.in_transaction, "no transaction to end");
        self.in_transaction = false;
        self.engine.end_transaction()
    }

    fn set_transaction_successful(&mut self) {
        self.engine.set_transaction_successful();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryParams;

    fn manager() -> DefaultPersistenceManager {
        DefaultPersistenceManager::new(
            Box::new(MemoryStorageEngine::new()),
            Box::new(LruCachePolicy::default()),
        )
        .unwrap()
    }

    fn in_transaction<F: FnOnce(&mut DefaultPersistenceManager)>(
        manager: &mut DefaultPersistenceManager,
        f: F,
    ) {
        manager.begin_transaction().unwrap();
        f(manager);
        manager.set_transaction_successful();
        manager.end_transaction().unwrap();
    }

    #[test]
    fn server_cache_reports_completeness() {
        let mut manager = manager();
        let spec = QuerySpec::default_at(Path::parse("a"));
        in_transaction(&mut manager, |m| {
            m.set_query_active(&spec).unwrap();
            m.update_server_cache(&spec, &Value::map_from([("x", Value::Int(1))]))
                .unwrap();
            m.set_query_complete(&spec).unwrap();
        });
        let cache = manager.server_cache(&spec).unwrap();
        assert!(cache.is_fully_initialized());
        assert!(!cache.is_filtered());
        assert_eq!(cache.value(), &Value::map_from([("x", Value::Int(1))]));
    }

    #[test]
    fn filtered_cache_restricts_to_tracked_keys() {
        let mut manager = manager();
        let filtered = QuerySpec::new(
            Path::parse("scores"),
            QueryParams::default().order_by_key().limit_to_first(1),
        );
        in_transaction(&mut manager, |m| {
            m.set_query_active(&filtered).unwrap();
            m.update_server_cache(
                &filtered,
                &Value::map_from([("a", Value::Int(1))]),
            )
            .unwrap();
            m.set_query_complete(&filtered).unwrap();
            m.set_tracked_query_keys(&filtered, &BTreeSet::from(["a".to_owned()]))
                .unwrap();
            // Unrelated data at the same path.
            m.update_server_cache(
                &QuerySpec::default_at(Path::parse("scores/zz")),
                &Value::Int(9),
            )
            .unwrap();
        });
        let cache = manager.server_cache(&filtered).unwrap();
        assert!(cache.is_fully_initialized());
        assert!(cache.is_filtered());
        assert_eq!(cache.value(), &Value::map_from([("a", Value::Int(1))]));
    }

    #[test]
    fn user_write_reaches_cache_only_without_active_listen() {
        let mut manager = manager();
        let listened = QuerySpec::default_at(Path::parse("live"));
        in_transaction(&mut manager, |m| {
            m.set_query_active(&listened).unwrap();
            m.apply_user_write_to_server_cache(
                &Path::parse("live/x"),
                &WritePayload::Overwrite(Value::Int(1)),
            )
            .unwrap();
            m.apply_user_write_to_server_cache(
                &Path::parse("offline/x"),
                &WritePayload::Overwrite(Value::Int(2)),
            )
            .unwrap();
        });
        let live = manager
            .server_cache(&QuerySpec::default_at(Path::parse("live/x")))
            .unwrap();
        assert!(vutil::is_empty_value(live.value()));
        let offline = manager
            .server_cache(&QuerySpec::default_at(Path::parse("offline/x")))
            .unwrap();
        assert_eq!(offline.value(), &Value::Int(2));
        assert!(offline.is_fully_initialized());
    }

    #[test]
    fn noop_manager_enforces_transaction_balance() {
        let mut manager = NoopPersistenceManager::new();
        manager.begin_transaction().unwrap();
        manager
            .save_user_overwrite(&Path::parse("a"), &Value::Int(1), WriteId::new(1))
            .unwrap();
        manager.set_transaction_successful();
        manager.end_transaction().unwrap();
        assert!(manager.load_user_writes().unwrap().is_empty());
    }
}
