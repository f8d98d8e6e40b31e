//! An in-memory storage engine.
//!
//! The server cache lives as a value tree; user writes, tracked queries, and
//! tracked keys are stored as encoded CBOR records so startup replay decodes
//! the same bytes an on-disk engine would.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use treesync_codec::{from_cbor, to_cbor, Path, Value};

use crate::error::CoreResult;
use crate::persistence::engine::PersistenceStorageEngine;
use crate::persistence::prune::PruneForest;
use crate::persistence::record;
use crate::persistence::tracked::TrackedQuery;
use crate::types::{QueryId, WriteId};
use crate::vutil;
use crate::writes::{CompoundWrite, UserWriteRecord};

/// Storage engine keeping everything in memory.
#[derive(Debug, Default)]
pub struct MemoryStorageEngine {
    server_cache: Value,
    user_writes: BTreeMap<WriteId, Bytes>,
    tracked_queries: BTreeMap<QueryId, Bytes>,
    tracked_keys: BTreeMap<QueryId, Bytes>,
    in_transaction: bool,
    transaction_successful: bool,
    snapshot: Option<Box<Snapshot>>,
}

#[derive(Debug)]
struct Snapshot {
    server_cache: Value,
    user_writes: BTreeMap<WriteId, Bytes>,
    tracked_queries: BTreeMap<QueryId, Bytes>,
    tracked_keys: BTreeMap<QueryId, Bytes>,
}

impl MemoryStorageEngine {
    /// An empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn verify_inside_transaction(&self) {
        debug_assert!(self.in_transaction, "storage mutated outside a transaction");
        if !self.in_transaction {
            tracing::error!("storage mutated outside a transaction");
        }
    }

    fn decode_keys(&self, id: QueryId) -> CoreResult<BTreeSet<String>> {
        match self.tracked_keys.get(&id) {
            Some(bytes) => Ok(from_cbor(bytes)?),
            None => Ok(BTreeSet::new()),
        }
    }

    fn store_keys(&mut self, id: QueryId, keys: &BTreeSet<String>) -> CoreResult<()> {
        if keys.is_empty() {
            self.tracked_keys.remove(&id);
        } else {
            self.tracked_keys.insert(id, Bytes::from(to_cbor(keys)?));
        }
        Ok(())
    }
}

fn prune_value(value: &Value, forest: &PruneForest) -> Value {
    if forest.should_keep(&Path::root()) {
        return value.clone();
    }
    match value.as_map() {
        Some(children) => {
            let mut kept = std::collections::BTreeMap::new();
            for (key, child) in children {
                let pruned = prune_value(child, &forest.child(key));
                if !vutil::is_empty_value(&pruned) {
                    kept.insert(key.clone(), pruned);
                }
            }
            if kept.is_empty() {
                Value::Null
            } else {
                Value::Map(kept)
            }
        }
        None => {
            if forest.should_prune_unkept_descendants(&Path::root()) {
                Value::Null
            } else {
                value.clone()
            }
        }
    }
}

impl PersistenceStorageEngine for MemoryStorageEngine {
    fn save_user_overwrite(
        &mut self,
        path: &Path,
        value: &Value,
        write_id: WriteId,
    ) -> CoreResult<()> {
        self.verify_inside_transaction();
        let record = UserWriteRecord {
            write_id,
            path: path.clone(),
            payload: crate::writes::WritePayload::Overwrite(value.clone()),
            visible: true,
        };
        let bytes = record::encode_user_write(&record)?;
        self.user_writes.insert(write_id, Bytes::from(bytes));
        Ok(())
    }

    fn save_user_merge(
        &mut self,
        path: &Path,
        children: &CompoundWrite,
        write_id: WriteId,
    ) -> CoreResult<()> {
        self.verify_inside_transaction();
        let record = UserWriteRecord {
            write_id,
            path: path.clone(),
            payload: crate::writes::WritePayload::Merge(children.clone()),
            visible: true,
        };
        let bytes = record::encode_user_write(&record)?;
        self.user_writes.insert(write_id, Bytes::from(bytes));
        Ok(())
    }

    fn remove_user_write(&mut self, write_id: WriteId) -> CoreResult<()> {
        self.verify_inside_transaction();
        self.user_writes.remove(&write_id);
        Ok(())
    }

    fn remove_all_user_writes(&mut self) -> CoreResult<()> {
        self.verify_inside_transaction();
        self.user_writes.clear();
        Ok(())
    }

    fn load_user_writes(&mut self) -> CoreResult<Vec<UserWriteRecord>> {
        self.user_writes
            .values()
            .map(|bytes| record::decode_user_write(bytes))
            .collect()
    }

    fn server_cache(&mut self, path: &Path) -> CoreResult<Value> {
        Ok(vutil::get_child_at(&self.server_cache, path))
    }

    fn overwrite_server_cache(&mut self, path: &Path, value: &Value) -> CoreResult<()> {
        self.verify_inside_transaction();
        vutil::update_child_at(&mut self.server_cache, path, value.clone());
        Ok(())
    }

    fn merge_into_server_cache(
        &mut self,
        path: &Path,
        children: &CompoundWrite,
    ) -> CoreResult<()> {
        self.verify_inside_transaction();
        for (child_path, value) in children.entries() {
            vutil::update_child_at(&mut self.server_cache, &path.join(&child_path), value);
        }
        Ok(())
    }

    fn server_cache_estimated_size(&mut self) -> CoreResult<u64> {
        Ok(to_cbor(&self.server_cache)?.len() as u64)
    }

    fn save_tracked_query(&mut self, query: &TrackedQuery) -> CoreResult<()> {
        self.verify_inside_transaction();
        let bytes = record::encode_tracked_query(query)?;
        self.tracked_queries.insert(query.id, Bytes::from(bytes));
        Ok(())
    }

    fn delete_tracked_query(&mut self, id: QueryId) -> CoreResult<()> {
        self.verify_inside_transaction();
        self.tracked_queries.remove(&id);
        self.tracked_keys.remove(&id);
        Ok(())
    }

    fn load_tracked_queries(&mut self) -> CoreResult<Vec<TrackedQuery>> {
        self.tracked_queries
            .values()
            .map(|bytes| record::decode_tracked_query(bytes))
            .collect()
    }

    fn reset_previously_active_tracked_queries(&mut self, last_use: u64) -> CoreResult<()> {
        // Startup-only; runs before the first transaction.
        let ids: Vec<QueryId> = self.tracked_queries.keys().copied().collect();
        for id in ids {
            let Some(bytes) = self.tracked_queries.get(&id) else {
                continue;
            };
            let mut query = record::decode_tracked_query(bytes)?;
            if query.active {
                query.active = false;
                query.last_use = last_use;
                let bytes = record::encode_tracked_query(&query)?;
                self.tracked_queries.insert(id, Bytes::from(bytes));
            }
        }
        Ok(())
    }

    fn save_tracked_query_keys(
        &mut self,
        id: QueryId,
        keys: &BTreeSet<String>,
    ) -> CoreResult<()> {
        self.verify_inside_transaction();
        self.store_keys(id, keys)
    }

    fn update_tracked_query_keys(
        &mut self,
        id: QueryId,
        added: &BTreeSet<String>,
        removed: &BTreeSet<String>,
    ) -> CoreResult<()> {
        self.verify_inside_transaction();
        let mut keys = self.decode_keys(id)?;
        for key in removed {
            keys.remove(key);
        }
        keys.extend(added.iter().cloned());
        self.store_keys(id, &keys)
    }

    fn load_tracked_query_keys(&mut self, id: QueryId) -> CoreResult<BTreeSet<String>> {
        self.decode_keys(id)
    }

    fn prune_cache(&mut self, root: &Path, forest: &PruneForest) -> CoreResult<()> {
        self.verify_inside_transaction();
        if !forest.prunes_anything() {
            return Ok(());
        }
        let subtree = vutil::get_child_at(&self.server_cache, root);
        let pruned = prune_value(&subtree, forest);
        vutil::update_child_at(&mut self.server_cache, root, pruned);
        Ok(())
    }

    fn begin_transaction(&mut self) -> CoreResult<()> {
        debug_assert!(!self.in_transaction, "transactions do not nest");
        self.snapshot = Some(Box::new(Snapshot {
            server_cache: self.server_cache.clone(),
            user_writes: self.user_writes.clone(),
            tracked_queries: self.tracked_queries.clone(),
            tracked_keys: self.tracked_keys.clone(),
        }));
        self.in_transaction = true;
        self.transaction_successful = false;
        Ok(())
    }

    fn end_transaction(&mut self) -> CoreResult<()> {
        debug_assert!(self.in_transaction, "no transaction to end");
        if let Some(snapshot) = self.snapshot.take() {
            if !self.transaction_successful {
                // Roll back.
                self.server_cache = snapshot.server_cache;
                self.user_writes = snapshot.user_writes;
                self.tracked_queries = snapshot.tracked_queries;
                self.tracked_keys = snapshot.tracked_keys;
            }
        }
        self.in_transaction = false;
        self.transaction_successful = false;
        Ok(())
    }

    fn set_transaction_successful(&mut self) {
        debug_assert!(self.in_transaction, "no transaction to mark");
        self.transaction_successful = true;
    }
}
