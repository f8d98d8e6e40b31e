//! Bookkeeping for queries whose results live in the persisted cache.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use treesync_codec::Path;

use crate::error::CoreResult;
use crate::persistence::engine::PersistenceStorageEngine;
use crate::persistence::policy::CachePolicy;
use crate::persistence::prune::PruneForest;
use crate::query::{QueryParams, QuerySpec};
use crate::tree::Tree;
use crate::types::QueryId;

/// One query the persistence layer tracks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedQuery {
    /// Storage identity.
    pub id: QueryId,
    /// The query itself.
    pub spec: QuerySpec,
    /// When the query was last listened to, in milliseconds since the epoch.
    pub last_use: u64,
    /// Whether the cached data for this query is complete.
    pub complete: bool,
    /// Whether a listener is currently attached.
    pub active: bool,
}

/// The in-memory forest of tracked queries, layered over the storage engine.
///
/// Specs that load all data are normalized to the default spec at their path
/// before lookup or storage.
#[derive(Debug)]
pub struct TrackedQueryManager {
    tracked: Tree<BTreeMap<QueryParams, TrackedQuery>>,
    next_id: QueryId,
}

impl TrackedQueryManager {
    /// Load tracked state from the engine, resetting any queries left active
    /// by a crash.
    pub fn new(engine: &mut dyn PersistenceStorageEngine, now_ms: u64) -> CoreResult<Self> {
        engine.reset_previously_active_tracked_queries(now_ms)?;
        let mut tracked: Tree<BTreeMap<QueryParams, TrackedQuery>> = Tree::new();
        let mut next_id = QueryId::default();
        for query in engine.load_tracked_queries()? {
            if query.id.get() >= next_id.get() {
                next_id = query.id.next();
            }
            tracked
                .subtree_mut(&query.spec.path)
                .value_mut_or_default()
                .insert(query.spec.params.clone(), query);
        }
        Ok(Self { tracked, next_id })
    }

    fn normalize(spec: &QuerySpec) -> QuerySpec {
        if spec.loads_all_data() && !spec.is_default() {
            spec.with_default_params()
        } else {
            spec.clone()
        }
    }

    /// The tracked query for a spec, if any.
    #[must_use]
    pub fn find_tracked_query(&self, spec: &QuerySpec) -> Option<&TrackedQuery> {
        let spec = Self::normalize(spec);
        self.tracked.get(&spec.path)?.get(&spec.params)
    }

    /// Forget a tracked query, in memory and in the engine.
    pub fn remove_tracked_query(
        &mut self,
        engine: &mut dyn PersistenceStorageEngine,
        spec: &QuerySpec,
    ) -> CoreResult<()> {
        let spec = Self::normalize(spec);
        let mut removed = None;
        let mut emptied = false;
        if let Some(map) = self.tracked.subtree_mut(&spec.path).value_mut() {
            removed = map.remove(&spec.params);
            emptied = map.is_empty();
        }
        if emptied {
            self.tracked.remove(&spec.path);
        }
        if let Some(query) = removed {
            engine.delete_tracked_query(query.id)?;
        }
        Ok(())
    }

    /// Mark a query active, creating its tracked record if needed.
    pub fn set_query_active(
        &mut self,
        engine: &mut dyn PersistenceStorageEngine,
        spec: &QuerySpec,
        now_ms: u64,
    ) -> CoreResult<()> {
        self.set_query_active_flag(engine, spec, now_ms, true)
    }

    /// Mark a query inactive, stamping its last use.
    pub fn set_query_inactive(
        &mut self,
        engine: &mut dyn PersistenceStorageEngine,
        spec: &QuerySpec,
        now_ms: u64,
    ) -> CoreResult<()> {
        self.set_query_active_flag(engine, spec, now_ms, false)
    }

    fn set_query_active_flag(
        &mut self,
        engine: &mut dyn PersistenceStorageEngine,
        spec: &QuerySpec,
        now_ms: u64,
        active: bool,
    ) -> CoreResult<()> {
        let spec = Self::normalize(spec);
        let next_id = self.next_id;
        let mut allocated = false;
        let map = self.tracked.subtree_mut(&spec.path).value_mut_or_default();
        let query = map.entry(spec.params.clone()).or_insert_with(|| {
            allocated = true;
            TrackedQuery {
                id: next_id,
                spec: spec.clone(),
                last_use: now_ms,
                complete: false,
                active,
            }
        });
        query.active = active;
        query.last_use = now_ms;
        let record = query.clone();
        if allocated {
            self.next_id = next_id.next();
        }
        engine.save_tracked_query(&record)
    }

    /// Mark a query's cached data complete, if it is tracked.
    pub fn set_query_complete(
        &mut self,
        engine: &mut dyn PersistenceStorageEngine,
        spec: &QuerySpec,
    ) -> CoreResult<()> {
        let spec = Self::normalize(spec);
        let query = self
            .tracked
            .subtree_mut(&spec.path)
            .value_mut()
            .and_then(|map| map.get_mut(&spec.params));
        if let Some(query) = query {
            if !query.complete {
                query.complete = true;
                engine.save_tracked_query(query)?;
            }
        }
        Ok(())
    }

    /// Mark every tracked query at or below `path` complete.
    pub fn set_queries_complete(
        &mut self,
        engine: &mut dyn PersistenceStorageEngine,
        path: &Path,
    ) -> CoreResult<()> {
        let mut result = Ok(());
        self.tracked.for_each_value_mut(&mut |query_path, map| {
            if !path.contains(query_path) {
                return;
            }
            for query in map.values_mut() {
                if !query.complete && result.is_ok() {
                    query.complete = true;
                    result = engine.save_tracked_query(query);
                }
            }
        });
        result
    }

    /// Whether the cached data for a query is known complete.
    #[must_use]
    pub fn is_query_complete(&self, spec: &QuerySpec) -> bool {
        let spec = Self::normalize(spec);
        if self.included_in_default_complete_query(&spec.path) {
            return true;
        }
        if spec.loads_all_data() {
            // No complete default query covers this path.
            return false;
        }
        self.tracked
            .get(&spec.path)
            .and_then(|map| map.get(&spec.params))
            .is_some_and(|query| query.complete)
    }

    fn included_in_default_complete_query(&self, path: &Path) -> bool {
        self.tracked
            .find_root_most_matching(path, |map| {
                map.values()
                    .any(|query| query.spec.loads_all_data() && query.complete)
            })
            .is_some()
    }

    /// Whether an active query loading all data covers `path`.
    #[must_use]
    pub fn has_active_default_query(&self, path: &Path) -> bool {
        self.tracked
            .find_root_most_matching(path, |map| {
                map.values()
                    .any(|query| query.spec.loads_all_data() && query.active)
            })
            .is_some()
    }

    /// The number of queries an eviction pass may remove.
    #[must_use]
    pub fn count_of_prunable_queries(&self) -> u64 {
        let mut count = 0u64;
        self.tracked.for_each_value(&mut |_, map| {
            count += map.values().filter(|query| !query.active).count() as u64;
        });
        count
    }

    /// Evict the least-recently-used inactive queries per the policy and
    /// return the prune forest to apply to the cache.
    pub fn prune_old_queries(
        &mut self,
        engine: &mut dyn PersistenceStorageEngine,
        policy: &dyn CachePolicy,
    ) -> CoreResult<PruneForest> {
        let mut prunable: Vec<TrackedQuery> = Vec::new();
        let mut kept_paths: Vec<Path> = Vec::new();
        self.tracked.for_each_value(&mut |path, map| {
            for query in map.values() {
                if query.active {
                    kept_paths.push(path.clone());
                } else {
                    prunable.push(query.clone());
                }
            }
        });
        prunable.sort_by_key(|query| (query.last_use, query.id));

        let count_to_prune = Self::count_to_prune(policy, prunable.len() as u64) as usize;
        let mut forest = PruneForest::new();
        for query in &prunable[..count_to_prune] {
            forest.prune_path(&query.spec.path);
            self.remove_tracked_query(engine, &query.spec)?;
        }
        for query in &prunable[count_to_prune..] {
            forest.keep_path(&query.spec.path);
        }
        for path in kept_paths {
            forest.keep_path(&path);
        }
        Ok(forest)
    }

    fn count_to_prune(policy: &dyn CachePolicy, prunable_count: u64) -> u64 {
        let percent_to_keep = 1.0 - policy.percent_to_prune_at_once();
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let mut count_to_keep = (prunable_count as f64 * percent_to_keep).floor() as u64;
        count_to_keep = count_to_keep.min(policy.max_queries_to_keep());
        prunable_count - count_to_keep
    }

    /// The children of `path` whose cached data is known complete, from
    /// tracked keys of filtered queries here plus complete default queries
    /// one level down.
    pub fn known_complete_children(
        &self,
        engine: &mut dyn PersistenceStorageEngine,
        path: &Path,
    ) -> CoreResult<BTreeSet<String>> {
        debug_assert!(
            !self.is_query_complete(&QuerySpec::default_at(path.clone())),
            "complete locations answer directly from the cache"
        );
        let mut children = BTreeSet::new();
        if let Some(map) = self.tracked.get(path) {
            for query in map.values() {
                if !query.spec.loads_all_data() && query.complete {
                    children.extend(engine.load_tracked_query_keys(query.id)?);
                }
            }
        }
        if let Some(subtree) = self.tracked.subtree(path) {
            for (key, child) in subtree.children() {
                let child_complete = child.value().is_some_and(|map| {
                    map.values()
                        .any(|query| query.spec.loads_all_data() && query.complete)
                });
                if child_complete {
                    children.insert(key.clone());
                }
            }
        }
        Ok(children)
    }

    /// Make sure a complete tracked query records that `path`'s data is
    /// fully cached (used for keep-synced locations).
    pub fn ensure_complete_tracked_query(
        &mut self,
        engine: &mut dyn PersistenceStorageEngine,
        path: &Path,
        now_ms: u64,
    ) -> CoreResult<()> {
        if self.included_in_default_complete_query(path) {
            return Ok(());
        }
        let spec = QuerySpec::default_at(path.clone());
        let next_id = self.next_id;
        let map = self.tracked.subtree_mut(&spec.path).value_mut_or_default();
        match map.get_mut(&spec.params) {
            Some(query) => {
                query.complete = true;
                engine.save_tracked_query(query)
            }
            None => {
                let query = TrackedQuery {
                    id: next_id,
                    spec: spec.clone(),
                    last_use: now_ms,
                    complete: true,
                    active: false,
                };
                map.insert(spec.params.clone(), query.clone());
                self.next_id = next_id.next();
                engine.save_tracked_query(&query)
            }
        }
    }
}
