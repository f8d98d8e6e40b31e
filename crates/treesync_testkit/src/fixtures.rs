//! Sync tree harnesses and test data helpers.
//!
//! Provides a [`TestTree`] wrapping a [`SyncTree`] with a recording listen
//! provider, a shareable in-memory storage engine for restart scenarios, a
//! cache policy sized for tests, and JSON conversions for writing test values
//! inline.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use treesync_codec::{Path, Value};
use treesync_core::events::{Event, EventRegistration, EventType, ValueEventRegistration};
use treesync_core::persistence::{
    CachePolicy, DefaultPersistenceManager, LruCachePolicy, MemoryStorageEngine,
    NoopPersistenceManager, PersistenceStorageEngine, PruneForest, TrackedQuery,
};
use treesync_core::query::QuerySpec;
use treesync_core::types::{ListenerId, QueryId, Tag, WriteId};
use treesync_core::view::View;
use treesync_core::writes::{CompoundWrite, UserWriteRecord};
use treesync_core::{CoreResult, ListenProvider, SyncTree};

/// A shared record of the wire listens a tree started or stopped.
pub type ListenLog = Arc<Mutex<Vec<(QuerySpec, Option<Tag>)>>>;

/// A listen provider that records every start and stop instead of talking to
/// a server.
#[derive(Debug, Default)]
pub struct RecordingListenProvider {
    /// Queries the tree asked to start streaming, in order.
    pub started: ListenLog,
    /// Queries the tree asked to stop streaming, in order.
    pub stopped: ListenLog,
}

impl RecordingListenProvider {
    /// A provider with fresh, empty logs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles to the logs, usable after the provider moves into a tree.
    #[must_use]
    pub fn logs(&self) -> (ListenLog, ListenLog) {
        (Arc::clone(&self.started), Arc::clone(&self.stopped))
    }
}

impl ListenProvider for RecordingListenProvider {
    fn start_listening(&mut self, spec: &QuerySpec, tag: Option<Tag>, _view: &View) {
        self.started.lock().push((spec.clone(), tag));
    }

    fn stop_listening(&mut self, spec: &QuerySpec, tag: Option<Tag>) {
        self.stopped.lock().push((spec.clone(), tag));
    }
}

/// An in-memory storage engine that can outlive the tree using it, for
/// restart-and-replay scenarios. Clones share the same state.
#[derive(Debug, Clone)]
pub struct SharedStorageEngine {
    inner: Arc<Mutex<MemoryStorageEngine>>,
}

impl SharedStorageEngine {
    /// A fresh, empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryStorageEngine::new())),
        }
    }
}

impl Default for SharedStorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistenceStorageEngine for SharedStorageEngine {
    fn save_user_overwrite(
        &mut self,
        path: &Path,
        value: &Value,
        write_id: WriteId,
    ) -> CoreResult<()> {
        self.inner.lock().save_user_overwrite(path, value, write_id)
    }

    fn save_user_merge(
        &mut self,
        path: &Path,
        children: &CompoundWrite,
        write_id: WriteId,
    ) -> CoreResult<()> {
        self.inner.lock().save_user_merge(path, children, write_id)
    }

    fn remove_user_write(&mut self, write_id: WriteId) -> CoreResult<()> {
        self.inner.lock().remove_user_write(write_id)
    }

    fn remove_all_user_writes(&mut self) -> CoreResult<()> {
        self.inner.lock().remove_all_user_writes()
    }

    fn load_user_writes(&mut self) -> CoreResult<Vec<UserWriteRecord>> {
        self.inner.lock().load_user_writes()
    }

    fn server_cache(&mut self, path: &Path) -> CoreResult<Value> {
        self.inner.lock().server_cache(path)
    }

    fn overwrite_server_cache(&mut self, path: &Path, value: &Value) -> CoreResult<()> {
        self.inner.lock().overwrite_server_cache(path, value)
    }

    fn merge_into_server_cache(
        &mut self,
        path: &Path,
        children: &CompoundWrite,
    ) -> CoreResult<()> {
        self.inner.lock().merge_into_server_cache(path, children)
    }

    fn server_cache_estimated_size(&mut self) -> CoreResult<u64> {
        self.inner.lock().server_cache_estimated_size()
    }

    fn save_tracked_query(&mut self, query: &TrackedQuery) -> CoreResult<()> {
        self.inner.lock().save_tracked_query(query)
    }

    fn delete_tracked_query(&mut self, id: QueryId) -> CoreResult<()> {
        self.inner.lock().delete_tracked_query(id)
    }

    fn load_tracked_queries(&mut self) -> CoreResult<Vec<TrackedQuery>> {
        self.inner.lock().load_tracked_queries()
    }

    fn reset_previously_active_tracked_queries(&mut self, last_use: u64) -> CoreResult<()> {
        self.inner
            .lock()
            .reset_previously_active_tracked_queries(last_use)
    }

    fn save_tracked_query_keys(&mut self, id: QueryId, keys: &BTreeSet<String>) -> CoreResult<()> {
        self.inner.lock().save_tracked_query_keys(id, keys)
    }

    fn update_tracked_query_keys(
        &mut self,
        id: QueryId,
        added: &BTreeSet<String>,
        removed: &BTreeSet<String>,
    ) -> CoreResult<()> {
        self.inner.lock().update_tracked_query_keys(id, added, removed)
    }

    fn load_tracked_query_keys(&mut self, id: QueryId) -> CoreResult<BTreeSet<String>> {
        self.inner.lock().load_tracked_query_keys(id)
    }

    fn prune_cache(&mut self, root: &Path, forest: &PruneForest) -> CoreResult<()> {
        self.inner.lock().prune_cache(root, forest)
    }

    fn begin_transaction(&mut self) -> CoreResult<()> {
        self.inner.lock().begin_transaction()
    }

    fn end_transaction(&mut self) -> CoreResult<()> {
        self.inner.lock().end_transaction()
    }

    fn set_transaction_successful(&mut self) {
        self.inner.lock().set_transaction_successful();
    }
}

/// A cache policy with tiny thresholds, so prune passes happen at test scale.
#[derive(Debug, Clone, Copy)]
pub struct TestCachePolicy {
    max_size_bytes: u64,
}

impl TestCachePolicy {
    /// A policy pruning once the cache exceeds `max_size_bytes`.
    #[must_use]
    pub const fn new(max_size_bytes: u64) -> Self {
        Self { max_size_bytes }
    }
}

impl Default for TestCachePolicy {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl CachePolicy for TestCachePolicy {
    fn should_prune(&self, current_size_bytes: u64, prunable_queries: u64) -> bool {
        current_size_bytes > self.max_size_bytes || prunable_queries > self.max_queries_to_keep()
    }

    // Check after every server update so tests never wait on a counter.
    fn should_check_cache_size(&self, _server_updates_since_last_check: u64) -> bool {
        true
    }

    fn percent_to_prune_at_once(&self) -> f64 {
        0.2
    }

    fn max_queries_to_keep(&self) -> u64 {
        2
    }
}

/// A sync tree wired to a recording listen provider.
#[derive(Debug)]
pub struct TestTree {
    /// The tree under test.
    pub tree: SyncTree,
    /// Wire listens the tree started.
    pub started: ListenLog,
    /// Wire listens the tree stopped.
    pub stopped: ListenLog,
}

impl TestTree {
    /// A tree with no durable persistence.
    #[must_use]
    pub fn in_memory() -> Self {
        let provider = RecordingListenProvider::new();
        let (started, stopped) = provider.logs();
        let tree = SyncTree::new(
            Box::new(provider),
            Box::new(NoopPersistenceManager::new()),
        );
        Self {
            tree,
            started,
            stopped,
        }
    }

    /// A tree persisting to the given shared engine. Reuse the engine with a
    /// second call to simulate a restart.
    pub fn persistent(engine: SharedStorageEngine) -> CoreResult<Self> {
        Self::persistent_with_policy(engine, Box::new(LruCachePolicy::default()))
    }

    /// A persistent tree with a custom cache policy, for prune scenarios.
    pub fn persistent_with_policy(
        engine: SharedStorageEngine,
        policy: Box<dyn CachePolicy>,
    ) -> CoreResult<Self> {
        let provider = RecordingListenProvider::new();
        let (started, stopped) = provider.logs();
        let manager = DefaultPersistenceManager::new(Box::new(engine), policy)?;
        let tree = SyncTree::new(Box::new(provider), Box::new(manager));
        Ok(Self {
            tree,
            started,
            stopped,
        })
    }

    /// Attach a value listener to the default query at `path`.
    ///
    /// Returns the listener id and the catch-up events.
    pub fn listen_default(&mut self, path: &str) -> CoreResult<(ListenerId, Vec<Event>)> {
        self.listen(&QuerySpec::default_at(Path::parse(path)))
    }

    /// Attach a value listener to `spec`.
    ///
    /// Returns the listener id and the catch-up events.
    pub fn listen(&mut self, spec: &QuerySpec) -> CoreResult<(ListenerId, Vec<Event>)> {
        let registration = ValueEventRegistration::new();
        let id = registration.listener_id();
        let events = self
            .tree
            .add_event_registration(spec, Arc::new(registration))?;
        Ok((id, events))
    }
}

/// The value events in `events`, in delivery order.
#[must_use]
pub fn value_events(events: &[Event]) -> Vec<&Event> {
    events
        .iter()
        .filter(|e| matches!(e, Event::Data(d) if d.kind == EventType::Value))
        .collect()
}

/// The snapshot of the single value event in `events`.
///
/// # Panics
///
/// Panics unless `events` holds exactly one value event.
#[must_use]
pub fn sole_value_snapshot(events: &[Event]) -> Value {
    let values = value_events(events);
    assert_eq!(values.len(), 1, "expected exactly one value event");
    match values[0] {
        Event::Data(d) => d.snapshot.clone(),
        Event::Cancel(_) => unreachable!(),
    }
}

/// Parse inline JSON into a tree value.
///
/// # Panics
///
/// Panics if `raw` is not valid JSON.
#[must_use]
pub fn val(raw: &str) -> Value {
    let json: JsonValue = serde_json::from_str(raw).unwrap_or_else(|e| {
        panic!("invalid test JSON {raw:?}: {e}");
    });
    value_from_json(&json)
}

/// Convert a JSON value to a tree value.
///
/// Arrays become maps keyed by index, matching the wire representation.
/// Explicit nulls inside objects are dropped; an object left empty collapses
/// to `Null`.
#[must_use]
pub fn value_from_json(json: &JsonValue) -> Value {
    match json {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Number(n) => n.as_i64().map_or_else(
            || Value::Float(n.as_f64().unwrap_or(0.0)),
            Value::Int,
        ),
        JsonValue::String(s) => Value::Str(s.clone()),
        JsonValue::Array(items) => {
            let children = items
                .iter()
                .enumerate()
                .filter(|(_, item)| !item.is_null())
                .map(|(i, item)| (i.to_string(), value_from_json(item)));
            collapse_empty(children.collect())
        }
        JsonValue::Object(entries) => {
            let children = entries
                .iter()
                .filter(|(_, child)| !child.is_null())
                .map(|(key, child)| (key.clone(), value_from_json(child)));
            collapse_empty(children.collect())
        }
    }
}

fn collapse_empty(children: std::collections::BTreeMap<String, Value>) -> Value {
    if children.is_empty() {
        Value::Null
    } else {
        Value::Map(children)
    }
}

/// Convert a tree value back to JSON, for diff-friendly assertions.
#[must_use]
pub fn json_from_value(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Int(i) => JsonValue::from(*i),
        Value::Float(f) => JsonValue::from(*f),
        Value::Str(s) => JsonValue::String(s.clone()),
        Value::Map(children) => JsonValue::Object(
            children
                .iter()
                .map(|(key, child)| (key.clone(), json_from_value(child)))
                .collect(),
        ),
    }
}
