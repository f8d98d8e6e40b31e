//! A scripted scenario runner for the sync tree.
//!
//! Scenarios are JSON documents: a list of steps, each an action against the
//! tree plus the events the action must raise. The same script can run at the
//! root or re-based under a prefix, which catches path-relativity bugs.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value as JsonValue;
use treesync_codec::Path;
use treesync_core::events::{
    ChildEventRegistration, Event, EventRegistration, EventType, ValueEventRegistration,
};
use treesync_core::query::{QueryParams, QuerySpec};
use treesync_core::types::{AckStatus, ListenerId, OverwriteVisibility, PersistMode, Tag, WriteId};
use treesync_core::writes::CompoundWrite;

use crate::fixtures::{json_from_value, value_from_json, TestTree};

/// A scripted scenario.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    /// The scenario name, used in failure messages.
    pub name: String,
    /// What the scenario covers.
    #[serde(default)]
    pub description: String,
    /// The steps, run in order.
    pub steps: Vec<Step>,
}

impl Script {
    /// Parse a script from JSON text.
    ///
    /// # Panics
    ///
    /// Panics if the text is not a valid script.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_else(|e| panic!("invalid script: {e}"))
    }
}

/// One scripted action and the events it must raise.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Step {
    /// Attach a listener.
    #[serde(rename_all = "camelCase")]
    Listen {
        /// Query path, relative to the script prefix.
        path: String,
        /// Query parameters; absent means the default query.
        #[serde(default)]
        params: Option<ParamsSpec>,
        /// Handle later steps use to refer to this listener.
        callback_id: u64,
        /// Event kinds the listener observes. Defaults to `["value"]`.
        #[serde(default)]
        events: Vec<EventType>,
        /// The events this step must raise.
        #[serde(default)]
        expect: Vec<ExpectedEvent>,
    },
    /// Detach a listener attached earlier.
    #[serde(rename_all = "camelCase")]
    Unlisten {
        /// The listener to detach.
        callback_id: u64,
        /// The events this step must raise.
        #[serde(default)]
        expect: Vec<ExpectedEvent>,
    },
    /// A local overwrite.
    #[serde(rename_all = "camelCase")]
    Set {
        /// Write path, relative to the script prefix.
        path: String,
        /// The value to write.
        data: JsonValue,
        /// The id the ack step will use.
        write_id: i64,
        /// The events this step must raise.
        #[serde(default)]
        expect: Vec<ExpectedEvent>,
    },
    /// A local merge.
    #[serde(rename_all = "camelCase")]
    Update {
        /// Merge path, relative to the script prefix.
        path: String,
        /// Children to merge; must be an object.
        data: JsonValue,
        /// The id the ack step will use.
        write_id: i64,
        /// The events this step must raise.
        #[serde(default)]
        expect: Vec<ExpectedEvent>,
    },
    /// The server acknowledged a local write.
    #[serde(rename_all = "camelCase")]
    Ack {
        /// The write being acknowledged.
        write_id: i64,
        /// Whether the server rejected the write.
        #[serde(default)]
        revert: bool,
        /// The events this step must raise.
        #[serde(default)]
        expect: Vec<ExpectedEvent>,
    },
    /// A server overwrite.
    #[serde(rename_all = "camelCase")]
    ServerUpdate {
        /// Update path, relative to the script prefix.
        path: String,
        /// The new value.
        data: JsonValue,
        /// Route through the tag of this listener's query instead of the
        /// default listen.
        #[serde(default)]
        query: Option<u64>,
        /// The events this step must raise.
        #[serde(default)]
        expect: Vec<ExpectedEvent>,
    },
    /// A server merge.
    #[serde(rename_all = "camelCase")]
    ServerMerge {
        /// Merge path, relative to the script prefix.
        path: String,
        /// Children to merge; must be an object.
        data: JsonValue,
        /// Route through the tag of this listener's query.
        #[serde(default)]
        query: Option<u64>,
        /// The events this step must raise.
        #[serde(default)]
        expect: Vec<ExpectedEvent>,
    },
    /// The server finished the initial data for a listen.
    #[serde(rename_all = "camelCase")]
    ListenComplete {
        /// Listen path, relative to the script prefix.
        path: String,
        /// Route through the tag of this listener's query.
        #[serde(default)]
        query: Option<u64>,
        /// The events this step must raise.
        #[serde(default)]
        expect: Vec<ExpectedEvent>,
    },
}

/// Query parameters as scripts spell them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ParamsSpec {
    /// `".key"`, `".value"`, `".priority"`, or a child path.
    #[serde(default)]
    pub order_by: Option<String>,
    /// Range start.
    #[serde(default)]
    pub start_at: Option<JsonValue>,
    /// Range end.
    #[serde(default)]
    pub end_at: Option<JsonValue>,
    /// Exact-match range.
    #[serde(default)]
    pub equal_to: Option<JsonValue>,
    /// Window anchored at the range start.
    #[serde(default)]
    pub limit_to_first: Option<usize>,
    /// Window anchored at the range end.
    #[serde(default)]
    pub limit_to_last: Option<usize>,
}

impl ParamsSpec {
    /// The query parameters this spec describes.
    #[must_use]
    pub fn to_params(&self) -> QueryParams {
        let mut params = match self.order_by.as_deref() {
            None | Some(".priority") => QueryParams::default(),
            Some(".key") => QueryParams::default().order_by_key(),
            Some(".value") => QueryParams::default().order_by_value(),
            Some(child) => QueryParams::default().order_by_child(child),
        };
        if let Some(start) = &self.start_at {
            params = params.start_at(value_from_json(start));
        }
        if let Some(end) = &self.end_at {
            params = params.end_at(value_from_json(end));
        }
        if let Some(exact) = &self.equal_to {
            params = params.equal_to(value_from_json(exact));
        }
        if let Some(n) = self.limit_to_first {
            params = params.limit_to_first(n);
        }
        if let Some(n) = self.limit_to_last {
            params = params.limit_to_last(n);
        }
        params
    }
}

/// An event a step expects.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedEvent {
    /// The event kind.
    pub kind: EventType,
    /// The query path, relative to the script prefix.
    pub path: String,
    /// The child key, for child events.
    #[serde(default)]
    pub name: Option<String>,
    /// The snapshot data.
    pub data: JsonValue,
}

/// Runs scripts against a fresh sync tree.
#[derive(Debug)]
pub struct ScriptRunner {
    harness: TestTree,
    prefix: Path,
    listeners: BTreeMap<u64, (QuerySpec, ListenerId)>,
}

impl ScriptRunner {
    /// A runner over an in-memory tree, rooted at the tree root.
    #[must_use]
    pub fn new() -> Self {
        Self::with_prefix(Path::root())
    }

    /// A runner that re-bases every script path under `prefix`.
    #[must_use]
    pub fn with_prefix(prefix: Path) -> Self {
        Self {
            harness: TestTree::in_memory(),
            prefix,
            listeners: BTreeMap::new(),
        }
    }

    /// The harness under the runner, for extra assertions.
    #[must_use]
    pub fn harness(&self) -> &TestTree {
        &self.harness
    }

    /// Run a whole script, panicking on the first mismatch.
    pub fn run(&mut self, script: &Script) {
        for (index, step) in script.steps.iter().enumerate() {
            let context = format!("{} step {index}", script.name);
            let events = self.execute(&context, step);
            self.check(&context, &events, expectations(step));
        }
    }

    /// Run a whole script without checking expectations, returning the
    /// events each step raised.
    pub fn execute_script(&mut self, script: &Script) -> Vec<Vec<Event>> {
        script
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                let context = format!("{} step {index}", script.name);
                self.execute(&context, step)
            })
            .collect()
    }

    fn execute(&mut self, context: &str, step: &Step) -> Vec<Event> {
        match step {
            Step::Listen {
                path,
                params,
                callback_id,
                events,
                ..
            } => {
                let params = params
                    .as_ref()
                    .map_or_else(QueryParams::default, ParamsSpec::to_params);
                let spec = QuerySpec::new(self.rebase(path), params);
                let registration = registration_for(events);
                let id = registration.listener_id();
                let raised = self
                    .harness
                    .tree
                    .add_event_registration(&spec, registration)
                    .unwrap_or_else(|e| panic!("{context}: listen failed: {e}"));
                self.listeners.insert(*callback_id, (spec, id));
                raised
            }
            Step::Unlisten { callback_id, .. } => {
                let (spec, id) = self
                    .listeners
                    .remove(callback_id)
                    .unwrap_or_else(|| panic!("{context}: unknown callback {callback_id}"));
                self.harness
                    .tree
                    .remove_event_registration(&spec, Some(id), None)
                    .unwrap_or_else(|e| panic!("{context}: unlisten failed: {e}"))
            }
            Step::Set {
                path,
                data,
                write_id,
                ..
            } => self
                .harness
                .tree
                .apply_user_overwrite(
                    self.rebase(path),
                    value_from_json(data),
                    WriteId::new(*write_id),
                    OverwriteVisibility::Visible,
                    PersistMode::Persist,
                )
                .unwrap_or_else(|e| panic!("{context}: set failed: {e}")),
            Step::Update {
                path,
                data,
                write_id,
                ..
            } => {
                self
                    .harness
                    .tree
                    .apply_user_merge(
                        self.rebase(path),
                        compound_from_json(context, data),
                        WriteId::new(*write_id),
                        PersistMode::Persist,
                    )
                    .unwrap_or_else(|e| panic!("{context}: update failed: {e}"))
            }
            Step::Ack {
                write_id,
                revert,
                ..
            } => {
                let status = if *revert {
                    AckStatus::Revert
                } else {
                    AckStatus::Confirm
                };
                self
                    .harness
                    .tree
                    .ack_user_write(WriteId::new(*write_id), status, PersistMode::Persist)
                    .unwrap_or_else(|e| panic!("{context}: ack failed: {e}"))
            }
            Step::ServerUpdate {
                path,
                data,
                query,
                ..
            } => {
                let path = self.rebase(path);
                let value = value_from_json(data);
                match self.tag_for(context, *query) {
                    Some(tag) => self
                        .harness
                        .tree
                        .apply_tagged_query_overwrite(tag, path, value),
                    None => self.harness.tree.apply_server_overwrite(path, value),
                }
                .unwrap_or_else(|e| panic!("{context}: server update failed: {e}"))
            }
            Step::ServerMerge {
                path,
                data,
                query,
                ..
            } => {
                let path = self.rebase(path);
                let children = compound_from_json(context, data);
                match self.tag_for(context, *query) {
                    Some(tag) => self
                        .harness
                        .tree
                        .apply_tagged_query_merge(tag, path, children),
                    None => self.harness.tree.apply_server_merge(path, children),
                }
                .unwrap_or_else(|e| panic!("{context}: server merge failed: {e}"))
            }
            Step::ListenComplete {
                path,
                query,
                ..
            } => {
                match self.tag_for(context, *query) {
                    Some(tag) => self.harness.tree.apply_tagged_listen_complete(tag),
                    None => self.harness.tree.apply_listen_complete(self.rebase(path)),
                }
                .unwrap_or_else(|e| panic!("{context}: listen complete failed: {e}"))
            }
        }
    }

    fn rebase(&self, path: &str) -> Path {
        self.prefix.join(&Path::parse(path))
    }

    fn tag_for(&self, context: &str, query: Option<u64>) -> Option<Tag> {
        let callback_id = query?;
        let (spec, _) = self
            .listeners
            .get(&callback_id)
            .unwrap_or_else(|| panic!("{context}: unknown callback {callback_id}"));
        let tag = self
            .harness
            .tree
            .tag_for_query(spec)
            .unwrap_or_else(|| panic!("{context}: callback {callback_id} has no tag"));
        Some(tag)
    }

    fn check(&self, context: &str, actual: &[Event], expect: &[ExpectedEvent]) {
        let described: Vec<String> = actual.iter().map(describe_event).collect();
        assert_eq!(
            actual.len(),
            expect.len(),
            "{context}: expected {} events, got {}: {described:#?}",
            expect.len(),
            actual.len()
        );
        for (i, (event, wanted)) in actual.iter().zip(expect).enumerate() {
            let Event::Data(data) = event else {
                panic!("{context}: event {i} is a cancellation: {described:#?}");
            };
            assert_eq!(
                data.kind, wanted.kind,
                "{context}: event {i} kind mismatch: {described:#?}"
            );
            assert_eq!(
                data.path,
                self.rebase(&wanted.path),
                "{context}: event {i} path mismatch: {described:#?}"
            );
            assert_eq!(
                data.child_key, wanted.name,
                "{context}: event {i} child mismatch: {described:#?}"
            );
            assert_eq!(
                data.snapshot,
                value_from_json(&wanted.data),
                "{context}: event {i} snapshot mismatch: {described:#?}"
            );
        }
    }
}

impl Default for ScriptRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn registration_for(kinds: &[EventType]) -> Arc<dyn EventRegistration> {
    if matches!(kinds, [] | [EventType::Value]) {
        return Arc::new(ValueEventRegistration::new());
    }
    assert!(
        kinds.iter().all(|k| k.is_child_event()),
        "a listener observes value or child events, not both"
    );
    Arc::new(ChildEventRegistration::new(kinds.to_vec()))
}

fn compound_from_json(context: &str, data: &JsonValue) -> CompoundWrite {
    let JsonValue::Object(entries) = data else {
        panic!("{context}: merge data must be an object");
    };
    CompoundWrite::from_children(
        entries
            .iter()
            .map(|(key, child)| (key.clone(), value_from_json(child))),
    )
}

fn expectations(step: &Step) -> &[ExpectedEvent] {
    match step {
        Step::Listen { expect, .. }
        | Step::Unlisten { expect, .. }
        | Step::Set { expect, .. }
        | Step::Update { expect, .. }
        | Step::Ack { expect, .. }
        | Step::ServerUpdate { expect, .. }
        | Step::ServerMerge { expect, .. }
        | Step::ListenComplete { expect, .. } => expect,
    }
}

/// A one-line human-readable rendering of an event.
#[must_use]
pub fn describe_event(event: &Event) -> String {
    match event {
        Event::Data(d) => format!(
            "{:?} at {:?} child {:?}: {}",
            d.kind,
            d.path,
            d.child_key,
            json_from_value(&d.snapshot)
        ),
        Event::Cancel(c) => format!("cancel at {:?}: {}", c.path, c.error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_spec_parses_orderings() {
        let spec: ParamsSpec =
            serde_json::from_str(r#"{"orderBy": ".key", "limitToFirst": 2}"#).unwrap();
        let params = spec.to_params();
        assert_eq!(params.limit(), Some(2));
        assert!(!params.loads_all_data());
    }

    #[test]
    fn scripts_parse() {
        let script = Script::parse(
            r#"{
                "name": "smoke",
                "steps": [
                    {"kind": "listen", "path": "a", "callbackId": 1},
                    {"kind": "serverUpdate", "path": "a", "data": 1,
                     "expect": [{"kind": "value", "path": "a", "data": 1}]}
                ]
            }"#,
        );
        assert_eq!(script.steps.len(), 2);
    }

    #[test]
    fn runner_checks_events() {
        let script = Script::parse(
            r#"{
                "name": "smoke",
                "steps": [
                    {"kind": "listen", "path": "a", "callbackId": 1},
                    {"kind": "serverUpdate", "path": "a", "data": {"x": 1},
                     "expect": [{"kind": "value", "path": "a", "data": {"x": 1}}]}
                ]
            }"#,
        );
        ScriptRunner::new().run(&script);
        ScriptRunner::with_prefix(Path::parse("deep/prefix")).run(&script);
    }
}
