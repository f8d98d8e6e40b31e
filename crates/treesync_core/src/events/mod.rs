//! User-visible events raised by views.

mod change;
mod generator;
mod registration;

pub use change::{Change, ChildChangeAccumulator};
pub use generator::generate_events_for_changes;
pub use registration::{
    ChildEventRegistration, EventRegistration, KeepSyncedRegistration, ValueEventRegistration,
};

use serde::{Deserialize, Serialize};
use treesync_codec::{Path, Value};

use crate::error::ListenError;
use crate::types::ListenerId;

/// The kinds of data events, in the order views raise them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A child left the view.
    ChildRemoved,
    /// A child entered the view.
    ChildAdded,
    /// A child changed its position in query order.
    ChildMoved,
    /// A child's value changed.
    ChildChanged,
    /// The whole value of the view changed.
    Value,
}

impl EventType {
    /// All kinds, in delivery order.
    pub const ALL: [EventType; 5] = [
        Self::ChildRemoved,
        Self::ChildAdded,
        Self::ChildMoved,
        Self::ChildChanged,
        Self::Value,
    ];

    /// Whether this is a per-child event.
    #[must_use]
    pub const fn is_child_event(self) -> bool {
        !matches!(self, Self::Value)
    }
}

/// A snapshot delivered to one listener.
#[derive(Debug, Clone, PartialEq)]
pub struct DataEvent {
    /// The kind of event.
    pub kind: EventType,
    /// The listener the event targets.
    pub registration: ListenerId,
    /// The path of the query that raised the event.
    pub path: Path,
    /// The child the event concerns; `None` for value events.
    pub child_key: Option<String>,
    /// The data at the event location.
    pub snapshot: Value,
    /// The key ordered immediately before this child, if any.
    pub prev_name: Option<String>,
}

/// A cancellation delivered to one listener.
#[derive(Debug, Clone, PartialEq)]
pub struct CancelEvent {
    /// The listener the cancellation targets.
    pub registration: ListenerId,
    /// The path of the cancelled query.
    pub path: Path,
    /// Why the listen was cancelled.
    pub error: ListenError,
}

/// An event raised by a view.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A data snapshot.
    Data(DataEvent),
    /// A cancellation.
    Cancel(CancelEvent),
}

impl Event {
    /// The listener this event targets.
    #[must_use]
    pub const fn registration(&self) -> ListenerId {
        match self {
            Self::Data(e) => e.registration,
            Self::Cancel(e) => e.registration,
        }
    }

    /// The query path this event belongs to.
    #[must_use]
    pub const fn path(&self) -> &Path {
        match self {
            Self::Data(e) => &e.path,
            Self::Cancel(e) => &e.path,
        }
    }
}
