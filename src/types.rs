//! Core types for the event store.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Default number of events returned by a query.
pub const DEFAULT_QUERY_LIMIT: usize = 50;

/// Upper bound on the number of events a single query may return.
pub const MAX_QUERY_LIMIT: usize = 100;

/// Position of an event within its scope.
///
/// Sequences start at 1. `Sequence(0)` means "no event" (an empty scope,
/// or "live only" when used as a subscription starting point).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Sequence(pub u64);

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Sequence {
    pub fn next(self) -> Self {
        Sequence(self.0 + 1)
    }

    pub fn prev(self) -> Option<Self> {
        if self.0 > 0 {
            Some(Sequence(self.0 - 1))
        } else {
            None
        }
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Payload encoding format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PayloadEncoding {
    #[default]
    Json,
    MessagePack,
    Raw,
}

/// A single event in the log. Immutable once stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Globally unique identifier.
    pub event_id: String,

    /// Dot-namespaced type, e.g. `"message.sent"`.
    pub event_type: String,

    /// Namespace used for sequencing and filtering, e.g. `"channel:42"`.
    pub scope: String,

    /// Who caused the event.
    pub actor_id: String,

    /// When the event was created.
    pub timestamp: Timestamp,

    /// Domain-owned payload bytes.
    pub payload: Vec<u8>,

    /// Payload encoding.
    pub encoding: PayloadEncoding,

    /// Secondary attributes used for subscription filtering.
    pub metadata: HashMap<String, String>,

    /// Position within `scope` (assigned by store).
    pub sequence: Sequence,
}

impl Event {
    /// Decode a JSON payload.
    pub fn payload_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

/// Input for publishing a new event (before sequence assigned).
#[derive(Clone, Debug, Default)]
pub struct EventInput {
    /// Generated by the store when `None`.
    pub event_id: Option<String>,
    pub event_type: String,
    pub scope: String,
    pub actor_id: String,
    /// Assigned by the store when `None`.
    pub timestamp: Option<Timestamp>,
    pub payload: Vec<u8>,
    pub encoding: PayloadEncoding,
    pub metadata: HashMap<String, String>,
}

impl EventInput {
    /// Create an input with an empty payload.
    pub fn new(event_type: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            scope: scope.into(),
            ..Default::default()
        }
    }

    /// Create an input with a JSON payload.
    pub fn json(
        event_type: impl Into<String>,
        scope: impl Into<String>,
        payload: &impl Serialize,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            payload: serde_json::to_vec(payload)?,
            encoding: PayloadEncoding::Json,
            ..Self::new(event_type, scope)
        })
    }

    /// Create an input with raw bytes.
    pub fn raw(event_type: impl Into<String>, scope: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            payload,
            encoding: PayloadEncoding::Raw,
            ..Self::new(event_type, scope)
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = actor_id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Add a single metadata pair.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Fill in defaults and attach the sequence, producing a storable event.
    pub(crate) fn into_event(self, sequence: Sequence) -> Event {
        Event {
            event_id: self.event_id.unwrap_or_else(generate_event_id),
            event_type: self.event_type,
            scope: self.scope,
            actor_id: self.actor_id,
            timestamp: self.timestamp.unwrap_or_else(Timestamp::now),
            payload: self.payload,
            encoding: self.encoding,
            metadata: self.metadata,
            sequence,
        }
    }
}

static EVENT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a process-unique event id (`event_<micros>_<counter>`).
pub fn generate_event_id() -> String {
    let n = EVENT_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("event_{}_{}", Timestamp::now().0, n)
}

/// Result of a successful publish.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishReceipt {
    pub event_id: String,
    pub sequence: Sequence,
}

/// Range query over a single scope.
#[derive(Clone, Debug, Default)]
pub struct EventQuery {
    pub scope: String,
    /// Empty means all types.
    pub event_types: Vec<String>,
    /// Inclusive lower bound.
    pub from_sequence: Sequence,
    /// Inclusive upper bound; `Sequence(0)` means the latest stored sequence.
    pub to_sequence: Sequence,
    /// `0` selects [`DEFAULT_QUERY_LIMIT`]; larger values are capped at [`MAX_QUERY_LIMIT`].
    pub limit: usize,
}

impl EventQuery {
    /// Query every event in a scope, oldest first.
    pub fn scope(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            ..Default::default()
        }
    }

    pub fn event_types(mut self, types: Vec<String>) -> Self {
        self.event_types = types;
        self
    }

    pub fn from(mut self, sequence: Sequence) -> Self {
        self.from_sequence = sequence;
        self
    }

    pub fn to(mut self, sequence: Sequence) -> Self {
        self.to_sequence = sequence;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// The limit actually applied.
    pub fn effective_limit(&self) -> usize {
        match self.limit {
            0 => DEFAULT_QUERY_LIMIT,
            n => n.min(MAX_QUERY_LIMIT),
        }
    }
}

/// One page of a [`EventQuery`] result.
#[derive(Clone, Debug, Default)]
pub struct EventPage {
    pub events: Vec<Event>,
    /// True when the page is full; more events may follow.
    pub has_more: bool,
    /// Where the next page starts, or `Sequence(0)` when `has_more` is false.
    pub next_sequence: Sequence,
}

/// Store statistics.
#[derive(Clone, Debug, Default)]
pub struct StoreStats {
    pub event_count: u64,
    pub scope_count: u64,
    pub subscription_count: u64,
    pub log_size_bytes: u64,
}
