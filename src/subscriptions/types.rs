//! Subscription types for live event delivery.

use crate::types::{Event, Sequence};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before dropping subscriber.
    /// Default: 1000
    pub buffer_size: usize,

    /// Starting sequence for catch-up (`Sequence(0)` = live only).
    ///
    /// Replay covers every scope in `filter.scopes`; with no scopes there
    /// is no bounded history and nothing is replayed.
    pub from_sequence: Sequence,

    /// Filter criteria.
    pub filter: SubscriptionFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            from_sequence: Sequence(0),
            filter: SubscriptionFilter::default(),
        }
    }
}

impl SubscriptionConfig {
    /// Live-only subscription with the given filter.
    pub fn live(filter: SubscriptionFilter) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    /// Subscription replaying from `from_sequence` before going live.
    pub fn from_sequence(filter: SubscriptionFilter, from_sequence: Sequence) -> Self {
        Self {
            filter,
            from_sequence,
            ..Default::default()
        }
    }
}

/// Filter criteria for subscriptions.
///
/// Empty sets match everything. All three criteria must pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriptionFilter {
    /// Accepted event types.
    pub event_types: HashSet<String>,

    /// Accepted scopes.
    pub scopes: HashSet<String>,

    /// Required metadata pairs, all must be present with equal values.
    pub metadata: HashMap<String, String>,
}

impl SubscriptionFilter {
    /// Subscribe to everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Subscribe to specific event types.
    pub fn event_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            event_types: types.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Subscribe to specific scopes.
    pub fn scopes<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scopes: scopes.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types.insert(event_type.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.insert(scope.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Check if an event passes this filter.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type) {
            return false;
        }

        if !self.scopes.is_empty() && !self.scopes.contains(&event.scope) {
            return false;
        }

        self.metadata
            .iter()
            .all(|(key, value)| event.metadata.get(key) == Some(value))
    }
}

/// Messages carried on a subscription's channel.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    /// A matching event.
    Event(Arc<Event>),

    /// Subscription was dropped. Last message on the channel.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Receiver went away.
    Disconnected,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Lifecycle of a subscription. `Closed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Registered, nothing delivered yet.
    Created,
    /// Delivering stored history.
    Replaying,
    /// Delivering live events.
    Live,
    /// Cancelled, dropped or disconnected.
    Closed,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Receiving side of a registered subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<StreamEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<StreamEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<StreamEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<StreamEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}
