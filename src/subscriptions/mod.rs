//! Live subscriptions to published events.
//!
//! This module provides in-process fan-out of newly published events:
//! - A registry of live subscribers, each with a filter and a bounded buffer
//! - A non-blocking broadcaster that drops subscribers which fall behind
//! - Historical catch-up from a given sequence, handed off to live delivery
//!   without losing or repeating events
//!
//! # Example
//!
//! ```ignore
//! let filter = SubscriptionFilter::scopes(["channel:42"])
//!     .with_event_type("message.sent");
//! let mut subscription = store.subscribe(SubscriptionConfig::from_sequence(filter, Sequence(5)));
//!
//! // Stored events from sequence 5 come first, then live ones.
//! while let Some(event) = subscription.recv()? {
//!     println!("{} #{}", event.scope, event.sequence);
//! }
//! ```

mod catch_up;
mod manager;
mod stream;
mod types;

pub use catch_up::REPLAY_BATCH_SIZE;
pub(crate) use catch_up::CatchUp;
pub use manager::SubscriptionManager;
pub use stream::{CancelHandle, Subscription};
pub use types::{
    DropReason, StreamEvent, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle,
    SubscriptionId, SubscriptionState,
};
