//! # Herald
//!
//! An embedded pub/sub event log: every domain action is an immutable
//! event, durably appended to its scope and fanned out to live subscribers.
//!
//! ## Core Concepts
//!
//! - **Events**: Immutable entries with type, scope, actor, payload and metadata
//! - **Scopes**: Namespaces like `channel:42` with their own gap-free sequence
//! - **Subscriptions**: Filtered live streams, optionally replaying history first
//! - **Queries**: Paged, ascending range reads over one scope
//!
//! Ordering is guaranteed within a scope only. Delivery to live subscribers is
//! best effort: a subscriber that falls behind is dropped, never waited on.
//!
//! ## Example
//!
//! ```ignore
//! use herald::{scope, EventInput, Store, StoreConfig, SubscriptionConfig, SubscriptionFilter};
//!
//! let store = Store::open_or_create(StoreConfig {
//!     path: "./my-events".into(),
//!     ..Default::default()
//! })?;
//!
//! let mut subscription = store.subscribe(SubscriptionConfig::live(
//!     SubscriptionFilter::scopes([scope::channel(42)]),
//! ));
//!
//! let receipt = store.publish(EventInput::json(
//!     "message.sent",
//!     scope::channel(42),
//!     &json!({ "text": "Hello, world!" }),
//! )?)?;
//!
//! let event = subscription.recv()?;
//! ```

pub mod error;
pub mod records;
pub mod scope;
pub mod sequencer;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use error::{Result, StoreError};
pub use records::EventStore;
pub use sequencer::Sequencer;
pub use store::{Store, StoreConfig};
pub use subscriptions::{
    CancelHandle, DropReason, StreamEvent, Subscription, SubscriptionConfig, SubscriptionFilter,
    SubscriptionId, SubscriptionManager, SubscriptionState,
};
pub use types::*;
