//! Subscription registry and broadcaster.

use crate::types::Event;
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::types::{
    DropReason, StreamEvent, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle,
    SubscriptionId,
};

/// Internal subscription state.
struct Subscription {
    filter: SubscriptionFilter,
    sender: Sender<StreamEvent>,
    /// Events allowed in flight. The channel holds one more slot for the
    /// final `Dropped` notice.
    capacity: usize,
    /// Makes the length check and the send one step across concurrent
    /// broadcasts, so queued events never take the reserved slot.
    send_lock: Mutex<()>,
}

impl Subscription {
    /// Queue an event without blocking. On failure, says why the subscriber must go.
    fn try_deliver(&self, event: Arc<Event>) -> Result<(), DropReason> {
        let _guard = self.send_lock.lock();
        if self.sender.len() >= self.capacity {
            return Err(DropReason::BufferOverflow);
        }
        self.try_send(StreamEvent::Event(event))
    }

    fn try_send(&self, event: StreamEvent) -> Result<(), DropReason> {
        match self.sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DropReason::BufferOverflow),
            Err(TrySendError::Disconnected(_)) => Err(DropReason::Disconnected),
        }
    }
}

/// Tracks live subscriptions and fans events out to them.
///
/// Broadcasting holds the read lock; register and unregister take the write
/// lock briefly. Sends never block: a subscriber whose buffer is full or
/// whose receiver is gone is removed without affecting anyone else.
pub struct SubscriptionManager {
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl SubscriptionManager {
    /// Create a new subscription manager.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a subscription. It starts receiving matching broadcasts
    /// immediately.
    pub fn register(&self, config: &SubscriptionConfig) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let capacity = config.buffer_size.max(1);
        let (sender, receiver) = bounded(capacity + 1);

        let subscription = Subscription {
            filter: config.filter.clone(),
            sender,
            capacity,
            send_lock: Mutex::new(()),
        };

        self.subscriptions.write().insert(id, subscription);
        tracing::info!(subscription = %id, "subscriber registered");

        SubscriptionHandle { id, receiver }
    }

    /// Unregister and close the subscription's channel.
    ///
    /// Returns false if it was not registered; calling twice is harmless.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        let removed = self.subscriptions.write().remove(&id);
        match removed {
            Some(sub) => {
                // Best effort; the receiver may be gone or full.
                let _ = sub.try_send(StreamEvent::Dropped {
                    reason: DropReason::Unsubscribed,
                });
                tracing::info!(subscription = %id, "subscriber unregistered");
                true
            }
            None => false,
        }
    }

    /// Whether the subscription is still registered.
    pub fn is_registered(&self, id: SubscriptionId) -> bool {
        self.subscriptions.read().contains_key(&id)
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Deliver an event to every matching subscription.
    ///
    /// Returns how many subscribers accepted it. Subscribers that could not
    /// accept it are logged and removed.
    pub fn broadcast(&self, event: &Event) -> usize {
        let shared = Arc::new(event.clone());
        let mut delivered = 0;
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if !sub.filter.matches(event) {
                    continue;
                }
                match sub.try_deliver(Arc::clone(&shared)) {
                    Ok(()) => delivered += 1,
                    Err(reason) => to_remove.push((*id, reason)),
                }
            }
        }

        // Remove dropped subscriptions
        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for (id, reason) in to_remove {
                tracing::warn!(
                    subscription = %id,
                    scope = %event.scope,
                    sequence = event.sequence.0,
                    ?reason,
                    "dropping subscriber after failed delivery"
                );
                if let Some(sub) = subs.remove(&id) {
                    let _ = sub.try_send(StreamEvent::Dropped { reason });
                }
            }
        }

        delivered
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}
