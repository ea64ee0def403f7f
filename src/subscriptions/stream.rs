//! Consumer side of a subscription: replay, then live events.

use crate::error::Result;
use crate::types::Event;
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use super::catch_up::CatchUp;
use super::manager::SubscriptionManager;
use super::types::{DropReason, StreamEvent, SubscriptionHandle, SubscriptionId, SubscriptionState};

/// How long a receive may wait.
#[derive(Clone, Copy)]
enum Wait {
    Forever,
    Until(Instant),
    No,
}

/// A lazy, unbounded stream of events for one subscriber.
///
/// Stored history (if requested) is yielded first, then live events. The
/// stream ends when it is cancelled, dropped for falling behind, or the store
/// goes away. Dropping the `Subscription` unregisters it.
pub struct Subscription {
    id: SubscriptionId,
    receiver: Receiver<StreamEvent>,
    manager: Weak<SubscriptionManager>,
    catch_up: CatchUp,
    state: SubscriptionState,
    cancelled: Arc<AtomicBool>,
    close_reason: Option<DropReason>,
}

impl Subscription {
    pub(crate) fn new(
        handle: SubscriptionHandle,
        manager: Weak<SubscriptionManager>,
        catch_up: CatchUp,
    ) -> Self {
        Self {
            id: handle.id,
            receiver: handle.receiver,
            manager,
            catch_up,
            state: SubscriptionState::Created,
            cancelled: Arc::new(AtomicBool::new(false)),
            close_reason: None,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Why the stream ended, once it has.
    pub fn close_reason(&self) -> Option<DropReason> {
        self.close_reason
    }

    /// A handle that can cancel this subscription from another thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            id: self.id,
            manager: Weak::clone(&self.manager),
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    /// Block until the next event. `None` means the stream has ended.
    pub fn recv(&mut self) -> Result<Option<Event>> {
        self.poll(Wait::Forever)
    }

    /// Wait up to `timeout` for the next event.
    ///
    /// `None` means nothing arrived in time or the stream ended; check
    /// [`Subscription::state`] to tell them apart.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Event>> {
        self.poll(Wait::Until(Instant::now() + timeout))
    }

    /// Next event if one is ready, without blocking on the live channel.
    pub fn try_recv(&mut self) -> Result<Option<Event>> {
        self.poll(Wait::No)
    }

    /// Unregister and end the stream. Further calls are no-ops.
    pub fn close(&mut self) {
        self.finish(DropReason::Unsubscribed);
    }

    fn poll(&mut self, wait: Wait) -> Result<Option<Event>> {
        if self.state == SubscriptionState::Closed {
            return Ok(None);
        }
        if self.cancelled.load(Ordering::Acquire) {
            self.finish(DropReason::Unsubscribed);
            return Ok(None);
        }

        if self.state == SubscriptionState::Created {
            self.state = if self.catch_up.is_exhausted() {
                SubscriptionState::Live
            } else {
                SubscriptionState::Replaying
            };
        }

        if self.state == SubscriptionState::Replaying {
            match self.catch_up.next_event() {
                Ok(Some(event)) => return Ok(Some(event)),
                Ok(None) => {
                    tracing::debug!(subscription = %self.id, "replay complete, going live");
                    self.state = SubscriptionState::Live;
                }
                Err(e) => {
                    tracing::warn!(subscription = %self.id, error = %e, "replay failed");
                    self.finish(DropReason::Disconnected);
                    return Err(e);
                }
            }
        }

        self.poll_live(wait)
    }

    fn poll_live(&mut self, wait: Wait) -> Result<Option<Event>> {
        loop {
            let message = match wait {
                Wait::Forever => self.receiver.recv().ok(),
                Wait::Until(deadline) => match self.receiver.recv_deadline(deadline) {
                    Ok(message) => Some(message),
                    Err(RecvTimeoutError::Timeout) => return Ok(None),
                    Err(RecvTimeoutError::Disconnected) => None,
                },
                Wait::No => match self.receiver.try_recv() {
                    Ok(message) => Some(message),
                    Err(TryRecvError::Empty) => return Ok(None),
                    Err(TryRecvError::Disconnected) => None,
                },
            };

            match message {
                Some(StreamEvent::Event(event)) => {
                    // Deliveries racing a cancel are discarded.
                    if self.cancelled.load(Ordering::Acquire) {
                        self.finish(DropReason::Unsubscribed);
                        return Ok(None);
                    }
                    if self.catch_up.covers(&event) {
                        continue;
                    }
                    return Ok(Some(Arc::try_unwrap(event).unwrap_or_else(|e| (*e).clone())));
                }
                Some(StreamEvent::Dropped { reason }) => {
                    self.finish(reason);
                    return Ok(None);
                }
                None => {
                    let reason = if self.cancelled.load(Ordering::Acquire) {
                        DropReason::Unsubscribed
                    } else {
                        DropReason::Disconnected
                    };
                    self.finish(reason);
                    return Ok(None);
                }
            }
        }
    }

    fn finish(&mut self, reason: DropReason) {
        if self.state == SubscriptionState::Closed {
            return;
        }
        self.state = SubscriptionState::Closed;
        self.close_reason = Some(reason);
        self.catch_up.abandon();

        if let Some(manager) = self.manager.upgrade() {
            manager.unregister(self.id);
        }
        tracing::debug!(subscription = %self.id, ?reason, "subscription closed");
    }
}

impl Iterator for Subscription {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv().transpose()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// Cancels a [`Subscription`] from anywhere.
///
/// Cancelling unregisters the subscription at once, which wakes a consumer
/// blocked in [`Subscription::recv`]. Cancelling twice is harmless.
#[derive(Clone)]
pub struct CancelHandle {
    id: SubscriptionId,
    manager: Weak<SubscriptionManager>,
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(manager) = self.manager.upgrade() {
            manager.unregister(self.id);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
