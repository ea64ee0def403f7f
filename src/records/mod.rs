//! Durable event storage.
//!
//! Events are stored in an append-only log; an in-memory index maps event
//! ids and `(scope, sequence)` pairs to log offsets for point lookups and
//! ordered range scans.

mod index;
mod log;

pub use index::EventIndex;
pub use log::{EventIterator, EventLog};

use crate::error::{Result, StoreError};
use crate::types::{Event, EventQuery, Sequence};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;

/// Append-only event storage: log plus index.
///
/// `append` checks uniqueness, writes and indexes under one lock, so an
/// event is either fully visible or not stored at all.
pub struct EventStore {
    log: EventLog,
    index: EventIndex,
    write_lock: Mutex<()>,
}

impl EventStore {
    /// Open (or create) the log at `path` and rebuild the index from it.
    ///
    /// The rebuilt index must satisfy what `append` enforces: unique event
    /// ids and gap-free sequences per scope. A log that breaks either is
    /// reported as [`StoreError::Corruption`].
    pub fn open(path: impl AsRef<Path>, sync_interval: u64, cache_size: usize) -> Result<Self> {
        let log = EventLog::open_with(path, sync_interval, cache_size)?;
        let index = EventIndex::new();

        for result in log.iter_from(0) {
            let (offset, event) = result?;

            if index.contains_id(&event.event_id) {
                return Err(StoreError::Corruption(format!(
                    "duplicate event `{}` at offset {}",
                    event.event_id, offset
                )));
            }
            let expected = index.latest_sequence(&event.scope).next();
            if event.sequence != expected {
                return Err(StoreError::Corruption(format!(
                    "event `{}` at offset {} has sequence {} in scope `{}` (expected {})",
                    event.event_id, offset, event.sequence, event.scope, expected
                )));
            }

            index.add(&event, offset);
        }

        Ok(Self {
            log,
            index,
            write_lock: Mutex::new(()),
        })
    }

    /// Persist an event whose sequence has already been assigned.
    ///
    /// Fails with [`StoreError::Conflict`] if the event id is taken or the
    /// sequence is not the next one for its scope. Nothing is written then.
    pub fn append(&self, event: Event) -> Result<Event> {
        let _lock = self.write_lock.lock();

        if self.index.contains_id(&event.event_id) {
            return Err(StoreError::Conflict(format!(
                "event `{}` already exists",
                event.event_id
            )));
        }

        let expected = self.index.latest_sequence(&event.scope).next();
        if event.sequence != expected {
            return Err(StoreError::Conflict(format!(
                "sequence {} out of order in scope `{}` (expected {})",
                event.sequence, event.scope, expected
            )));
        }

        let offset = self.log.append(&event)?;
        self.index.add(&event, offset);

        Ok(event)
    }

    /// Events of one scope in ascending sequence order.
    ///
    /// Bounds are inclusive; `to_sequence == 0` means no upper bound.
    pub fn query(&self, query: &EventQuery) -> Result<Vec<Event>> {
        let to = if query.to_sequence.is_none() {
            Sequence(u64::MAX)
        } else {
            query.to_sequence
        };

        self.index
            .range(
                &query.scope,
                query.from_sequence,
                to,
                &query.event_types,
                query.effective_limit(),
            )
            .into_iter()
            .map(|offset| self.log.read_at(offset))
            .collect()
    }

    /// Highest stored sequence for `scope`, `Sequence(0)` if empty.
    pub fn latest_sequence(&self, scope: &str) -> Sequence {
        self.index.latest_sequence(scope)
    }

    /// Highest stored sequence for every scope.
    pub fn scope_heads(&self) -> HashMap<String, Sequence> {
        self.index.scope_heads()
    }

    /// Get an event by id.
    pub fn get(&self, event_id: &str) -> Result<Option<Event>> {
        match self.index.get_offset_by_id(event_id) {
            Some(offset) => Ok(Some(self.log.read_at(offset)?)),
            None => Ok(None),
        }
    }

    /// Ids of all events of a type, in append order.
    pub fn events_of_type(&self, event_type: &str) -> Vec<String> {
        self.index.get_by_type(event_type)
    }

    pub fn count(&self) -> usize {
        self.index.count()
    }

    pub fn scope_count(&self) -> usize {
        self.index.scope_count()
    }

    /// Bytes of valid log on disk.
    pub fn size(&self) -> u64 {
        self.log.size()
    }

    pub fn sync(&self) -> Result<()> {
        self.log.sync()
    }
}
