//! In-memory indices over the event log.
//!
//! The log is the source of truth; these maps are rebuilt from it on open.

use crate::types::{Event, Sequence};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// Where an event lives, plus what range scans filter on.
#[derive(Clone, Debug)]
struct ScopeEntry {
    offset: u64,
    event_type: String,
}

/// Index mapping event ids and `(scope, sequence)` to log offsets.
#[derive(Default)]
pub struct EventIndex {
    /// scope -> sequence -> entry, ordered for range scans.
    scopes: RwLock<HashMap<String, BTreeMap<Sequence, ScopeEntry>>>,

    /// Event ID to offset.
    id_to_offset: RwLock<HashMap<String, u64>>,

    /// Event type to event IDs.
    type_index: RwLock<HashMap<String, Vec<String>>>,
}

impl EventIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event stored at `offset`.
    pub fn add(&self, event: &Event, offset: u64) {
        self.scopes
            .write()
            .entry(event.scope.clone())
            .or_default()
            .insert(
                event.sequence,
                ScopeEntry {
                    offset,
                    event_type: event.event_type.clone(),
                },
            );

        self.type_index
            .write()
            .entry(event.event_type.clone())
            .or_default()
            .push(event.event_id.clone());

        self.id_to_offset
            .write()
            .insert(event.event_id.clone(), offset);
    }

    /// Whether an event with this ID has been indexed.
    pub fn contains_id(&self, event_id: &str) -> bool {
        self.id_to_offset.read().contains_key(event_id)
    }

    /// Get offset for an event ID.
    pub fn get_offset_by_id(&self, event_id: &str) -> Option<u64> {
        self.id_to_offset.read().get(event_id).copied()
    }

    /// Get offset for a sequence within a scope.
    pub fn get_offset(&self, scope: &str, sequence: Sequence) -> Option<u64> {
        self.scopes
            .read()
            .get(scope)
            .and_then(|seqs| seqs.get(&sequence))
            .map(|entry| entry.offset)
    }

    /// Offsets of events in `scope` with `from <= sequence <= to`, ascending,
    /// optionally restricted to `event_types`, at most `limit` of them.
    pub fn range(
        &self,
        scope: &str,
        from: Sequence,
        to: Sequence,
        event_types: &[String],
        limit: usize,
    ) -> Vec<u64> {
        if from > to || limit == 0 {
            return Vec::new();
        }

        let scopes = self.scopes.read();
        let Some(seqs) = scopes.get(scope) else {
            return Vec::new();
        };

        seqs.range(from..=to)
            .filter(|(_, entry)| event_types.is_empty() || event_types.contains(&entry.event_type))
            .take(limit)
            .map(|(_, entry)| entry.offset)
            .collect()
    }

    /// Get all event IDs of a given type, in append order.
    pub fn get_by_type(&self, event_type: &str) -> Vec<String> {
        self.type_index
            .read()
            .get(event_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Highest sequence stored for a scope, `Sequence(0)` if none.
    pub fn latest_sequence(&self, scope: &str) -> Sequence {
        self.scopes
            .read()
            .get(scope)
            .and_then(|seqs| seqs.keys().next_back().copied())
            .unwrap_or_default()
    }

    /// Highest sequence of every known scope.
    pub fn scope_heads(&self) -> HashMap<String, Sequence> {
        self.scopes
            .read()
            .iter()
            .filter_map(|(scope, seqs)| {
                seqs.keys()
                    .next_back()
                    .map(|seq| (scope.clone(), *seq))
            })
            .collect()
    }

    /// Get count of events.
    pub fn count(&self) -> usize {
        self.id_to_offset.read().len()
    }

    /// Get count of scopes with at least one event.
    pub fn scope_count(&self) -> usize {
        self.scopes.read().len()
    }
}
