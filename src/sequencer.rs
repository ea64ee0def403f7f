//! Per-scope sequence assignment.
//!
//! Every scope has its own head behind its own mutex. A publisher holds that
//! mutex across reserve, persist, advance and broadcast, so within a scope
//! sequences are handed out one at a time and are never reused or skipped.
//! Publishers to different scopes do not contend.

use crate::error::Result;
use crate::types::Sequence;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// The last committed sequence of one scope, visible only while locked.
#[derive(Debug)]
pub struct ScopeHead {
    current: Sequence,
}

impl ScopeHead {
    /// Last committed sequence (`Sequence(0)` for an empty scope).
    pub fn current(&self) -> Sequence {
        self.current
    }

    /// The sequence the next event in this scope must take.
    pub fn next(&self) -> Sequence {
        self.current.next()
    }

    /// Commit `sequence` once its event is durably stored.
    pub fn advance(&mut self, sequence: Sequence) {
        debug_assert_eq!(sequence, self.current.next(), "sequence must advance by one");
        self.current = sequence;
    }
}

/// Assigns gap-free sequence numbers per scope.
#[derive(Default)]
pub struct Sequencer {
    heads: RwLock<HashMap<String, Arc<Mutex<ScopeHead>>>>,
}

impl Sequencer {
    /// Create a sequencer with no known scopes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sequencer seeded with the latest stored sequence of each scope.
    pub fn with_heads(heads: HashMap<String, Sequence>) -> Self {
        let heads = heads
            .into_iter()
            .map(|(scope, current)| (scope, Arc::new(Mutex::new(ScopeHead { current }))))
            .collect();

        Self {
            heads: RwLock::new(heads),
        }
    }

    /// Run `f` while holding the scope's head.
    ///
    /// `f` should read [`ScopeHead::next`], persist, and call
    /// [`ScopeHead::advance`] only on success. If `f` fails without advancing,
    /// the same sequence is offered to the next caller.
    pub fn with_scope<T>(
        &self,
        scope: &str,
        f: impl FnOnce(&mut ScopeHead) -> Result<T>,
    ) -> Result<T> {
        let head = self.head(scope);
        let mut guard = head.lock();
        f(&mut guard)
    }

    /// Latest committed sequence for `scope`.
    ///
    /// Waits for any in-flight publish to the scope to finish.
    pub fn latest(&self, scope: &str) -> Sequence {
        let head = self.heads.read().get(scope).cloned();
        head.map(|head| head.lock().current).unwrap_or_default()
    }

    /// Number of scopes seen.
    pub fn scope_count(&self) -> usize {
        self.heads.read().len()
    }

    fn head(&self, scope: &str) -> Arc<Mutex<ScopeHead>> {
        if let Some(head) = self.heads.read().get(scope) {
            return Arc::clone(head);
        }

        let mut heads = self.heads.write();
        Arc::clone(heads.entry(scope.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(ScopeHead {
                current: Sequence(0),
            }))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use std::collections::HashSet;
    use std::thread;

    fn reserve(sequencer: &Sequencer, scope: &str) -> Sequence {
        sequencer
            .with_scope(scope, |head| {
                let seq = head.next();
                head.advance(seq);
                Ok(seq)
            })
            .unwrap()
    }

    #[test]
    fn test_starts_at_one() {
        let sequencer = Sequencer::new();
        assert_eq!(sequencer.latest("channel:1"), Sequence(0));
        assert_eq!(reserve(&sequencer, "channel:1"), Sequence(1));
        assert_eq!(reserve(&sequencer, "channel:1"), Sequence(2));
        assert_eq!(sequencer.latest("channel:1"), Sequence(2));
    }

    #[test]
    fn test_seeded_heads_continue() {
        let mut heads = HashMap::new();
        heads.insert("channel:1".to_string(), Sequence(10));
        let sequencer = Sequencer::with_heads(heads);

        assert_eq!(reserve(&sequencer, "channel:1"), Sequence(11));
        assert_eq!(reserve(&sequencer, "channel:2"), Sequence(1));
        assert_eq!(sequencer.scope_count(), 2);
    }

    #[test]
    fn test_failed_write_does_not_consume_sequence() {
        let sequencer = Sequencer::new();
        reserve(&sequencer, "channel:1");

        let result: Result<()> = sequencer.with_scope("channel:1", |head| {
            assert_eq!(head.next(), Sequence(2));
            Err(StoreError::NotInitialized)
        });
        assert!(result.is_err());

        assert_eq!(sequencer.latest("channel:1"), Sequence(1));
        assert_eq!(reserve(&sequencer, "channel:1"), Sequence(2));
    }

    #[test]
    fn test_concurrent_reservations_are_gap_free() {
        let sequencer = Arc::new(Sequencer::new());
        let threads = 8;
        let per_thread = 250;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let sequencer = Arc::clone(&sequencer);
                thread::spawn(move || {
                    (0..per_thread)
                        .map(|_| reserve(&sequencer, "channel:1").0)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for seq in handle.join().unwrap() {
                assert!(seen.insert(seq), "duplicate sequence {}", seq);
            }
        }

        let total = (threads * per_thread) as u64;
        assert_eq!(seen, (1..=total).collect::<HashSet<_>>());
    }
}
