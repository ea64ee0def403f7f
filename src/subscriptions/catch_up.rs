//! Historical replay for subscriptions that start from a past sequence.
//!
//! The subscription is registered for live delivery first; only then is the
//! upper bound of each scope read. Everything up to that bound comes from the
//! store, everything after it arrives on the live channel. Live events at or
//! below the bound are recognised and skipped, so the handoff neither loses
//! nor repeats an event.

use crate::error::Result;
use crate::records::EventStore;
use crate::sequencer::Sequencer;
use crate::types::{Event, EventQuery, Sequence};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use super::types::{SubscriptionConfig, SubscriptionFilter};

/// Events fetched from the store per replay query.
pub const REPLAY_BATCH_SIZE: usize = 100;

/// Replay cursor for one scope.
#[derive(Debug)]
struct ScopeCursor {
    scope: String,
    next: Sequence,
    upper: Sequence,
}

/// Pages stored history for a single subscription.
pub(crate) struct CatchUp {
    events: Arc<EventStore>,
    filter: SubscriptionFilter,
    cursors: VecDeque<ScopeCursor>,
    buffer: VecDeque<Event>,
    /// Highest replayed sequence per scope, fixed when the plan is made.
    watermarks: HashMap<String, Sequence>,
}

impl CatchUp {
    /// Fix replay bounds for `config`.
    ///
    /// Must be called after the subscription is registered. Bounds are read
    /// once here; events published later are left to live delivery.
    pub(crate) fn plan(
        events: Arc<EventStore>,
        sequencer: &Sequencer,
        config: &SubscriptionConfig,
    ) -> Self {
        let mut cursors = VecDeque::new();
        let mut watermarks = HashMap::new();

        if !config.from_sequence.is_none() {
            let mut scopes: Vec<&String> = config.filter.scopes.iter().collect();
            scopes.sort();

            for scope in scopes {
                let upper = sequencer.latest(scope);
                watermarks.insert(scope.clone(), upper);
                if upper >= config.from_sequence {
                    cursors.push_back(ScopeCursor {
                        scope: scope.clone(),
                        next: config.from_sequence,
                        upper,
                    });
                }
            }
        }

        Self {
            events,
            filter: config.filter.clone(),
            cursors,
            buffer: VecDeque::new(),
            watermarks,
        }
    }

    /// Next stored event to replay, or `None` once history is exhausted.
    pub(crate) fn next_event(&mut self) -> Result<Option<Event>> {
        loop {
            if let Some(event) = self.buffer.pop_front() {
                return Ok(Some(event));
            }
            if !self.fetch_page()? {
                return Ok(None);
            }
        }
    }

    /// Whether every scope has been fully paged.
    pub(crate) fn is_exhausted(&self) -> bool {
        self.buffer.is_empty() && self.cursors.is_empty()
    }

    /// Whether a live event was already covered by replay.
    pub(crate) fn covers(&self, event: &Event) -> bool {
        self.watermarks
            .get(&event.scope)
            .map_or(false, |upper| event.sequence <= *upper)
    }

    /// Drop any unread history.
    pub(crate) fn abandon(&mut self) {
        self.cursors.clear();
        self.buffer.clear();
    }

    /// Load the next page into the buffer. Returns false when nothing is left.
    fn fetch_page(&mut self) -> Result<bool> {
        while let Some(cursor) = self.cursors.front_mut() {
            let query = EventQuery::scope(cursor.scope.clone())
                .event_types(self.filter.event_types.iter().cloned().collect())
                .from(cursor.next)
                .to(cursor.upper)
                .limit(REPLAY_BATCH_SIZE);

            let page = self.events.query(&query)?;
            let full = page.len() == REPLAY_BATCH_SIZE;

            match page.last() {
                Some(last) if full && last.sequence < cursor.upper => {
                    cursor.next = last.sequence.next();
                }
                _ => {
                    self.cursors.pop_front();
                }
            }

            let before = self.buffer.len();
            self.buffer
                .extend(page.into_iter().filter(|event| self.filter.matches(event)));

            if self.buffer.len() > before {
                return Ok(true);
            }
        }

        Ok(false)
    }
}
