//! Main Store struct tying all components together.

use crate::error::{Result, StoreError};
use crate::records::EventStore;
use crate::sequencer::Sequencer;
use crate::subscriptions::{
    CatchUp, Subscription, SubscriptionConfig, SubscriptionId, SubscriptionManager,
};
use crate::types::{
    Event, EventInput, EventPage, EventQuery, PublishReceipt, Sequence, StoreStats,
};
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Base path for the store.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Decoded-event cache size (number of events).
    pub event_cache_size: usize,

    /// Fsync the log every N appends (0 or 1 = every append).
    pub sync_interval: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data"),
            create_if_missing: true,
            event_cache_size: 4096,
            sync_interval: 100,
        }
    }
}

impl StoreConfig {
    /// Defaults with environment variable overrides:
    /// - `HERALD_DATA_PATH` overrides `path`
    /// - `HERALD_EVENT_CACHE_SIZE` overrides `event_cache_size`
    /// - `HERALD_SYNC_INTERVAL` overrides `sync_interval`
    ///
    /// Values that fail to parse are ignored.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(path) = lookup("HERALD_DATA_PATH") {
            self.path = PathBuf::from(path);
        }
        if let Some(size) = lookup("HERALD_EVENT_CACHE_SIZE") {
            match size.parse() {
                Ok(parsed) => self.event_cache_size = parsed,
                Err(_) => tracing::warn!(value = %size, "ignoring invalid HERALD_EVENT_CACHE_SIZE"),
            }
        }
        if let Some(interval) = lookup("HERALD_SYNC_INTERVAL") {
            match interval.parse() {
                Ok(parsed) => self.sync_interval = parsed,
                Err(_) => tracing::warn!(value = %interval, "ignoring invalid HERALD_SYNC_INTERVAL"),
            }
        }
        self
    }
}

/// Magic bytes for store manifest.
const STORE_MAGIC: &[u8; 4] = b"HRD\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

/// The event store.
///
/// Provides a unified interface for:
/// - Publishing events with gap-free per-scope sequences
/// - Streaming live events, optionally after replaying history
/// - Paged range queries over a scope
///
/// `Store` is `Send + Sync`; share it behind an `Arc` and call it from as
/// many threads as needed.
pub struct Store {
    /// Store configuration.
    config: StoreConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    /// Persisted events (shared with replaying subscriptions).
    events: Arc<EventStore>,

    /// Per-scope sequence heads.
    sequencer: Sequencer,

    /// Live subscribers.
    subscriptions: Arc<SubscriptionManager>,
}

impl Store {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    /// Create a new store.
    pub fn create(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;
        Self::write_manifest(&config.path)?;
        Self::open(config)
    }

    /// Open an existing store.
    pub fn open(config: StoreConfig) -> Result<Self> {
        if !config.path.join("MANIFEST").exists() {
            return Err(StoreError::NotInitialized);
        }
        Self::verify_manifest(&config.path)?;

        let lock_file = Self::acquire_lock(&config.path)?;

        let events = EventStore::open(
            config.path.join("events.log"),
            config.sync_interval,
            config.event_cache_size,
        )?;
        let sequencer = Sequencer::with_heads(events.scope_heads());

        tracing::info!(
            path = %config.path.display(),
            events = events.count(),
            scopes = events.scope_count(),
            "store opened"
        );

        Ok(Self {
            config,
            _lock_file: lock_file,
            events: Arc::new(events),
            sequencer,
            subscriptions: Arc::new(SubscriptionManager::new()),
        })
    }

    // --- Publish ---

    /// Persist an event and fan it out to matching live subscribers.
    ///
    /// The scope's next sequence is assigned, the event is written, and
    /// only then is it broadcast. If validation or the write fails nothing
    /// is stored, the sequence is not consumed and nobody is notified.
    /// Delivery problems never fail the publish.
    pub fn publish(&self, input: EventInput) -> Result<PublishReceipt> {
        if input.scope.is_empty() {
            return Err(StoreError::required("scope"));
        }
        if input.event_type.is_empty() {
            return Err(StoreError::required("event_type"));
        }
        if matches!(&input.event_id, Some(id) if id.is_empty()) {
            return Err(StoreError::required("event_id"));
        }

        let scope = input.scope.clone();
        self.sequencer.with_scope(&scope, |head| {
            let sequence = head.next();
            let event = self.events.append(input.into_event(sequence))?;
            head.advance(sequence);

            let delivered = self.subscriptions.broadcast(&event);
            tracing::debug!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                scope = %event.scope,
                sequence = sequence.0,
                delivered,
                "event published"
            );

            Ok(PublishReceipt {
                event_id: event.event_id,
                sequence,
            })
        })
    }

    // --- Subscribe ---

    /// Open a subscription.
    ///
    /// With `from_sequence == Sequence(0)` only future events are delivered.
    /// Otherwise stored events of each scope in `filter.scopes`, from
    /// `from_sequence` up to that scope's latest sequence at this moment,
    /// come first, followed by live events without gap or repeat.
    pub fn subscribe(&self, config: SubscriptionConfig) -> Subscription {
        // Register before reading replay bounds.
        let handle = self.subscriptions.register(&config);
        let catch_up = CatchUp::plan(Arc::clone(&self.events), &self.sequencer, &config);
        Subscription::new(handle, Arc::downgrade(&self.subscriptions), catch_up)
    }

    /// Unregister a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.unregister(id)
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.subscription_count()
    }

    // --- Queries ---

    /// One page of a scope's events, oldest first.
    ///
    /// `to_sequence == Sequence(0)` means up to the latest event. A full
    /// page sets `has_more` and points `next_sequence` just past its last
    /// event.
    pub fn get_events(&self, query: EventQuery) -> Result<EventPage> {
        if query.scope.is_empty() {
            return Err(StoreError::required("scope"));
        }

        let limit = query.effective_limit();
        let events = self.events.query(&query)?;

        let has_more = events.len() == limit;
        let next_sequence = match events.last() {
            Some(last) if has_more => last.sequence.next(),
            _ => Sequence(0),
        };

        Ok(EventPage {
            events,
            has_more,
            next_sequence,
        })
    }

    /// Get an event by id.
    pub fn get_event(&self, event_id: &str) -> Result<Option<Event>> {
        self.events.get(event_id)
    }

    /// Latest sequence of a scope, `Sequence(0)` if it has no events.
    pub fn latest_sequence(&self, scope: &str) -> Sequence {
        self.sequencer.latest(scope)
    }

    // --- Store Operations ---

    /// Get store statistics.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            event_count: self.events.count() as u64,
            scope_count: self.events.scope_count() as u64,
            subscription_count: self.subscriptions.subscription_count() as u64,
            log_size_bytes: self.events.size(),
        }
    }

    /// Sync all data to disk.
    pub fn sync(&self) -> Result<()> {
        self.events.sync()
    }

    /// Get the store path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // --- Private Helpers ---

    fn write_manifest(path: &Path) -> Result<()> {
        use std::io::Write;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::create(manifest_path)?;

        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        use std::io::Read;

        let mut file = File::open(path.join("MANIFEST"))?;

        let mut header = [0u8; 5];
        file.read_exact(&mut header)?;
        if &header[..4] != STORE_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid store magic".into()));
        }
        if header[4] != STORE_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported store version: {}",
                header[4]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join("LOCK"))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // Best-effort sync on drop
        if let Err(e) = self.sync() {
            tracing::warn!(error = %e, "sync on close failed");
        }
    }
}
