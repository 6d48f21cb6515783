//! The event database: storage, stats and live delivery behind one handle.

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::filter::Filter;
use crate::stats::StatsAggregator;
use crate::store::{EventStore, StoreConfig};
use crate::subscriptions::{Subscription, SubscriptionManager};
use crate::types::{Event, InsertOutcome, QueryOptions, StoredEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// What happened to an event handed to [`EventDb::store_event`].
#[derive(Clone, Debug)]
pub enum IngestOutcome {
    /// Persisted, counted and published.
    Stored(StoredEvent),
    /// Already known. Not counted or published again.
    Duplicate,
    /// Ephemeral kind: published to live subscribers only.
    Ephemeral(StoredEvent),
}

impl IngestOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, IngestOutcome::Duplicate)
    }

    /// The event as delivered to subscribers, unless it was a duplicate.
    pub fn stored(&self) -> Option<&StoredEvent> {
        match self {
            IngestOutcome::Stored(stored) | IngestOutcome::Ephemeral(stored) => Some(stored),
            IngestOutcome::Duplicate => None,
        }
    }
}

/// Event database.
///
/// Provides a unified interface for:
/// - Storing events, updating their counters and publishing them live
/// - Querying, counting and deleting stored events
/// - Opening live subscriptions
pub struct EventDb {
    /// Durable storage.
    store: EventStore,

    /// Denormalized counters over the same pool.
    stats: StatsAggregator,

    /// Live subscriptions.
    subscriptions: SubscriptionManager,

    /// Serializes insert-then-publish so subscribers see commit order.
    write_lock: Mutex<()>,
}

impl EventDb {
    /// Open (or create) the database described by `config`.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let store = EventStore::open(&config)?;
        let stats = StatsAggregator::new(&store);
        let subscriptions = SubscriptionManager::with_buffer_size(config.subscription_buffer);

        Ok(Self {
            store,
            stats,
            subscriptions,
            write_lock: Mutex::new(()),
        })
    }

    // --- Writes ---

    /// Ingest one event.
    ///
    /// Fresh events are persisted, published to matching subscriptions and
    /// counted, in that order. Duplicates change nothing. Ephemeral kinds
    /// skip storage and counters.
    ///
    /// Once the insert commits the event is reported as stored: a counter
    /// that fails to update is logged, not returned, since a retry would
    /// only come back as a duplicate.
    pub fn store_event(&self, event: &Event, cancel: &CancelToken) -> Result<IngestOutcome> {
        let _lock = self.write_lock.lock();

        if event.kind.is_ephemeral() {
            cancel.check()?;
            let stored = StoredEvent {
                event: Arc::new(event.clone()),
                author_is_local: self.store.is_local_author(&event.pubkey)?,
            };
            let delivered = self.subscriptions.publish(&stored);
            debug!(id = %event.id, kind = %event.kind, delivered, "Ephemeral event published");
            return Ok(IngestOutcome::Ephemeral(stored));
        }

        match self.store.insert(event, cancel)? {
            InsertOutcome::Inserted(stored) => {
                let delivered = self.subscriptions.publish(&stored);
                debug!(id = %event.id, delivered, "Event published");
                if let Err(e) = self.stats.apply_event(&stored.event) {
                    warn!(id = %event.id, error = %e, "Stats update failed");
                }
                Ok(IngestOutcome::Stored(stored))
            }
            InsertOutcome::Duplicate => Ok(IngestOutcome::Duplicate),
        }
    }

    /// Remove every stored event matching any of `filters`.
    pub fn delete(&self, filters: &[Filter], cancel: &CancelToken) -> Result<usize> {
        let _lock = self.write_lock.lock();
        self.store.delete(filters, cancel)
    }

    // --- Reads ---

    /// Stored events matching any of `filters`, newest first.
    pub fn query(
        &self,
        filters: &[Filter],
        options: QueryOptions,
        cancel: &CancelToken,
    ) -> Result<Vec<Event>> {
        self.store.query(filters, options, cancel)
    }

    pub fn count(&self, filters: &[Filter], cancel: &CancelToken) -> Result<u64> {
        self.store.count(filters, cancel)
    }

    /// Subscribe to events stored from now on. Past events are not replayed;
    /// run [`EventDb::query`] first for history.
    pub fn subscribe(&self, filters: Vec<Filter>, cancel: CancelToken) -> Subscription {
        self.subscriptions.subscribe(filters, cancel)
    }

    // --- Components ---

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn stats(&self) -> &StatsAggregator {
        &self.stats
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }
}
