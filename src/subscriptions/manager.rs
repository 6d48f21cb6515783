//! Subscription manager for broadcasting stored events.

use crate::cancel::CancelToken;
use crate::filter::{matches_any, Filter};
use crate::types::{Event, StoredEvent};
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::types::{Subscription, SubscriptionId};

/// Default max buffered events per subscription.
const DEFAULT_BUFFER_SIZE: usize = 1000;

/// Internal subscription state.
struct Entry {
    filters: Vec<Filter>,
    sender: Sender<Arc<Event>>,
    cancel: CancelToken,
}

impl Entry {
    /// Try to deliver. Returns false if the subscriber is full or gone.
    fn try_send(&self, event: &Arc<Event>) -> bool {
        match self.sender.try_send(Arc::clone(event)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// State shared between the manager and the handles it gives out.
pub(crate) struct Shared {
    subscriptions: RwLock<HashMap<SubscriptionId, Entry>>,
    next_id: AtomicU64,
    buffer_size: usize,
}

impl Shared {
    /// Drop a subscription from the live set. Returns false if it was
    /// already gone.
    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        let removed = self.subscriptions.write().remove(&id);
        match removed {
            Some(entry) => {
                entry.cancel.cancel();
                debug!(subscription = id.0, "Subscription closed");
                true
            }
            None => false,
        }
    }
}

/// Manages live subscriptions and broadcasts newly stored events to them.
///
/// Cheap to clone; clones share the same live set.
#[derive(Clone)]
pub struct SubscriptionManager {
    shared: Arc<Shared>,
}

impl SubscriptionManager {
    /// Create a new subscription manager.
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    /// Create a manager whose subscriptions buffer at most `buffer_size`
    /// undelivered events before being closed.
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                subscriptions: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                buffer_size: buffer_size.max(1),
            }),
        }
    }

    /// Register a subscription for events published from now on.
    ///
    /// The subscription takes `cancel`: firing it (or its deadline) closes
    /// the subscription, and closing the subscription fires it.
    pub fn subscribe(&self, filters: Vec<Filter>, cancel: CancelToken) -> Subscription {
        let id = SubscriptionId(self.shared.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(self.shared.buffer_size);

        self.shared.subscriptions.write().insert(
            id,
            Entry {
                filters,
                sender,
                cancel: cancel.clone(),
            },
        );
        debug!(subscription = id.0, "Subscription opened");

        Subscription {
            id,
            receiver,
            cancel,
            broker: Arc::downgrade(&self.shared),
        }
    }

    /// Close subscription `id`. Idempotent.
    pub fn cancel(&self, id: SubscriptionId) {
        self.shared.remove(id);
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.shared.subscriptions.read().len()
    }

    /// Deliver `stored` to every open subscription whose filters match.
    ///
    /// Subscriptions that are cancelled, full or whose consumer is gone are
    /// closed. Returns the number of subscriptions the event was queued for.
    pub fn publish(&self, stored: &StoredEvent) -> usize {
        let mut delivered = 0;
        let mut to_remove = Vec::new();

        {
            let subs = self.shared.subscriptions.read();
            for (id, entry) in subs.iter() {
                if entry.cancel.is_cancelled() {
                    to_remove.push(*id);
                    continue;
                }
                if !matches_any(&entry.filters, &stored.event, stored.author_is_local) {
                    continue;
                }
                if entry.try_send(&stored.event) {
                    delivered += 1;
                } else {
                    to_remove.push(*id);
                }
            }
        }

        // Remove dropped subscriptions
        for id in to_remove {
            self.shared.remove(id);
        }

        delivered
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}
