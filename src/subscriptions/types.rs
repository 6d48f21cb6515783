//! Subscription handle and identifiers.

use super::manager::Shared;
use crate::cancel::CancelToken;
use crate::types::Event;
use crossbeam_channel::{select, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// A live subscription.
///
/// Iterating blocks until the next matching event arrives and ends when the
/// subscription is cancelled, its deadline passes, or the broker closed it
/// (slow or gone consumer). Dropping the handle cancels it.
pub struct Subscription {
    pub(super) id: SubscriptionId,
    pub(super) receiver: Receiver<Arc<Event>>,
    pub(super) cancel: CancelToken,
    pub(super) broker: Weak<Shared>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Close the subscription. Idempotent.
    ///
    /// No event is yielded after this returns, including events the broker
    /// had already queued.
    pub fn cancel(&self) {
        self.cancel.cancel();
        if let Some(shared) = self.broker.upgrade() {
            shared.remove(self.id);
        }
    }

    /// True once cancelled or closed by the broker.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.broker.upgrade().is_none()
    }

    /// Block for the next event. `None` once closed.
    pub fn recv(&self) -> Option<Arc<Event>> {
        if self.cancel.is_cancelled() {
            self.cancel();
            return None;
        }

        let deadline = self
            .cancel
            .deadline()
            .map(crossbeam_channel::at)
            .unwrap_or_else(crossbeam_channel::never);

        let event = select! {
            recv(self.receiver) -> msg => msg.ok(),
            recv(self.cancel.notified()) -> _ => None,
            recv(deadline) -> _ => None,
        };

        self.deliverable(event)
    }

    /// Wait up to `timeout` for the next event.
    ///
    /// `Disconnected` means the subscription is closed.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Arc<Event>, RecvTimeoutError> {
        if self.cancel.is_cancelled() {
            self.cancel();
            return Err(RecvTimeoutError::Disconnected);
        }

        let deadline = self
            .cancel
            .deadline()
            .map(crossbeam_channel::at)
            .unwrap_or_else(crossbeam_channel::never);

        let result = select! {
            recv(self.receiver) -> msg => msg.map_err(|_| RecvTimeoutError::Disconnected),
            recv(self.cancel.notified()) -> _ => Err(RecvTimeoutError::Disconnected),
            recv(deadline) -> _ => Err(RecvTimeoutError::Disconnected),
            default(timeout) => Err(RecvTimeoutError::Timeout),
        };

        match result {
            Ok(event) => self.deliverable(Some(event)).ok_or(RecvTimeoutError::Disconnected),
            Err(RecvTimeoutError::Disconnected) => {
                self.cancel();
                Err(RecvTimeoutError::Disconnected)
            }
            Err(e) => Err(e),
        }
    }

    /// Take an already-queued event without blocking.
    pub fn try_recv(&self) -> Result<Arc<Event>, TryRecvError> {
        if self.cancel.is_cancelled() {
            self.cancel();
            return Err(TryRecvError::Disconnected);
        }
        self.receiver.try_recv()
    }

    /// Drop `event` if the token fired while we were waiting.
    fn deliverable(&self, event: Option<Arc<Event>>) -> Option<Arc<Event>> {
        if event.is_none() || self.cancel.is_cancelled() {
            self.cancel();
            return None;
        }
        event
    }
}

impl Iterator for Subscription {
    type Item = Arc<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
