//! Cooperative cancellation shared by the store and the broker.
//!
//! A [`CancelToken`] fires either when [`CancelToken::cancel`] is called or
//! when its deadline passes. Store operations poll it from an SQLite
//! progress handler; subscription waits block on [`CancelToken::notified`]
//! so a cancel wakes them immediately.

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Wake {
    /// Dropped on cancel, which disconnects `receiver` and wakes waiters.
    sender: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

/// Cloneable cancellation signal with an optional deadline.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
    wake: Arc<Wake>,
}

impl CancelToken {
    /// A token that only fires when cancelled explicitly.
    pub fn new() -> Self {
        let (sender, receiver) = bounded(0);
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: None,
            wake: Arc::new(Wake {
                sender: Mutex::new(Some(sender)),
                receiver,
            }),
        }
    }

    /// A token that also fires once `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().deadline_at(Instant::now() + timeout)
    }

    /// Attach a deadline. Clones share the cancel flag but not the deadline.
    pub fn deadline_at(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Fire the token. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.wake.sender.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || self.is_expired()
    }

    fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Channel that disconnects when the token is cancelled. Never yields a
    /// value; use it as a `select!` arm.
    pub fn notified(&self) -> &Receiver<()> {
        &self.wake.receiver
    }

    /// Plain closure over the flag and deadline, suitable for an SQLite
    /// progress handler (which requires `Send + RefUnwindSafe`).
    pub(crate) fn interrupt_check(&self) -> impl FnMut() -> bool + Send + std::panic::RefUnwindSafe + 'static {
        let cancelled = Arc::clone(&self.cancelled);
        let deadline = self.deadline;
        move || {
            cancelled.load(Ordering::SeqCst) || deadline.is_some_and(|d| Instant::now() >= d)
        }
    }

    /// `Err(Cancelled)` if the token has fired.
    pub(crate) fn check(&self) -> crate::Result<()> {
        if self.is_cancelled() {
            Err(crate::StoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.cancelled.load(Ordering::SeqCst))
            .field("deadline", &self.deadline)
            .finish()
    }
}
