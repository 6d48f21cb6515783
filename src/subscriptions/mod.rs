//! Live subscriptions to newly stored events.
//!
//! A subscription registers a filter set and receives every event published
//! after it opened that matches any of its filters. Matching runs in memory
//! against the event itself, so tags the index policy skipped still match.
//!
//! Subscriptions support:
//! - Cancellation via [`crate::CancelToken`] (explicit or deadline)
//! - Bounded buffers; a full or abandoned subscriber is closed silently
//! - Per-subscription delivery in publish order
//!
//! # Example
//!
//! ```ignore
//! let manager = SubscriptionManager::new();
//! let sub = manager.subscribe(vec![Filter::new().kinds([1u32])], CancelToken::new());
//!
//! for event in sub {
//!     println!("{}", event.content);
//! }
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{Subscription, SubscriptionId};
