//! # Relay Store
//!
//! Persistent event storage for a relay: signed events go into SQLite with
//! their tag and full-text indexes, come back out through multi-filter
//! queries, and are pushed live to matching subscriptions.
//!
//! ## Core Concepts
//!
//! - **Events**: Immutable, content-addressed records; inserting one twice is a no-op
//! - **Filters**: Conjunctive predicates; a list of filters matches their union
//! - **Subscriptions**: Live, cancellable feeds of newly stored events
//! - **Stats**: Per-author and per-event counters kept alongside inserts
//!
//! ## Example
//!
//! ```ignore
//! use relay_store::{CancelToken, EventDb, Filter, QueryOptions, StoreConfig};
//!
//! let db = EventDb::open(StoreConfig {
//!     path: "./events.sqlite3".into(),
//!     ..Default::default()
//! })?;
//!
//! // Live feed of notes tagged #rust
//! let feed = db.subscribe(vec![Filter::new().kinds([1u32]).tag("t", ["rust"])], CancelToken::new());
//!
//! // Store an event
//! db.store_event(&event, &CancelToken::new())?;
//!
//! // Ten newest notes by either author
//! let notes = db.query(
//!     &[Filter::new().kinds([1u32]).authors([alice, bob])],
//!     QueryOptions::limit(10),
//!     &CancelToken::new(),
//! )?;
//! ```

pub mod cancel;
pub mod db;
pub mod error;
pub mod filter;
pub mod indexing;
pub(crate) mod query;
pub(crate) mod schema;
pub mod stats;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use cancel::CancelToken;
pub use db::{EventDb, IngestOutcome};
pub use error::{Result, StoreError};
pub use filter::{matches_any, parse_filters, Filter};
pub use indexing::{build_search_content, indexable_tags, should_index};
pub use stats::StatsAggregator;
pub use store::{EventStore, StoreConfig};
pub use subscriptions::{Subscription, SubscriptionId, SubscriptionManager};
pub use types::*;
