//! Core types for the event store.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Integer event kind.
///
/// The numeric range a kind falls into determines how clients treat it
/// (regular, replaceable, ephemeral, parameterized-replaceable).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kind(pub u32);

impl Kind {
    /// Profile metadata (JSON content with name, nip05, about, ...).
    pub const METADATA: Kind = Kind(0);
    /// Short text note.
    pub const TEXT_NOTE: Kind = Kind(1);
    /// Contact list.
    pub const CONTACTS: Kind = Kind(3);
    /// Repost of another event.
    pub const REPOST: Kind = Kind(6);
    /// Reaction to another event.
    pub const REACTION: Kind = Kind(7);

    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Only the latest event per author is current.
    pub fn is_replaceable(self) -> bool {
        self.0 == 0 || self.0 == 3 || (10_000..20_000).contains(&self.0)
    }

    /// Delivered live, never expected to be stored.
    pub fn is_ephemeral(self) -> bool {
        (20_000..30_000).contains(&self.0)
    }

    /// Latest event per author and `d` tag is current.
    pub fn is_parameterized_replaceable(self) -> bool {
        (30_000..40_000).contains(&self.0)
    }

    pub fn is_regular(self) -> bool {
        !self.is_replaceable() && !self.is_ephemeral() && !self.is_parameterized_replaceable()
    }
}

impl From<u32> for Kind {
    fn from(value: u32) -> Self {
        Kind(value)
    }
}

impl fmt::Debug for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Kind({})", self.0)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A signed, content-addressed event. Immutable once persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Hex SHA-256 of the canonical serialization.
    pub id: String,

    /// Author public key (hex).
    pub pubkey: String,

    /// Seconds since Unix epoch.
    pub created_at: u64,

    pub kind: Kind,

    /// Tag rows; the first element of each row is the tag name.
    pub tags: Vec<Vec<String>>,

    pub content: String,

    /// Signature over `id`. Opaque to the store.
    pub sig: String,
}

impl Event {
    /// Compute the content hash of this event.
    ///
    /// The hash covers `[0, pubkey, created_at, kind, tags, content]`
    /// serialized as compact JSON.
    pub fn compute_id(&self) -> String {
        let canonical = serde_json::json!([
            0,
            self.pubkey,
            self.created_at,
            self.kind,
            self.tags,
            self.content
        ]);
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Whether `id` matches the content hash.
    pub fn verify_id(&self) -> bool {
        self.id == self.compute_id()
    }

    /// Iterate `(name, value)` for every tag that has at least a value.
    pub fn tag_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().filter_map(|tag| match tag.as_slice() {
            [name, value, ..] => Some((name.as_str(), value.as_str())),
            _ => None,
        })
    }

    /// Value of the first tag named `name`.
    pub fn first_tag_value(&self, name: &str) -> Option<&str> {
        self.tag_pairs().find(|(n, _)| *n == name).map(|(_, v)| v)
    }
}

/// An event as it left a successful insert.
#[derive(Clone, Debug)]
pub struct StoredEvent {
    pub event: Arc<Event>,

    /// Whether the author is a registered local identity at insert time.
    pub author_is_local: bool,
}

/// Result of inserting an event.
#[derive(Clone, Debug)]
pub enum InsertOutcome {
    /// The event was new and is now persisted.
    Inserted(StoredEvent),
    /// An event with the same id already existed. Nothing changed.
    Duplicate,
}

impl InsertOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, InsertOutcome::Duplicate)
    }

    pub fn stored(&self) -> Option<&StoredEvent> {
        match self {
            InsertOutcome::Inserted(stored) => Some(stored),
            InsertOutcome::Duplicate => None,
        }
    }
}

/// Options applied to a whole multi-filter query.
#[derive(Clone, Copy, Debug, Default)]
pub struct QueryOptions {
    /// Cap on the merged result, applied after sorting.
    pub limit: Option<usize>,
}

impl QueryOptions {
    pub fn limit(limit: usize) -> Self {
        Self { limit: Some(limit) }
    }
}

/// Denormalized per-author counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubkeyStats {
    pub pubkey: String,
    pub notes_count: u64,
    pub followers_count: u64,
    pub following_count: u64,
}

/// Denormalized per-event counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStats {
    pub event_id: String,
    pub replies_count: u64,
    pub reposts_count: u64,
    pub reactions_count: u64,
}
