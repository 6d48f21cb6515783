//! Tag indexing policy.
//!
//! Only a closed set of tag names is ever indexed, each with a cap on how
//! many occurrences per event get a row. This bounds the number of index
//! rows a single event can produce.

use crate::types::Event;
use std::collections::HashMap;

/// Tag values longer than this are never indexed.
pub const MAX_TAG_VALUE_CHARS: usize = 200;

/// Tag names that can be indexed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum IndexedTag {
    /// Parameterized-replaceable identifier.
    D,
    /// Event reference.
    E,
    /// Pubkey reference.
    P,
    /// Quote reference.
    Q,
    /// Hashtag.
    T,
    /// Origin URL of a bridged event.
    Proxy,
    /// Attached media URL.
    Media,
}

impl IndexedTag {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "d" => Some(Self::D),
            "e" => Some(Self::E),
            "p" => Some(Self::P),
            "q" => Some(Self::Q),
            "t" => Some(Self::T),
            "proxy" => Some(Self::Proxy),
            "media" => Some(Self::Media),
            _ => None,
        }
    }
}

/// Decide whether one tag occurrence gets an index row.
///
/// `occurrence` counts prior tags with the same name in this event,
/// starting at 0, regardless of whether those were indexed.
pub fn should_index(
    name: &str,
    value: &str,
    event: &Event,
    occurrence: usize,
    author_is_local: bool,
) -> bool {
    if value.is_empty() || value.chars().count() > MAX_TAG_VALUE_CHARS {
        return false;
    }

    let Some(tag) = IndexedTag::from_name(name) else {
        return false;
    };

    match tag {
        IndexedTag::D => occurrence == 0 && event.kind.is_parameterized_replaceable(),
        IndexedTag::E => occurrence < 15 && is_hex_id(value),
        IndexedTag::P => {
            (occurrence < 15 || event.kind == crate::Kind::CONTACTS) && is_hex_id(value)
        }
        IndexedTag::Q => occurrence == 0 && event.kind == crate::Kind::TEXT_NOTE && is_hex_id(value),
        IndexedTag::T => occurrence < 5 && value.chars().count() < 50,
        IndexedTag::Proxy => occurrence == 0 && is_url(value),
        IndexedTag::Media => (author_is_local || occurrence < 4) && is_url(value),
    }
}

/// Apply the policy to every tag of `event`, in tag order.
pub fn indexable_tags(event: &Event, author_is_local: bool) -> Vec<(String, String)> {
    let mut occurrences: HashMap<&str, usize> = HashMap::new();
    let mut rows = Vec::new();

    for tag in &event.tags {
        let Some(name) = tag.first() else {
            continue;
        };
        let count = occurrences.entry(name.as_str()).or_insert(0);
        let occurrence = *count;
        *count += 1;

        if let Some(value) = tag.get(1) {
            if should_index(name, value, event, occurrence, author_is_local) {
                rows.push((name.clone(), value.clone()));
            }
        }
    }

    rows
}

/// 64 lowercase hex characters.
fn is_hex_id(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn is_url(value: &str) -> bool {
    url::Url::parse(value).is_ok()
}
