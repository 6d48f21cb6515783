//! Declarative event filters.
//!
//! A [`Filter`] is a conjunction of optional predicates; a slice of filters
//! is their union. Filters arrive as JSON objects of the shape
//!
//! ```text
//! {ids?, kinds?, authors?, since?, until?, limit?, search?, local?, "#<tag>"?: [..]}
//! ```
//!
//! and any other key is rejected. The same filter drives SQL generation for
//! historical queries (see [`crate::query`]) and in-memory matching for
//! live subscriptions ([`Filter::matches`]).

use crate::error::{Result, StoreError};
use crate::indexing::{build_search_content, search_matches};
use crate::types::{Event, Kind};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;

/// Predicate over events. Only fields that are set constrain the result.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawFilter")]
pub struct Filter {
    pub ids: Option<Vec<String>>,
    pub kinds: Option<Vec<Kind>>,
    pub authors: Option<Vec<String>>,
    /// Inclusive lower bound on `created_at`.
    pub since: Option<u64>,
    /// Inclusive upper bound on `created_at`.
    pub until: Option<u64>,
    /// Cap on how many events this filter contributes to a query.
    pub limit: Option<usize>,
    /// Free-text query against the search index.
    pub search: Option<String>,
    /// Author is (`true`) or is not (`false`) a registered local identity.
    pub local: Option<bool>,
    /// Tag name (without `#`) to acceptable values.
    pub tags: BTreeMap<String, Vec<String>>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn kinds<I, K>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Kind>,
    {
        self.kinds = Some(kinds.into_iter().map(Into::into).collect());
        self
    }

    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: u64) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn search(mut self, query: impl Into<String>) -> Self {
        self.search = Some(query.into());
        self
    }

    pub fn local(mut self, local: bool) -> Self {
        self.local = Some(local);
        self
    }

    /// Require a tag `name` whose value is one of `values`.
    pub fn tag<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Parse a single filter object.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| StoreError::InvalidFilter(e.to_string()))
    }

    /// Evaluate this filter against one event.
    ///
    /// Tag constraints look at the event's own tags, not the sparse index,
    /// so a tag that the indexing policy skipped still matches here.
    /// `limit` has no meaning for a single event and is ignored.
    pub fn matches(&self, event: &Event, author_is_local: bool) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.iter().any(|id| *id == event.id) {
                return false;
            }
        }

        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }

        if let Some(authors) = &self.authors {
            if !authors.iter().any(|a| *a == event.pubkey) {
                return false;
            }
        }

        if self.since.is_some_and(|since| event.created_at < since) {
            return false;
        }

        if self.until.is_some_and(|until| event.created_at > until) {
            return false;
        }

        for (name, values) in &self.tags {
            let found = event
                .tag_pairs()
                .any(|(n, v)| n == name.as_str() && values.iter().any(|want| want == v));
            if !found {
                return false;
            }
        }

        if let Some(local) = self.local {
            if local != author_is_local {
                return false;
            }
        }

        if let Some(query) = &self.search {
            match build_search_content(event) {
                Some(text) => return search_matches(query, &text),
                None => return false,
            }
        }

        true
    }
}

/// True if any filter in `filters` matches.
pub fn matches_any(filters: &[Filter], event: &Event, author_is_local: bool) -> bool {
    filters.iter().any(|f| f.matches(event, author_is_local))
}

/// Parse one filter object or an array of them.
pub fn parse_filters(json: &str) -> Result<Vec<Filter>> {
    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| StoreError::InvalidFilter(e.to_string()))?;

    let parsed = match value {
        serde_json::Value::Array(_) => serde_json::from_value(value),
        other => serde_json::from_value(other).map(|f| vec![f]),
    };
    parsed.map_err(|e| StoreError::InvalidFilter(e.to_string()))
}

/// Wire shape before tag keys are validated.
#[derive(Deserialize)]
struct RawFilter {
    ids: Option<Vec<String>>,
    kinds: Option<Vec<Kind>>,
    authors: Option<Vec<String>>,
    since: Option<u64>,
    until: Option<u64>,
    limit: Option<usize>,
    search: Option<String>,
    local: Option<bool>,
    #[serde(flatten)]
    rest: BTreeMap<String, serde_json::Value>,
}

impl TryFrom<RawFilter> for Filter {
    type Error = String;

    fn try_from(raw: RawFilter) -> std::result::Result<Self, Self::Error> {
        let mut tags = BTreeMap::new();
        for (key, value) in raw.rest {
            let name = match key.strip_prefix('#') {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => return Err(format!("unsupported filter field `{}`", key)),
            };
            let values: Vec<String> = serde_json::from_value(value)
                .map_err(|e| format!("`{}` must be an array of strings: {}", key, e))?;
            tags.insert(name, values);
        }

        Ok(Filter {
            ids: raw.ids,
            kinds: raw.kinds,
            authors: raw.authors,
            since: raw.since,
            until: raw.until,
            limit: raw.limit,
            search: raw.search,
            local: raw.local,
            tags,
        })
    }
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if let Some(ids) = &self.ids {
            map.serialize_entry("ids", ids)?;
        }
        if let Some(kinds) = &self.kinds {
            map.serialize_entry("kinds", kinds)?;
        }
        if let Some(authors) = &self.authors {
            map.serialize_entry("authors", authors)?;
        }
        if let Some(since) = self.since {
            map.serialize_entry("since", &since)?;
        }
        if let Some(until) = self.until {
            map.serialize_entry("until", &until)?;
        }
        if let Some(limit) = self.limit {
            map.serialize_entry("limit", &limit)?;
        }
        if let Some(search) = &self.search {
            map.serialize_entry("search", search)?;
        }
        if let Some(local) = self.local {
            map.serialize_entry("local", &local)?;
        }
        for (name, values) in &self.tags {
            map.serialize_entry(&format!("#{}", name), values)?;
        }
        map.end()
    }
}
