//! Pure indexing policies applied at insert time.
//!
//! - [`tags`]: which tag occurrences get a secondary-index row
//! - [`search`]: the plain-text blob written to the full-text index

pub mod search;
pub mod tags;

pub use search::{build_search_content, search_matches, search_tokens, MAX_SEARCH_CHARS};
pub use tags::{indexable_tags, should_index, MAX_TAG_VALUE_CHARS};
