//! Full-text search content extraction.

use crate::types::{Event, Kind};
use serde::Deserialize;

/// Search rows are truncated to this many characters.
pub const MAX_SEARCH_CHARS: usize = 1000;

/// Profile fields that are worth searching.
#[derive(Debug, Default, Deserialize)]
struct ProfileMetadata {
    name: Option<String>,
    nip05: Option<String>,
    about: Option<String>,
}

/// Plain-text blob to index for `event`, or `None` if its kind is not
/// searchable.
///
/// Profile metadata with unparseable content yields `None`.
pub fn build_search_content(event: &Event) -> Option<String> {
    let text = match event.kind {
        Kind::METADATA => {
            let profile: ProfileMetadata = serde_json::from_str(&event.content).ok()?;
            [profile.name, profile.nip05, profile.about]
                .into_iter()
                .flatten()
                .filter(|field| !field.is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        }
        Kind::TEXT_NOTE => event.content.clone(),
        _ => return None,
    };

    Some(truncate_chars(text, MAX_SEARCH_CHARS))
}

/// Split `text` the way the full-text index does: maximal runs of
/// alphanumeric characters, lowercased. Diacritics are kept.
pub fn search_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Every token of `query` is a prefix of some token of `text`. A query
/// without tokens matches any text.
pub fn search_matches(query: &str, text: &str) -> bool {
    let haystack = search_tokens(text);
    search_tokens(query)
        .iter()
        .all(|term| haystack.iter().any(|token| token.starts_with(term.as_str())))
}

fn truncate_chars(mut text: String, max: usize) -> String {
    if let Some((byte_idx, _)) = text.char_indices().nth(max) {
        text.truncate(byte_idx);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: Kind, content: &str) -> Event {
        Event {
            id: "0".repeat(64),
            pubkey: "a".repeat(64),
            created_at: 1,
            kind,
            tags: vec![],
            content: content.to_string(),
            sig: String::new(),
        }
    }

    #[test]
    fn test_text_note_verbatim() {
        let e = event(Kind::TEXT_NOTE, "hello  world\n");
        assert_eq!(build_search_content(&e).as_deref(), Some("hello  world\n"));
    }

    #[test]
    fn test_text_note_truncated() {
        let e = event(Kind::TEXT_NOTE, &"z".repeat(2000));
        let content = build_search_content(&e).unwrap();
        assert_eq!(content.chars().count(), MAX_SEARCH_CHARS);
    }

    #[test]
    fn test_truncation_counts_chars_not_bytes() {
        let e = event(Kind::TEXT_NOTE, &"é".repeat(1500));
        let content = build_search_content(&e).unwrap();
        assert_eq!(content.chars().count(), MAX_SEARCH_CHARS);
        assert_eq!(content.len(), MAX_SEARCH_CHARS * 2);
    }

    #[test]
    fn test_profile_fields_joined() {
        let e = event(
            Kind::METADATA,
            r#"{"name":"alex","about":"writes rust","picture":"https://x/y.png"}"#,
        );
        assert_eq!(build_search_content(&e).as_deref(), Some("alex\nwrites rust"));

        let full = event(
            Kind::METADATA,
            r#"{"name":"alex","nip05":"alex@example.com","about":"hi"}"#,
        );
        assert_eq!(
            build_search_content(&full).as_deref(),
            Some("alex\nalex@example.com\nhi")
        );
    }

    #[test]
    fn test_malformed_profile_not_indexed() {
        let e = event(Kind::METADATA, "not json");
        assert_eq!(build_search_content(&e), None);
    }

    #[test]
    fn test_tokens_split_on_punctuation() {
        assert_eq!(search_tokens("Hello, World!"), vec!["hello", "world"]);
        assert_eq!(search_tokens("Un café-noir"), vec!["un", "café", "noir"]);
        assert!(search_tokens("!!! ...").is_empty());
    }

    #[test]
    fn test_prefix_matching() {
        assert!(search_matches("RUST lang", "Learning rust, the language"));
        assert!(!search_matches("ust", "Learning Rust today"));
        assert!(!search_matches("lo wo", "hello world"));
        assert!(!search_matches("cafe", "Un café noir"));
        assert!(search_matches("!!!", "!!! wow"));
    }

    #[test]
    fn test_other_kinds_not_searchable() {
        assert_eq!(build_search_content(&event(Kind::REACTION, "+")), None);
        assert_eq!(build_search_content(&event(Kind(30_023), "long form")), None);
    }
}
