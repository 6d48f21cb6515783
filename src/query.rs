//! Translation of filter sets into a single SQL statement.
//!
//! Each filter becomes one sub-select over `events`, joined to `tags` once
//! per constrained tag name, to `events_fts` when `search` is set and to
//! `users` when `local = true` (`local = false` is a `NOT EXISTS` anti-join).
//! The sub-selects are combined with `UNION`, so a filter set costs one
//! round trip and a single outer sort/limit.

use crate::filter::Filter;
use crate::indexing::search_tokens;
use rusqlite::types::Value;

/// Columns selected when materializing events, in `row_to_event` order.
pub(crate) const EVENT_COLUMNS: &str = "id, pubkey, kind, content, tags, created_at, sig";

/// SQL text with its positional parameters.
#[derive(Debug)]
pub(crate) struct SqlQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

/// What the outer statement returns.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Projection {
    /// Full event rows, newest first, per-filter limits applied.
    Events { limit: Option<usize> },
    /// Matching ids only, per-filter limits ignored.
    Ids,
    /// Number of matching events, per-filter limits ignored.
    Count,
}

/// Build the statement for `filters`. The caller handles the empty case.
pub(crate) fn build(filters: &[Filter], projection: Projection) -> SqlQuery {
    let apply_limits = matches!(projection, Projection::Events { .. });
    let mut params = Vec::new();

    let union = filters
        .iter()
        .map(|filter| format!("SELECT id FROM ({})", filter_select(filter, apply_limits, &mut params)))
        .collect::<Vec<_>>()
        .join(" UNION ");

    let sql = match projection {
        Projection::Events { limit } => {
            let mut sql = format!(
                "SELECT {} FROM events WHERE id IN ({}) ORDER BY created_at DESC, id ASC",
                EVENT_COLUMNS, union
            );
            if let Some(limit) = limit {
                sql.push_str(" LIMIT ?");
                params.push(Value::Integer(clamp_limit(limit)));
            }
            sql
        }
        Projection::Ids => union,
        Projection::Count => format!("SELECT COUNT(*) FROM ({})", union),
    };

    SqlQuery { sql, params }
}

/// One filter as a sub-select of `(id, created_at)`.
///
/// Parameters are pushed in the order their placeholders appear.
fn filter_select(filter: &Filter, apply_limit: bool, params: &mut Vec<Value>) -> String {
    let mut joins = Vec::new();
    let mut conditions = Vec::new();
    let mut where_params = Vec::new();

    for (i, (name, values)) in filter.tags.iter().enumerate() {
        if values.is_empty() {
            conditions.push("0".to_string());
            continue;
        }
        joins.push(format!(
            "JOIN tags AS t{i} ON t{i}.event_id = events.id AND t{i}.tag = ? AND t{i}.value IN ({})",
            placeholders(values.len())
        ));
        params.push(Value::Text(name.clone()));
        params.extend(values.iter().cloned().map(Value::Text));
    }

    if let Some(query) = &filter.search {
        joins.push("JOIN events_fts ON events_fts.rowid = events.seq".to_string());
        if let Some(expr) = fts_expression(query) {
            conditions.push("events_fts MATCH ?".to_string());
            where_params.push(Value::Text(expr));
        }
    }

    match filter.local {
        Some(true) => joins.push("JOIN users ON users.pubkey = events.pubkey".to_string()),
        Some(false) => conditions.push(
            "NOT EXISTS (SELECT 1 FROM users WHERE users.pubkey = events.pubkey)".to_string(),
        ),
        None => {}
    }

    if let Some(ids) = &filter.ids {
        conditions.push(in_condition("events.id", ids.len()));
        where_params.extend(ids.iter().cloned().map(Value::Text));
    }

    if let Some(kinds) = &filter.kinds {
        conditions.push(in_condition("events.kind", kinds.len()));
        where_params.extend(kinds.iter().map(|k| Value::Integer(i64::from(k.as_u32()))));
    }

    if let Some(authors) = &filter.authors {
        conditions.push(in_condition("events.pubkey", authors.len()));
        where_params.extend(authors.iter().cloned().map(Value::Text));
    }

    if let Some(since) = filter.since {
        conditions.push("events.created_at >= ?".to_string());
        where_params.push(Value::Integer(clamp_timestamp(since)));
    }

    if let Some(until) = filter.until {
        conditions.push("events.created_at <= ?".to_string());
        where_params.push(Value::Integer(clamp_timestamp(until)));
    }

    let mut sql = String::from("SELECT DISTINCT events.id AS id, events.created_at AS created_at FROM events");
    for join in &joins {
        sql.push(' ');
        sql.push_str(join);
    }
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    params.extend(where_params);

    if apply_limit {
        if let Some(limit) = filter.limit {
            sql.push_str(" ORDER BY events.created_at DESC LIMIT ?");
            params.push(Value::Integer(clamp_limit(limit)));
        }
    }

    sql
}

/// `column IN (?, ...)`, or a false condition for an empty set.
fn in_condition(column: &str, len: usize) -> String {
    if len == 0 {
        "0".to_string()
    } else {
        format!("{} IN ({})", column, placeholders(len))
    }
}

fn placeholders(len: usize) -> String {
    vec!["?"; len].join(", ")
}

/// Tokenize the query exactly like the index and match each token as a
/// quoted prefix. `None` when the query has no tokens.
fn fts_expression(query: &str) -> Option<String> {
    let tokens = search_tokens(query);
    if tokens.is_empty() {
        return None;
    }
    Some(
        tokens
            .iter()
            .map(|token| format!("\"{}\"*", token))
            .collect::<Vec<_>>()
            .join(" "),
    )
}

fn clamp_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn clamp_timestamp(ts: u64) -> i64 {
    i64::try_from(ts).unwrap_or(i64::MAX)
}
