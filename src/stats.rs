//! Denormalized counters derived from inserted events.
//!
//! Counters only ever move by `+1` upserts; nothing here recomputes them
//! from the events table. Callers must apply each event at most once (the
//! [`crate::EventDb`] pipeline does so only for fresh inserts).

use crate::error::Result;
use crate::store::{EventStore, SqlitePool};
use crate::types::{Event, EventStats, Kind, PubkeyStats};
use rusqlite::{params, OptionalExtension};
use tracing::debug;

/// Which counter an event adjusts.
#[derive(Clone, Debug, PartialEq, Eq)]
enum StatDelta<'a> {
    Notes { pubkey: &'a str },
    Reposts { event_id: &'a str },
    Reactions { event_id: &'a str },
}

impl<'a> StatDelta<'a> {
    fn for_event(event: &'a Event) -> Option<Self> {
        match event.kind {
            Kind::TEXT_NOTE => Some(StatDelta::Notes {
                pubkey: &event.pubkey,
            }),
            Kind::REPOST => event
                .first_tag_value("e")
                .map(|event_id| StatDelta::Reposts { event_id }),
            Kind::REACTION => event
                .first_tag_value("e")
                .map(|event_id| StatDelta::Reactions { event_id }),
            _ => None,
        }
    }

    fn sql(&self) -> (&'static str, &'a str) {
        match self {
            StatDelta::Notes { pubkey } => (
                "INSERT INTO pubkey_stats (pubkey, notes_count) VALUES (?1, 1)
                 ON CONFLICT(pubkey) DO UPDATE SET notes_count = notes_count + 1",
                *pubkey,
            ),
            StatDelta::Reposts { event_id } => (
                "INSERT INTO event_stats (event_id, reposts_count) VALUES (?1, 1)
                 ON CONFLICT(event_id) DO UPDATE SET reposts_count = reposts_count + 1",
                *event_id,
            ),
            StatDelta::Reactions { event_id } => (
                "INSERT INTO event_stats (event_id, reactions_count) VALUES (?1, 1)
                 ON CONFLICT(event_id) DO UPDATE SET reactions_count = reactions_count + 1",
                *event_id,
            ),
        }
    }
}

/// Applies and reads stats counters.
#[derive(Clone)]
pub struct StatsAggregator {
    pool: SqlitePool,
}

impl StatsAggregator {
    /// Share the store's connection pool.
    pub fn new(store: &EventStore) -> Self {
        Self {
            pool: store.pool().clone(),
        }
    }

    /// Adjust the counter `event` affects, if any.
    ///
    /// Returns true if a counter changed.
    pub fn apply_event(&self, event: &Event) -> Result<bool> {
        let Some(delta) = StatDelta::for_event(event) else {
            return Ok(false);
        };

        let (sql, subject) = delta.sql();
        let conn = self.pool.get()?;
        conn.execute(sql, params![subject])?;

        debug!(id = %event.id, ?delta, "Stats updated");
        Ok(true)
    }

    pub fn pubkey_stats(&self, pubkey: &str) -> Result<Option<PubkeyStats>> {
        let conn = self.pool.get()?;
        Ok(conn
            .query_row(
                "SELECT pubkey, notes_count, followers_count, following_count
                 FROM pubkey_stats WHERE pubkey = ?1",
                params![pubkey],
                |row| {
                    Ok(PubkeyStats {
                        pubkey: row.get(0)?,
                        notes_count: count(row.get(1)?),
                        followers_count: count(row.get(2)?),
                        following_count: count(row.get(3)?),
                    })
                },
            )
            .optional()?)
    }

    pub fn event_stats(&self, event_id: &str) -> Result<Option<EventStats>> {
        let conn = self.pool.get()?;
        Ok(conn
            .query_row(
                "SELECT event_id, replies_count, reposts_count, reactions_count
                 FROM event_stats WHERE event_id = ?1",
                params![event_id],
                |row| {
                    Ok(EventStats {
                        event_id: row.get(0)?,
                        replies_count: count(row.get(1)?),
                        reposts_count: count(row.get(2)?),
                        reactions_count: count(row.get(3)?),
                    })
                },
            )
            .optional()?)
    }
}

fn count(value: i64) -> u64 {
    value.max(0) as u64
}
