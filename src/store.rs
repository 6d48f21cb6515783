//! SQLite-backed event store.
//!
//! Provides:
//! - Idempotent insertion with tag and full-text indexing in one transaction
//! - Multi-filter union queries, counts and deletes
//! - The local-identity set consumed by `local` filters

use crate::cancel::CancelToken;
use crate::error::{Result, StoreError};
use crate::filter::Filter;
use crate::indexing::{build_search_content, indexable_tags};
use crate::query::{self, Projection, EVENT_COLUMNS};
use crate::schema;
use crate::types::{Event, InsertOutcome, Kind, QueryOptions, StoredEvent};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connection pool shared by the store and the stats aggregator.
pub(crate) type SqlitePool = r2d2::Pool<SqliteConnectionManager>;

/// Number of SQLite VM instructions between cancellation checks.
const PROGRESS_OPS: i32 = 1000;

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Path of the SQLite database file.
    pub path: PathBuf,

    /// Maximum pooled connections.
    pub pool_size: u32,

    /// How long to wait for a free pooled connection.
    pub connection_timeout: Duration,

    /// How long a writer waits on SQLite's lock before failing.
    pub busy_timeout: Duration,

    /// Max buffered events per subscription before it is closed.
    pub subscription_buffer: usize,

    /// Whether to create the database if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./events.sqlite3"),
            pool_size: 8,
            connection_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
            subscription_buffer: 1000,
            create_if_missing: true,
        }
    }
}

/// Durable event storage.
#[derive(Clone)]
pub struct EventStore {
    pool: SqlitePool,
}

impl EventStore {
    /// Open the database, creating it and its schema if allowed.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        if !config.path.exists() {
            if !config.create_if_missing {
                return Err(StoreError::NotInitialized);
            }
            if let Some(parent) = config.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let busy_timeout = config.busy_timeout;
        let manager = SqliteConnectionManager::file(&config.path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.execute_batch(schema::CONNECTION_PRAGMAS)
        });

        let pool = r2d2::Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(config.connection_timeout)
            .build(manager)?;

        schema::init_schema(&*pool.get()?)?;

        info!(
            path = %config.path.display(),
            pool_size = config.pool_size,
            "Event store opened"
        );

        Ok(Self { pool })
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // --- Writes ---

    /// Persist `event` with its tag and search rows.
    ///
    /// All rows are written in one transaction. If an event with the same
    /// id already exists (the `events.id` uniqueness constraint fires) the
    /// transaction is rolled back and
    /// [`InsertOutcome::Duplicate`] is returned.
    pub fn insert(&self, event: &Event, cancel: &CancelToken) -> Result<InsertOutcome> {
        let mut conn = self.pool.get()?;

        interruptible(&mut conn, cancel, |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let tags_json = serde_json::to_string(&event.tags)?;

            let inserted = tx.execute(
                "INSERT INTO events (id, pubkey, kind, content, tags, created_at, sig)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    event.id,
                    event.pubkey,
                    event.kind.as_u32(),
                    event.content,
                    tags_json,
                    timestamp_to_sql(event.created_at),
                    event.sig,
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(e) if is_duplicate_key(&e) => {
                    debug!(id = %event.id, "Duplicate event ignored");
                    return Ok(InsertOutcome::Duplicate);
                }
                Err(e) => return Err(e.into()),
            }

            let seq = tx.last_insert_rowid();
            let author_is_local = is_local_author(&tx, &event.pubkey)?;

            {
                let mut stmt =
                    tx.prepare_cached("INSERT INTO tags (event_id, tag, value) VALUES (?1, ?2, ?3)")?;
                for (name, value) in indexable_tags(event, author_is_local) {
                    stmt.execute(params![event.id, name, value])?;
                }
            }

            if let Some(content) = build_search_content(event) {
                tx.execute(
                    "INSERT INTO events_fts (rowid, content) VALUES (?1, ?2)",
                    params![seq, content],
                )?;
            }

            cancel.check()?;
            tx.commit()?;

            debug!(id = %event.id, kind = %event.kind, "Event inserted");
            Ok(InsertOutcome::Inserted(StoredEvent {
                event: Arc::new(event.clone()),
                author_is_local,
            }))
        })
    }

    /// Remove every event matched by `filters`, ignoring per-filter limits.
    ///
    /// Returns the number of events removed.
    pub fn delete(&self, filters: &[Filter], cancel: &CancelToken) -> Result<usize> {
        if filters.is_empty() {
            return Ok(0);
        }

        let mut conn = self.pool.get()?;
        interruptible(&mut conn, cancel, |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            // Collect first: deleting search rows changes what `search` matches.
            let ids = {
                let q = query::build(filters, Projection::Ids);
                let mut stmt = tx.prepare(&q.sql)?;
                let rows = stmt.query_map(params_from_iter(q.params.iter()), |row| row.get(0))?;
                rows.collect::<rusqlite::Result<Vec<String>>>()?
            };

            {
                let mut del_fts = tx.prepare_cached(
                    "DELETE FROM events_fts WHERE rowid = (SELECT seq FROM events WHERE id = ?1)",
                )?;
                let mut del_tags = tx.prepare_cached("DELETE FROM tags WHERE event_id = ?1")?;
                let mut del_event = tx.prepare_cached("DELETE FROM events WHERE id = ?1")?;
                for id in &ids {
                    del_fts.execute(params![id])?;
                    del_tags.execute(params![id])?;
                    del_event.execute(params![id])?;
                }
            }

            cancel.check()?;
            tx.commit()?;

            debug!(count = ids.len(), "Events deleted");
            Ok(ids.len())
        })
    }

    // --- Reads ---

    /// Events matching any of `filters`, newest first.
    ///
    /// Each filter's `limit` caps its own contribution; `options.limit`
    /// caps the merged result.
    pub fn query(
        &self,
        filters: &[Filter],
        options: QueryOptions,
        cancel: &CancelToken,
    ) -> Result<Vec<Event>> {
        if filters.is_empty() {
            return Ok(Vec::new());
        }

        let q = query::build(filters, Projection::Events { limit: options.limit });
        let mut conn = self.pool.get()?;
        interruptible(&mut conn, cancel, |conn| {
            let mut stmt = conn.prepare(&q.sql)?;
            let rows = stmt.query_map(params_from_iter(q.params.iter()), row_to_event)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Number of events matching any of `filters`, ignoring limits.
    pub fn count(&self, filters: &[Filter], cancel: &CancelToken) -> Result<u64> {
        if filters.is_empty() {
            return Ok(0);
        }

        let q = query::build(filters, Projection::Count);
        let mut conn = self.pool.get()?;
        interruptible(&mut conn, cancel, |conn| {
            let count: i64 =
                conn.query_row(&q.sql, params_from_iter(q.params.iter()), |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
    }

    /// Fetch one event by id.
    pub fn get_event(&self, id: &str) -> Result<Option<Event>> {
        let conn = self.pool.get()?;
        let sql = format!("SELECT {} FROM events WHERE id = ?1", EVENT_COLUMNS);
        Ok(conn.query_row(&sql, params![id], row_to_event).optional()?)
    }

    /// Tag rows written for `event_id`, in insertion order.
    pub fn indexed_tags(&self, event_id: &str) -> Result<Vec<(String, String)>> {
        let conn = self.pool.get()?;
        let mut stmt =
            conn.prepare("SELECT tag, value FROM tags WHERE event_id = ?1 ORDER BY rowid")?;
        let rows = stmt.query_map(params![event_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Search row written for `event_id`, if any.
    pub fn search_content(&self, event_id: &str) -> Result<Option<String>> {
        let conn = self.pool.get()?;
        Ok(conn
            .query_row(
                "SELECT events_fts.content FROM events
                 JOIN events_fts ON events_fts.rowid = events.seq
                 WHERE events.id = ?1",
                params![event_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    // --- Local identities ---

    /// Register `pubkey` as a local identity. Idempotent.
    pub fn add_local_author(&self, pubkey: &str) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute("INSERT OR IGNORE INTO users (pubkey) VALUES (?1)", params![pubkey])?;
        Ok(())
    }

    /// Returns true if `pubkey` was registered.
    pub fn remove_local_author(&self, pubkey: &str) -> Result<bool> {
        let conn = self.pool.get()?;
        let removed = conn.execute("DELETE FROM users WHERE pubkey = ?1", params![pubkey])?;
        Ok(removed > 0)
    }

    pub fn is_local_author(&self, pubkey: &str) -> Result<bool> {
        let conn = self.pool.get()?;
        Ok(is_local_author(&conn, pubkey)?)
    }
}

/// Run `op` with an SQLite progress handler that aborts it once `cancel`
/// fires. Any failure observed after the token fired is reported as
/// [`StoreError::Cancelled`].
fn interruptible<T>(
    conn: &mut Connection,
    cancel: &CancelToken,
    op: impl FnOnce(&mut Connection) -> Result<T>,
) -> Result<T> {
    cancel.check()?;

    conn.progress_handler(PROGRESS_OPS, Some(cancel.interrupt_check()));
    let result = op(conn);
    conn.progress_handler(0, None::<fn() -> bool>);

    // The handler can also abort the rollback issued when `op` dropped its
    // transaction, leaving it open on a pooled connection.
    if !conn.is_autocommit() {
        if let Err(e) = conn.execute_batch("ROLLBACK") {
            warn!(error = %e, "Rollback after failed operation failed");
        }
    }

    match result {
        Err(e) if cancel.is_cancelled() => {
            warn!(error = %e, "Store operation cancelled");
            Err(StoreError::Cancelled)
        }
        other => other,
    }
}

fn is_local_author(conn: &Connection, pubkey: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM users WHERE pubkey = ?1)",
        params![pubkey],
        |row| row.get(0),
    )
}

/// Uniqueness violation on `events.id`. Other constraint failures are
/// real errors.
fn is_duplicate_key(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, Some(msg))
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                && msg.contains("events.id")
    )
}

fn timestamp_to_sql(ts: u64) -> i64 {
    i64::try_from(ts).unwrap_or(i64::MAX)
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<Event> {
    let tags_json: String = row.get(4)?;
    let tags = serde_json::from_str(&tags_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    let created_at: i64 = row.get(5)?;

    Ok(Event {
        id: row.get(0)?,
        pubkey: row.get(1)?,
        kind: Kind(row.get(2)?),
        content: row.get(3)?,
        tags,
        created_at: created_at.max(0) as u64,
        sig: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::TempDir;

    const BULK_EVENTS: i64 = 200_000;

    fn test_store(dir: &TempDir) -> EventStore {
        EventStore::open(&StoreConfig {
            path: dir.path().join("events.sqlite3"),
            ..Default::default()
        })
        .unwrap()
    }

    fn note(pubkey: &str, created_at: u64, content: &str) -> Event {
        let mut event = Event {
            id: String::new(),
            pubkey: pubkey.to_string(),
            created_at,
            kind: Kind::TEXT_NOTE,
            tags: vec![vec!["t".into(), "rust".into()]],
            content: content.to_string(),
            sig: "00".repeat(64),
        };
        event.id = event.compute_id();
        event
    }

    #[test]
    fn test_insert_and_get() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let event = note("alice", 10, "hello");

        let outcome = store.insert(&event, &CancelToken::new()).unwrap();
        let stored = outcome.stored().unwrap();
        assert_eq!(*stored.event, event);
        assert!(!stored.author_is_local);

        assert_eq!(store.get_event(&event.id).unwrap(), Some(event.clone()));
        assert_eq!(store.indexed_tags(&event.id).unwrap(), vec![("t".into(), "rust".into())]);
        assert_eq!(store.search_content(&event.id).unwrap().as_deref(), Some("hello"));
    }

    #[test]
    fn test_duplicate_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let event = note("alice", 10, "hello");
        let cancel = CancelToken::new();

        assert!(!store.insert(&event, &cancel).unwrap().is_duplicate());
        assert!(store.insert(&event, &cancel).unwrap().is_duplicate());
        assert_eq!(store.indexed_tags(&event.id).unwrap().len(), 1);
    }

    #[test]
    fn test_insert_reports_local_author() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        store.add_local_author("alice").unwrap();
        store.add_local_author("alice").unwrap();

        let outcome = store.insert(&note("alice", 1, "x"), &CancelToken::new()).unwrap();
        assert!(outcome.stored().unwrap().author_is_local);

        assert!(store.remove_local_author("alice").unwrap());
        assert!(!store.remove_local_author("alice").unwrap());
        assert!(!store.is_local_author("alice").unwrap());
    }

    #[test]
    fn test_cancelled_insert_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let event = note("alice", 1, "x");
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = store.insert(&event, &cancel).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(store.get_event(&event.id).unwrap(), None);
    }

    /// Load bare events straight through SQL, much faster than `insert`.
    fn bulk_load(store: &EventStore, n: i64) {
        let conn = store.pool().get().unwrap();
        conn.execute(
            "WITH RECURSIVE seq(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM seq WHERE n < ?1)
             INSERT INTO events (id, pubkey, kind, content, tags, created_at, sig)
             SELECT printf('%064x', n), printf('%064x', n % 97), 1, 'bulk', '[]', n, '' FROM seq",
            params![n],
        )
        .unwrap();
    }

    /// Filters whose union is expensive to evaluate over a bulk-loaded store.
    fn heavy_filters() -> Vec<Filter> {
        (0..50).map(|i| Filter::new().local(false).since(i)).collect()
    }

    fn cancel_after(cancel: &CancelToken, delay: Duration) -> thread::JoinHandle<()> {
        let cancel = cancel.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            cancel.cancel();
        })
    }

    #[test]
    fn test_cancel_interrupts_running_query() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        bulk_load(&store, BULK_EVENTS);

        let cancel = CancelToken::new();
        let canceller = cancel_after(&cancel, Duration::from_millis(50));
        let err = store
            .query(&heavy_filters(), QueryOptions::default(), &cancel)
            .unwrap_err();
        canceller.join().unwrap();
        assert!(err.is_cancelled());

        let cancel = CancelToken::new();
        let canceller = cancel_after(&cancel, Duration::from_millis(50));
        let err = store.count(&heavy_filters(), &cancel).unwrap_err();
        canceller.join().unwrap();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_deadline_interrupts_running_count() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        bulk_load(&store, BULK_EVENTS);

        let cancel = CancelToken::with_timeout(Duration::from_millis(50));
        let err = store.count(&heavy_filters(), &cancel).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_cancel_mid_delete_rolls_back() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        bulk_load(&store, BULK_EVENTS);

        let cancel = CancelToken::new();
        let canceller = cancel_after(&cancel, Duration::from_millis(50));
        let err = store.delete(&[Filter::new()], &cancel).unwrap_err();
        canceller.join().unwrap();
        assert!(err.is_cancelled());

        let live = CancelToken::new();
        assert_eq!(store.count(&[Filter::new()], &live).unwrap(), BULK_EVENTS as u64);
        assert!(store.get_event(&format!("{:064x}", 1)).unwrap().is_some());

        // Pooled connections are usable for writes again.
        for _ in 0..3 {
            let event = note("alice", 1, "after cancel");
            assert!(!store.insert(&event, &live).unwrap().is_duplicate());
            assert_eq!(store.delete(&[Filter::new().ids([event.id])], &live).unwrap(), 1);
        }
    }

    #[test]
    fn test_empty_filter_list() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        store.insert(&note("alice", 1, "x"), &CancelToken::new()).unwrap();

        let cancel = CancelToken::new();
        assert!(store.query(&[], QueryOptions::default(), &cancel).unwrap().is_empty());
        assert_eq!(store.count(&[], &cancel).unwrap(), 0);
        assert_eq!(store.delete(&[], &cancel).unwrap(), 0);
    }
}
