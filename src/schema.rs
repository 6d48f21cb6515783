//! SQLite schema for events, their sparse indexes and stats counters.

use rusqlite::Connection;

/// Pragmas applied to every pooled connection.
pub(crate) const CONNECTION_PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA foreign_keys = ON;
    PRAGMA temp_store = MEMORY;
";

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS events (
        seq INTEGER PRIMARY KEY,
        id TEXT NOT NULL UNIQUE,
        pubkey TEXT NOT NULL,
        kind INTEGER NOT NULL,
        content TEXT NOT NULL,
        tags TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        sig TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at);
    CREATE INDEX IF NOT EXISTS idx_events_kind ON events(kind);
    CREATE INDEX IF NOT EXISTS idx_events_pubkey_created ON events(pubkey, created_at);

    CREATE TABLE IF NOT EXISTS tags (
        event_id TEXT NOT NULL REFERENCES events(id) ON DELETE CASCADE,
        tag TEXT NOT NULL,
        value TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_tags_tag_value ON tags(tag, value);
    CREATE INDEX IF NOT EXISTS idx_tags_event_id ON tags(event_id);

    -- rowid is events.seq. Diacritics are kept so stored and live matching agree.
    CREATE VIRTUAL TABLE IF NOT EXISTS events_fts USING fts5(
        content,
        tokenize = "unicode61 remove_diacritics 0"
    );

    CREATE TABLE IF NOT EXISTS users (
        pubkey TEXT PRIMARY KEY NOT NULL
    );

    CREATE TABLE IF NOT EXISTS pubkey_stats (
        pubkey TEXT PRIMARY KEY NOT NULL,
        notes_count INTEGER NOT NULL DEFAULT 0,
        followers_count INTEGER NOT NULL DEFAULT 0,
        following_count INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS event_stats (
        event_id TEXT PRIMARY KEY NOT NULL,
        replies_count INTEGER NOT NULL DEFAULT 0,
        reposts_count INTEGER NOT NULL DEFAULT 0,
        reactions_count INTEGER NOT NULL DEFAULT 0
    );
"#;

/// Create all tables and indexes if they don't exist.
pub(crate) fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}
