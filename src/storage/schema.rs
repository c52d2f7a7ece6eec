//! Database schema definitions and migrations
//!
//! This module contains all SQL schema definitions for the Favorites-Keeper database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_type TEXT NOT NULL,
    start_time TEXT NOT NULL,
    end_time TEXT,
    status TEXT NOT NULL,
    items_count INTEGER NOT NULL DEFAULT 0,
    duration_seconds REAL NOT NULL DEFAULT 0,
    log_ref TEXT NOT NULL DEFAULT '',
    error_message TEXT,
    config_hash TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status);

-- Normalized favorites, keyed by the remote id
CREATE TABLE IF NOT EXISTS favorites (
    id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    collected_at TEXT NOT NULL,
    url TEXT NOT NULL,
    user_id TEXT NOT NULL,
    user_name TEXT NOT NULL,
    text TEXT NOT NULL,
    text_html TEXT NOT NULL,
    is_long_text INTEGER NOT NULL DEFAULT 0,
    links TEXT NOT NULL DEFAULT '[]',
    source TEXT NOT NULL,
    mblogid TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_favorites_collected ON favorites(collected_at);

-- The current session credential (single row)
CREATE TABLE IF NOT EXISTS credential (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    cookie TEXT NOT NULL,
    user_id TEXT,
    user_name TEXT,
    last_validated TEXT,
    valid INTEGER NOT NULL DEFAULT 0
);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
