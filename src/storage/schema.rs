//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Parsonic database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- Deduplicated business records
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_key TEXT NOT NULL UNIQUE,
    name_key TEXT NOT NULL,
    phone_key TEXT NOT NULL,
    email_key TEXT NOT NULL,
    fields TEXT NOT NULL,
    source_url TEXT NOT NULL,
    page_type TEXT NOT NULL,
    extracted_at TEXT NOT NULL,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_records_name ON records(name_key);
CREATE INDEX IF NOT EXISTS idx_records_last_seen ON records(last_seen, id);
CREATE INDEX IF NOT EXISTS idx_records_page_type ON records(page_type);

-- Frontier checkpoint, replaced as a whole on every save
CREATE TABLE IF NOT EXISTS frontier (
    identity TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    depth INTEGER NOT NULL,
    origin_domain TEXT NOT NULL,
    status TEXT NOT NULL,
    attempt_count INTEGER NOT NULL DEFAULT 0,
    discovered_from TEXT,
    page_type TEXT NOT NULL,
    not_before TEXT,
    position INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_frontier_status ON frontier(status);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
