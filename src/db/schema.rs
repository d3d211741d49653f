//! SQL DDL for a store database.
//!
//! Defines the `lore`, `feedback_queue`, `metadata`, and `schema_meta` tables.
//! All DDL uses `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS lore (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    context TEXT,
    category TEXT NOT NULL CHECK(category IN (
        'architecture','pattern','convention','gotcha','dependency',
        'performance','security','testing','tooling'
    )),
    confidence REAL NOT NULL DEFAULT 0.5 CHECK(confidence >= 0.0 AND confidence <= 1.0),
    embedding BLOB,
    embedding_status TEXT NOT NULL DEFAULT 'pending'
        CHECK(embedding_status IN ('pending','ready','failed')),
    source_id TEXT,
    sources TEXT NOT NULL DEFAULT '[]',
    validation_count INTEGER NOT NULL DEFAULT 0 CHECK(validation_count >= 0),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    synced_at TEXT,
    deleted_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_lore_created ON lore(created_at, id);
CREATE INDEX IF NOT EXISTS idx_lore_synced ON lore(synced_at);
CREATE INDEX IF NOT EXISTS idx_lore_category ON lore(category);
CREATE INDEX IF NOT EXISTS idx_lore_confidence ON lore(confidence);

-- Feedback applied locally and not yet acknowledged by the remote
CREATE TABLE IF NOT EXISTS feedback_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    lore_id TEXT NOT NULL,
    outcome TEXT NOT NULL CHECK(outcome IN ('helpful','not_relevant','incorrect')),
    created_at TEXT NOT NULL
);

-- Per-store key/value metadata (embedding_model, last_sync, sync_cursor)
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
