pub mod migrations;
pub mod schema;

use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::Duration;

use crate::error::StoreError;

const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Open (or create) a store database at the given path with the schema
/// initialized and migrations applied.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection, StoreError> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;

    // WAL lets reader connections run beside the writer.
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;

    schema::init_schema(&conn)?;
    migrations::run_migrations(&conn)?;

    tracing::debug!(path = %path.display(), "database initialized");
    Ok(conn)
}

/// Open a read-only connection to an existing store database.
pub fn open_reader(path: impl AsRef<Path>) -> Result<Connection, StoreError> {
    let conn = Connection::open_with_flags(
        path.as_ref(),
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

/// Results of `PRAGMA integrity_check` plus row counts, for `lore doctor`.
#[derive(Debug)]
pub struct HealthReport {
    pub schema_version: u32,
    pub integrity_ok: bool,
    pub integrity_details: String,
    pub lore_count: u64,
    pub queue_count: u64,
}

pub fn check_database_health(conn: &Connection) -> Result<HealthReport, StoreError> {
    let schema_version = migrations::get_schema_version(conn)?;
    let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    let lore_count: i64 = conn.query_row("SELECT COUNT(*) FROM lore", [], |row| row.get(0))?;
    let queue_count: i64 =
        conn.query_row("SELECT COUNT(*) FROM feedback_queue", [], |row| row.get(0))?;

    Ok(HealthReport {
        schema_version,
        integrity_ok: integrity == "ok",
        integrity_details: integrity,
        lore_count: lore_count as u64,
        queue_count: queue_count as u64,
    })
}

/// Open an in-memory database for unit tests.
#[cfg(test)]
pub fn open_memory_database() -> Result<Connection, StoreError> {
    let conn = Connection::open_in_memory()?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    schema::init_schema(&conn)?;
    migrations::run_migrations(&conn)?;
    Ok(conn)
}
