use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;

use super::types::Category;
use super::{LocalStore, META_EMBEDDING_MODEL, META_LAST_SYNC, META_SYNC_CURSOR};
use crate::db::{self, HealthReport};
use crate::error::Result;

/// Response from [`LocalStore::stats`].
#[derive(Debug, Serialize)]
pub struct StoreStats {
    pub store: String,
    pub total_lore: u64,
    pub active_lore: u64,
    pub deleted_lore: u64,
    pub unsynced_lore: u64,
    pub pending_feedback: u64,
    pub by_category: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_cursor: Option<String>,
    pub db_size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_lore: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_lore: Option<String>,
}

impl LocalStore {
    /// Compute record, queue, and sync statistics for this store.
    pub fn stats(&self) -> Result<StoreStats> {
        let db_size_bytes = std::fs::metadata(self.path())
            .map(|m| m.len())
            .unwrap_or(0);

        self.read(|conn| {
            let total = count(conn, "SELECT COUNT(*) FROM lore")?;
            let active = count(conn, "SELECT COUNT(*) FROM lore WHERE deleted_at IS NULL")?;
            let unsynced = count(conn, "SELECT COUNT(*) FROM lore WHERE synced_at IS NULL")?;
            let pending_feedback = count(conn, "SELECT COUNT(*) FROM feedback_queue")?;
            let (oldest, newest) = conn.query_row(
                "SELECT MIN(created_at), MAX(created_at) FROM lore WHERE deleted_at IS NULL",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            Ok(StoreStats {
                store: self.id().to_string(),
                total_lore: total,
                active_lore: active,
                deleted_lore: total - active,
                unsynced_lore: unsynced,
                pending_feedback,
                by_category: count_by_category(conn)?,
                embedding_model: metadata(conn, META_EMBEDDING_MODEL)?,
                last_sync: metadata(conn, META_LAST_SYNC)?,
                sync_cursor: metadata(conn, META_SYNC_CURSOR)?,
                db_size_bytes,
                oldest_lore: oldest,
                newest_lore: newest,
            })
        })
    }

    /// Integrity check and row counts for `lore doctor`.
    pub fn health(&self) -> Result<HealthReport> {
        self.read(|conn| Ok(db::check_database_health(conn)?))
    }
}

fn count(conn: &Connection, sql: &str) -> Result<u64> {
    let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(n as u64)
}

/// Active records per category; every category is present, zero or not.
fn count_by_category(conn: &Connection) -> Result<BTreeMap<String, u64>> {
    let mut map: BTreeMap<String, u64> = Category::ALL
        .iter()
        .map(|c| (c.as_str().to_string(), 0))
        .collect();

    let mut stmt = conn.prepare(
        "SELECT category, COUNT(*) FROM lore WHERE deleted_at IS NULL GROUP BY category",
    )?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    for (category, n) in rows {
        map.insert(category, n as u64);
    }
    Ok(map)
}

fn metadata(conn: &Connection, key: &str) -> Result<Option<String>> {
    use rusqlite::OptionalExtension;
    Ok(conn
        .query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| row.get(0))
        .optional()?)
}
