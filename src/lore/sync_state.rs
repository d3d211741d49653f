//! The narrow surface the sync engine drives: metadata, snapshot replace,
//! dirty-record collection, sync marking, and delta application.

use std::io::BufRead;

use rusqlite::{params, params_from_iter, OptionalExtension};

use super::feedback::placeholders;
use super::store::{insert_record, record_from_row, RECORD_COLUMNS};
use super::types::LoreRecord;
use super::{timestamp, LocalStore, StoreError, META_LAST_SYNC, META_SYNC_CURSOR};
use crate::error::{Error, Result};

/// Counts from one applied delta page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaApplied {
    pub upserted: usize,
    pub deleted: usize,
}

impl LocalStore {
    /// Metadata value for `key`, or an empty string when unset.
    pub fn get_metadata(&self, key: &str) -> Result<String> {
        self.read(|conn| {
            Ok(conn
                .query_row(
                    "SELECT value FROM metadata WHERE key = ?1",
                    params![key],
                    |row| row.get::<_, String>(0),
                )
                .optional()?
                .unwrap_or_default())
        })
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.write(|conn| {
            conn.execute(
                "INSERT INTO metadata (key, value) VALUES (?1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
    }

    /// Replace every record with the contents of an NDJSON snapshot.
    ///
    /// Runs as one exclusive transaction: existing records, queued feedback
    /// and the `last_sync`/`sync_cursor` markers are discarded, then each line
    /// is inserted as a synced record. Any unreadable line rolls the whole
    /// replace back. `cursor` is the change-log position the snapshot
    /// corresponds to, if the remote reported one.
    pub fn replace_from_snapshot(&self, reader: impl BufRead, cursor: Option<&str>) -> Result<usize> {
        let synced_at = timestamp();
        let count = self.write(|conn| {
            let tx = conn.transaction()?;
            tx.execute_batch(
                "DELETE FROM lore;
                 DELETE FROM feedback_queue;",
            )?;
            tx.execute(
                "DELETE FROM metadata WHERE key IN (?1, ?2)",
                params![META_LAST_SYNC, META_SYNC_CURSOR],
            )?;

            let mut count = 0;
            for (index, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let mut record: LoreRecord = serde_json::from_str(&line).map_err(|e| {
                    StoreError::Corrupt(format!("snapshot line {}: {e}", index + 1))
                })?;
                record.synced_at.get_or_insert_with(|| synced_at.clone());
                record.sync_error = None;
                insert_record(&tx, &record)?;
                count += 1;
            }

            if let Some(cursor) = cursor {
                tx.execute(
                    "INSERT INTO metadata (key, value) VALUES (?1, ?2)",
                    params![META_SYNC_CURSOR, cursor],
                )?;
            }

            tx.commit()?;
            Ok(count)
        })?;

        tracing::info!(store = %self.id(), records = count, "snapshot replaced local store");
        Ok(count)
    }

    /// Visible records not yet pushed, oldest first (id breaks ties).
    pub fn unsynced(&self) -> Result<Vec<LoreRecord>> {
        self.select_records(
            "synced_at IS NULL AND deleted_at IS NULL ORDER BY created_at, id",
        )
    }

    /// Locally tombstoned records whose deletion has not been pushed.
    pub fn unsynced_deletions(&self) -> Result<Vec<LoreRecord>> {
        self.select_records(
            "synced_at IS NULL AND deleted_at IS NOT NULL ORDER BY created_at, id",
        )
    }

    /// Every record, tombstones included, in creation order.
    pub fn all_records(&self) -> Result<Vec<LoreRecord>> {
        self.select_records("1 = 1 ORDER BY created_at, id")
    }

    fn select_records(&self, clause: &str) -> Result<Vec<LoreRecord>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {RECORD_COLUMNS} FROM lore WHERE {clause}"))?;
            let records = stmt
                .query_map([], record_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
    }

    /// Set `synced_at = synced_at_ts` for dirty records among `ids`.
    ///
    /// Records edited after `synced_at_ts` stay dirty. Already-synced ids are
    /// left untouched, so repeating the call changes nothing.
    pub fn mark_synced(&self, ids: &[String], synced_at_ts: &str) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE lore SET synced_at = ?1, sync_error = NULL \
             WHERE synced_at IS NULL AND updated_at <= ?1 AND id IN ({})",
            shifted_placeholders(ids.len(), 1)
        );
        let values = std::iter::once(synced_at_ts).chain(ids.iter().map(String::as_str));
        self.write(|conn| Ok(conn.execute(&sql, params_from_iter(values))?))
    }

    /// Remember the rejection message for each id. The records stay dirty.
    pub fn record_push_errors(&self, errors: &[(String, String)]) -> Result<()> {
        if errors.is_empty() {
            return Ok(());
        }
        self.write(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare("UPDATE lore SET sync_error = ?1 WHERE id = ?2")?;
                for (id, message) in errors {
                    stmt.execute(params![message, id])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Apply one delta page: upserts, then tombstones, then the cursor, all
    /// in a single transaction.
    ///
    /// Remote records overwrite local ones, but an existing tombstone is never
    /// cleared by an upsert. A local deletion that has not been pushed yet
    /// keeps its `updated_at` and stays dirty so the next push still sends it.
    pub fn apply_delta(
        &self,
        changes: &[LoreRecord],
        deleted_ids: &[String],
        cursor: Option<&str>,
    ) -> Result<DeltaApplied> {
        let now = timestamp();
        self.write(|conn| {
            let tx = conn.transaction()?;
            let mut applied = DeltaApplied::default();
            {
                let mut upsert = tx.prepare(
                    "INSERT INTO lore (id, content, context, category, confidence, embedding, \
                     embedding_status, source_id, sources, validation_count, created_at, \
                     updated_at, synced_at, deleted_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14) \
                     ON CONFLICT(id) DO UPDATE SET \
                       content = excluded.content, context = excluded.context, \
                       category = excluded.category, confidence = excluded.confidence, \
                       embedding = excluded.embedding, \
                       embedding_status = excluded.embedding_status, \
                       source_id = excluded.source_id, sources = excluded.sources, \
                       validation_count = excluded.validation_count, \
                       updated_at = CASE WHEN lore.deleted_at IS NOT NULL AND lore.synced_at IS NULL \
                         THEN lore.updated_at ELSE excluded.updated_at END, \
                       synced_at = CASE WHEN lore.deleted_at IS NOT NULL AND lore.synced_at IS NULL \
                         THEN NULL ELSE excluded.synced_at END, \
                       deleted_at = COALESCE(lore.deleted_at, excluded.deleted_at), \
                       sync_error = NULL",
                )?;
                for record in changes {
                    upsert.execute(params![
                        record.id,
                        record.content,
                        record.context,
                        record.category.as_str(),
                        record.confidence,
                        record.embedding,
                        record.embedding_status.as_str(),
                        record.source_id,
                        serde_json::to_string(&record.sources)?,
                        record.validation_count,
                        record.created_at,
                        record.updated_at,
                        now,
                        record.deleted_at,
                    ])?;
                    applied.upserted += 1;
                }

                let mut tombstone = tx.prepare(
                    "UPDATE lore SET deleted_at = COALESCE(deleted_at, ?1), synced_at = ?1 \
                     WHERE id = ?2",
                )?;
                for id in deleted_ids {
                    applied.deleted += tombstone.execute(params![now, id])?;
                }
            }

            if let Some(cursor) = cursor {
                tx.execute(
                    "INSERT INTO metadata (key, value) VALUES (?1, ?2) \
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![META_SYNC_CURSOR, cursor],
                )?;
            }

            tx.commit()?;
            Ok(applied)
        })
    }

    /// Fail with [`Error::NotFound`] unless `id` names a visible record.
    pub fn ensure_visible(&self, id: &str) -> Result<()> {
        match self.get(id)? {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("lore {id} in store {}", self.id()))),
        }
    }
}

/// `?{offset+1}, ?{offset+2}, ...` for an `IN` list after `offset` leading parameters.
fn shifted_placeholders(n: usize, offset: usize) -> String {
    (offset + 1..=offset + n)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lore::test_support::temp_store;
    use crate::lore::{Category, NewLore, META_EMBEDDING_MODEL};

    #[test]
    fn metadata_defaults_to_empty() {
        let (_dir, store) = temp_store();
        assert_eq!(store.get_metadata(META_EMBEDDING_MODEL).unwrap(), "");
        store.set_metadata(META_EMBEDDING_MODEL, "m1").unwrap();
        store.set_metadata(META_EMBEDDING_MODEL, "m2").unwrap();
        assert_eq!(store.get_metadata(META_EMBEDDING_MODEL).unwrap(), "m2");
    }

    #[test]
    fn unsynced_is_in_creation_order() {
        let (_dir, store) = temp_store();
        let ids: Vec<String> = (0..5)
            .map(|i| {
                store
                    .capture(NewLore::new(format!("lore {i}"), Category::Pattern))
                    .unwrap()
                    .id
            })
            .collect();

        let unsynced: Vec<String> = store.unsynced().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(unsynced, ids);
    }

    #[test]
    fn mark_synced_twice_is_identical() {
        let (_dir, store) = temp_store();
        let id = store.capture(NewLore::new("x", Category::Pattern)).unwrap().id;

        let first_ts = timestamp();
        assert_eq!(store.mark_synced(&[id.clone()], &first_ts).unwrap(), 1);
        let after_first = store.get(&id).unwrap().unwrap();

        let second_ts = timestamp();
        assert_eq!(store.mark_synced(&[id.clone()], &second_ts).unwrap(), 0);
        let after_second = store.get(&id).unwrap().unwrap();

        assert_eq!(after_first, after_second);
        assert!(store.unsynced().unwrap().is_empty());
    }

    #[test]
    fn mark_synced_skips_records_edited_later() {
        let (_dir, store) = temp_store();
        let id = store.capture(NewLore::new("x", Category::Pattern)).unwrap().id;
        let collected_at = "2000-01-01T00:00:00.000000Z";

        assert_eq!(store.mark_synced(&[id.clone()], collected_at).unwrap(), 0);
        assert_eq!(store.unsynced().unwrap().len(), 1);
    }

    #[test]
    fn push_errors_are_kept_with_dirty_records() {
        let (_dir, store) = temp_store();
        let id = store.capture(NewLore::new("x", Category::Pattern)).unwrap().id;
        store
            .record_push_errors(&[(id.clone(), "duplicate content".into())])
            .unwrap();

        let unsynced = store.unsynced().unwrap();
        assert_eq!(unsynced[0].sync_error.as_deref(), Some("duplicate content"));

        store.mark_synced(&[id.clone()], &timestamp()).unwrap();
        assert!(store.get(&id).unwrap().unwrap().sync_error.is_none());
    }

    #[test]
    fn snapshot_replace_is_all_or_nothing() {
        let (_dir, store) = temp_store();
        let keep = store.capture(NewLore::new("local", Category::Pattern)).unwrap();
        store.set_metadata(META_SYNC_CURSOR, "7").unwrap();

        let snapshot = format!(
            "{}\nnot json\n",
            r#"{"id":"r1","content":"remote","category":"gotcha","confidence":0.9,"created_at":"2026-01-01T00:00:00.000000Z","updated_at":"2026-01-01T00:00:00.000000Z"}"#
        );
        let result = store.replace_from_snapshot(snapshot.as_bytes(), Some("9"));
        assert!(result.is_err());

        let records = store.all_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, keep.id);
        assert_eq!(store.get_metadata(META_SYNC_CURSOR).unwrap(), "7");
    }

    #[test]
    fn snapshot_replace_swaps_contents() {
        let (_dir, store) = temp_store();
        store.capture(NewLore::new("local", Category::Pattern)).unwrap();
        store.set_metadata(META_LAST_SYNC, "old").unwrap();

        let snapshot = concat!(
            r#"{"id":"r1","content":"one","category":"gotcha","confidence":0.9,"created_at":"2026-01-01T00:00:00.000000Z","updated_at":"2026-01-01T00:00:00.000000Z"}"#,
            "\n\n",
            r#"{"id":"r2","content":"two","category":"testing","confidence":0.4,"sources":["b","a"],"created_at":"2026-01-02T00:00:00.000000Z","updated_at":"2026-01-02T00:00:00.000000Z"}"#,
            "\n"
        );
        assert_eq!(store.replace_from_snapshot(snapshot.as_bytes(), None).unwrap(), 2);

        let records = store.all_records().unwrap();
        assert_eq!(records.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), ["r1", "r2"]);
        assert!(records.iter().all(|r| !r.is_dirty()));
        assert_eq!(records[1].sources.iter().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(store.get_metadata(META_LAST_SYNC).unwrap(), "");
    }

    #[test]
    fn delta_tombstones_are_sticky() {
        let (_dir, store) = temp_store();
        let record = store.capture(NewLore::new("v1", Category::Pattern)).unwrap();

        let applied = store
            .apply_delta(&[], std::slice::from_ref(&record.id), Some("c1"))
            .unwrap();
        assert_eq!(applied, DeltaApplied { upserted: 0, deleted: 1 });

        let mut late = record.clone();
        late.content = "v2".into();
        store.apply_delta(&[late], &[], Some("c2")).unwrap();

        let stored = store.get_with_tombstone(&record.id).unwrap().unwrap();
        assert!(stored.is_deleted());
        assert_eq!(stored.content, "v2");
        assert!(store.get(&record.id).unwrap().is_none());
        assert_eq!(store.get_metadata(META_SYNC_CURSOR).unwrap(), "c2");
    }

    #[test]
    fn delta_applies_deletes_after_upserts_in_page() {
        let (_dir, store) = temp_store();
        let mut remote = store.capture(NewLore::new("remote", Category::Pattern)).unwrap();
        remote.id = "remote-1".into();

        let applied = store
            .apply_delta(std::slice::from_ref(&remote), &["remote-1".to_string()], None)
            .unwrap();
        assert_eq!(applied, DeltaApplied { upserted: 1, deleted: 1 });
        assert!(store.get("remote-1").unwrap().is_none());
    }
}
