//! Feedback: confidence adjustment and the outgoing feedback queue.

use rusqlite::{params, params_from_iter, Connection};

use super::store::fetch_record;
use super::types::{FeedbackApplied, FeedbackEntry, FeedbackOutcome};
use super::{timestamp, LocalStore};
use crate::error::{Error, Result};

impl LocalStore {
    /// Apply an outcome to a visible record and queue it for the next push.
    ///
    /// `validation_count` increments for every outcome. `synced_at` is only
    /// cleared when the confidence value actually moved.
    pub fn apply_feedback(&self, lore_id: &str, outcome: FeedbackOutcome) -> Result<FeedbackApplied> {
        let mut applied = self.apply_feedback_batch(&[lore_id], outcome)?;
        applied.pop().ok_or_else(|| Error::NotFound(format!("lore {lore_id}")))
    }

    /// Apply one outcome to several records in a single transaction.
    ///
    /// Every id is checked and updated under the writer lock, so either all
    /// of them receive the outcome or, when any is missing or deleted, none do.
    pub fn apply_feedback_batch(
        &self,
        lore_ids: &[&str],
        outcome: FeedbackOutcome,
    ) -> Result<Vec<FeedbackApplied>> {
        let applied = self.write(|conn| {
            let tx = conn.transaction()?;
            let now = timestamp();
            let applied = lore_ids
                .iter()
                .map(|lore_id| apply_one(&tx, lore_id, outcome, &now))
                .collect::<Result<Vec<_>>>()?;
            tx.commit()?;
            Ok(applied)
        })?;

        for entry in &applied {
            tracing::info!(
                store = %self.id(),
                id = %entry.lore_id,
                outcome = %outcome,
                confidence = entry.confidence,
                "feedback applied"
            );
        }
        Ok(applied)
    }

    /// Queued feedback in the order it was applied.
    pub fn pending_feedback(&self) -> Result<Vec<FeedbackEntry>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, lore_id, outcome, created_at FROM feedback_queue ORDER BY id",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(id, lore_id, outcome, created_at)| {
                    let outcome = outcome.parse().map_err(|e: String| {
                        Error::LocalIo(super::StoreError::Corrupt(e))
                    })?;
                    Ok(FeedbackEntry {
                        id,
                        lore_id,
                        outcome,
                        created_at,
                    })
                })
                .collect()
        })
    }

    /// Drop acknowledged entries from the queue. Unknown ids are ignored.
    pub fn mark_feedback_synced(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = placeholders(ids.len());
        self.write(|conn| {
            Ok(conn.execute(
                &format!("DELETE FROM feedback_queue WHERE id IN ({placeholders})"),
                params_from_iter(ids),
            )?)
        })
    }
}

fn apply_one(
    conn: &Connection,
    lore_id: &str,
    outcome: FeedbackOutcome,
    now: &str,
) -> Result<FeedbackApplied> {
    let record = fetch_record(conn, lore_id)?
        .filter(|r| !r.is_deleted())
        .ok_or_else(|| Error::NotFound(format!("lore {lore_id}")))?;

    let confidence = outcome.adjust(record.confidence);
    let changed = confidence != record.confidence;

    conn.execute(
        "UPDATE lore SET confidence = ?1, validation_count = validation_count + 1, \
         updated_at = ?2, synced_at = CASE WHEN ?3 THEN NULL ELSE synced_at END \
         WHERE id = ?4",
        params![confidence, now, changed, lore_id],
    )?;
    conn.execute(
        "INSERT INTO feedback_queue (lore_id, outcome, created_at) VALUES (?1, ?2, ?3)",
        params![lore_id, outcome.as_str(), now],
    )?;

    Ok(FeedbackApplied {
        lore_id: lore_id.to_string(),
        outcome,
        previous_confidence: record.confidence,
        confidence,
        validation_count: record.validation_count + 1,
    })
}

/// `?1, ?2, ...` for an `IN` list of `n` values.
pub(crate) fn placeholders(n: usize) -> String {
    (1..=n)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}
