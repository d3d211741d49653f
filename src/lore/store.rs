//! Record operations: capture, lookup, search, update, and soft delete.
//!
//! Every local edit that changes what the remote should hold clears
//! `synced_at`, which is what puts a record into the next push batch.

use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::types::{
    Category, LoreRecord, LoreUpdate, NewLore, DEFAULT_CONFIDENCE, MAX_CONTENT_CHARS,
};
use super::{timestamp, LocalStore};
use crate::error::{Error, Result};

/// Column list matching [`record_from_row`].
pub(crate) const RECORD_COLUMNS: &str = "id, content, context, category, confidence, embedding, \
     embedding_status, source_id, sources, validation_count, created_at, updated_at, \
     synced_at, deleted_at, sync_error";

/// Query filters for [`LocalStore::search`].
#[derive(Debug, Clone)]
pub struct SearchFilter {
    /// Case-insensitive substring matched against content and context.
    pub text: Option<String>,
    pub category: Option<Category>,
    pub min_confidence: f64,
    pub limit: usize,
}

impl Default for SearchFilter {
    fn default() -> Self {
        Self {
            text: None,
            category: None,
            min_confidence: 0.0,
            limit: 20,
        }
    }
}

impl LocalStore {
    /// Capture a new piece of lore. The record starts dirty (unsynced).
    pub fn capture(&self, new: NewLore) -> Result<LoreRecord> {
        let content = new.content.trim().to_string();
        validate_content(&content)?;
        let confidence = new.confidence.unwrap_or(DEFAULT_CONFIDENCE);
        validate_confidence(confidence)?;

        let now = timestamp();
        let record = LoreRecord {
            id: uuid::Uuid::now_v7().to_string(),
            content,
            context: new.context.filter(|c| !c.trim().is_empty()),
            category: new.category,
            confidence,
            embedding: None,
            embedding_status: Default::default(),
            sources: new.source_id.iter().cloned().collect(),
            source_id: new.source_id,
            validation_count: 0,
            created_at: now.clone(),
            updated_at: now,
            synced_at: None,
            deleted_at: None,
            sync_error: None,
        };

        self.write(|conn| insert_record(conn, &record))?;

        tracing::info!(
            store = %self.id(),
            id = %record.id,
            category = %record.category,
            "lore captured"
        );
        Ok(record)
    }

    /// Fetch a visible (not tombstoned) record.
    pub fn get(&self, id: &str) -> Result<Option<LoreRecord>> {
        Ok(self.get_with_tombstone(id)?.filter(|r| !r.is_deleted()))
    }

    /// Fetch a record even if it has been soft-deleted.
    pub fn get_with_tombstone(&self, id: &str) -> Result<Option<LoreRecord>> {
        self.read(|conn| fetch_record(conn, id))
    }

    /// Search visible records, highest confidence first.
    pub fn search(&self, filter: &SearchFilter) -> Result<Vec<LoreRecord>> {
        let mut sql = format!(
            "SELECT {RECORD_COLUMNS} FROM lore WHERE deleted_at IS NULL AND confidence >= ?1"
        );
        let mut values: Vec<Value> = vec![Value::Real(filter.min_confidence)];

        if let Some(category) = filter.category {
            values.push(Value::Text(category.as_str().to_string()));
            sql.push_str(&format!(" AND category = ?{}", values.len()));
        }
        if let Some(text) = filter.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            values.push(Value::Text(format!("%{}%", escape_like(text))));
            let n = values.len();
            sql.push_str(&format!(
                " AND (content LIKE ?{n} ESCAPE '\\' OR context LIKE ?{n} ESCAPE '\\')"
            ));
        }
        values.push(Value::Integer(filter.limit as i64));
        sql.push_str(&format!(
            " ORDER BY confidence DESC, created_at, id LIMIT ?{}",
            values.len()
        ));

        self.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let records = stmt
                .query_map(params_from_iter(values), record_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
    }

    /// Edit a visible record. Any effective change marks it dirty.
    pub fn update(&self, id: &str, changes: LoreUpdate) -> Result<LoreRecord> {
        if let Some(content) = &changes.content {
            validate_content(content.trim())?;
        }
        if let Some(confidence) = changes.confidence {
            validate_confidence(confidence)?;
        }

        self.write(|conn| {
            let tx = conn.transaction()?;
            let mut record = fetch_record(&tx, id)?
                .filter(|r| !r.is_deleted())
                .ok_or_else(|| Error::NotFound(format!("lore {id}")))?;

            let before = record.clone();
            if let Some(content) = changes.content {
                record.content = content.trim().to_string();
            }
            if let Some(context) = changes.context {
                record.context = context;
            }
            if let Some(category) = changes.category {
                record.category = category;
            }
            if let Some(confidence) = changes.confidence {
                record.confidence = confidence;
            }

            if record == before {
                return Ok(record);
            }

            record.updated_at = timestamp();
            record.synced_at = None;
            tx.execute(
                "UPDATE lore SET content = ?1, context = ?2, category = ?3, confidence = ?4, \
                 updated_at = ?5, synced_at = NULL WHERE id = ?6",
                params![
                    record.content,
                    record.context,
                    record.category.as_str(),
                    record.confidence,
                    record.updated_at,
                    id
                ],
            )?;
            tx.commit()?;
            Ok(record)
        })
    }

    /// Soft-delete a record. The tombstone is pushed on the next sync.
    pub fn forget(&self, id: &str) -> Result<()> {
        let now = timestamp();
        let rows = self.write(|conn| {
            Ok(conn.execute(
                "UPDATE lore SET deleted_at = ?1, updated_at = ?1, synced_at = NULL \
                 WHERE id = ?2 AND deleted_at IS NULL",
                params![now, id],
            )?)
        })?;
        if rows == 0 {
            return Err(Error::NotFound(format!("lore {id}")));
        }
        tracing::info!(store = %self.id(), id = %id, "lore forgotten");
        Ok(())
    }
}

fn validate_content(content: &str) -> Result<()> {
    if content.is_empty() {
        return Err(Error::Invalid("content must not be empty".into()));
    }
    let chars = content.chars().count();
    if chars > MAX_CONTENT_CHARS {
        return Err(Error::Invalid(format!(
            "content is {chars} characters, the limit is {MAX_CONTENT_CHARS}"
        )));
    }
    Ok(())
}

fn validate_confidence(confidence: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&confidence) {
        return Err(Error::Invalid("confidence must be between 0.0 and 1.0".into()));
    }
    Ok(())
}

fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub(crate) fn fetch_record(conn: &Connection, id: &str) -> Result<Option<LoreRecord>> {
    Ok(conn
        .query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM lore WHERE id = ?1"),
            params![id],
            record_from_row,
        )
        .optional()?)
}

/// Insert a full record, timestamps and sync markers included.
pub(crate) fn insert_record(conn: &Connection, record: &LoreRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO lore (id, content, context, category, confidence, embedding, \
         embedding_status, source_id, sources, validation_count, created_at, updated_at, \
         synced_at, deleted_at, sync_error) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
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
            record.synced_at,
            record.deleted_at,
            record.sync_error,
        ],
    )?;
    Ok(())
}

pub(crate) fn record_from_row(row: &Row<'_>) -> rusqlite::Result<LoreRecord> {
    let category: String = row.get(3)?;
    let embedding_status: String = row.get(6)?;
    let sources: String = row.get(8)?;

    Ok(LoreRecord {
        id: row.get(0)?,
        content: row.get(1)?,
        context: row.get(2)?,
        category: category.parse().map_err(|e: String| bad_column(3, e))?,
        confidence: row.get(4)?,
        embedding: row.get(5)?,
        embedding_status: embedding_status
            .parse()
            .map_err(|e: String| bad_column(6, e))?,
        source_id: row.get(7)?,
        sources: serde_json::from_str(&sources).map_err(|e| bad_column(8, e.to_string()))?,
        validation_count: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
        synced_at: row.get(12)?,
        deleted_at: row.get(13)?,
        sync_error: row.get(14)?,
    })
}

fn bad_column(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, message.into())
}
