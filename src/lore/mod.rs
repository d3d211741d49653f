//! The local store: one SQLite database per store identifier.
//!
//! [`LocalStore`] owns a writer connection and a small pool of read-only
//! connections. An in-process gate enforces single-writer, multiple-reader
//! access: reads share it, every mutation (record writes, snapshot replace,
//! metadata writes, sync marking) holds it exclusively, so no reader observes
//! a half-applied change.

pub mod feedback;
pub mod stats;
pub mod store;
pub mod sync_state;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;

use crate::db;
pub use crate::error::StoreError;
use crate::error::Result;
use crate::store_id::StoreId;

pub use store::SearchFilter;
pub use types::{
    Category, EmbeddingStatus, FeedbackApplied, FeedbackEntry, FeedbackOutcome, LoreRecord,
    LoreUpdate, NewLore,
};

/// File name of the database inside a store directory.
pub const DB_FILE: &str = "lore.db";

pub const META_EMBEDDING_MODEL: &str = "embedding_model";
pub const META_LAST_SYNC: &str = "last_sync";
pub const META_SYNC_CURSOR: &str = "sync_cursor";

const MAX_IDLE_READERS: usize = 4;

/// Current time as a fixed-width RFC 3339 string, so timestamps compare
/// correctly as text.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub struct LocalStore {
    id: StoreId,
    path: PathBuf,
    gate: RwLock<()>,
    writer: Mutex<Connection>,
    readers: Mutex<Vec<Connection>>,
}

impl LocalStore {
    /// Open (or create) the store database at `path`.
    pub fn open(id: StoreId, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let writer = db::open_database(&path)?;
        tracing::info!(store = %id, path = %path.display(), "local store opened");

        Ok(Self {
            id,
            path,
            gate: RwLock::new(()),
            writer: Mutex::new(writer),
            readers: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> &StoreId {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the database; snapshots are staged here.
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Run `f` against a reader connection while holding the shared gate.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let _shared = self
            .gate
            .read()
            .map_err(|_| StoreError::Poisoned("store gate"))?;

        let conn = self.checkout_reader()?;
        let result = f(&conn);
        self.return_reader(conn);
        result
    }

    /// Run `f` against the writer connection while holding the gate exclusively.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let _exclusive = self
            .gate
            .write()
            .map_err(|_| StoreError::Poisoned("store gate"))?;
        let mut conn = self
            .writer
            .lock()
            .map_err(|_| StoreError::Poisoned("writer connection"))?;
        f(&mut conn)
    }

    fn checkout_reader(&self) -> Result<Connection> {
        let pooled = self
            .readers
            .lock()
            .map_err(|_| StoreError::Poisoned("reader pool"))?
            .pop();
        match pooled {
            Some(conn) => Ok(conn),
            None => Ok(db::open_reader(&self.path)?),
        }
    }

    fn return_reader(&self, conn: Connection) {
        if let Ok(mut pool) = self.readers.lock() {
            if pool.len() < MAX_IDLE_READERS {
                pool.push(conn);
            }
        }
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
