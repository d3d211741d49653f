//! The remote sync service, as the engine sees it.
//!
//! [`RemoteSync`] is the capability the [`crate::sync::SyncEngine`] depends
//! on. [`http::HttpRemote`] implements it over HTTP; tests provide scripted
//! implementations. Every operation takes a [`CancellationToken`] and must
//! return [`Error::Cancelled`] promptly once it fires.

pub mod http;

use std::collections::BTreeMap;
use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::lore::{FeedbackEntry, LoreRecord};
use crate::store_id::StoreId;

pub use http::HttpRemote;

/// Connectivity and compatibility probe result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    /// Fingerprint of the embedding space the remote uses.
    pub embedding_model: String,
    pub version: String,
}

/// Opaque, monotonically increasing change-log position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn from_sequence(seq: u64) -> Self {
        Self(seq.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Local changes sent in one push call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch {
    /// New and updated records.
    pub records: Vec<LoreRecord>,
    /// Ids of records tombstoned locally.
    #[serde(default)]
    pub deleted: Vec<String>,
    #[serde(default)]
    pub feedback: Vec<FeedbackEntry>,
}

impl ChangeBatch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.deleted.is_empty() && self.feedback.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len() + self.deleted.len() + self.feedback.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushError {
    pub id: String,
    pub message: String,
}

/// The remote's verdict on a [`ChangeBatch`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    #[serde(default)]
    pub accepted: Vec<String>,
    #[serde(default)]
    pub merged: Vec<String>,
    #[serde(default)]
    pub rejected: Vec<String>,
    #[serde(default)]
    pub errors: Vec<PushError>,
    /// Feedback queue ids the remote has recorded.
    #[serde(default)]
    pub feedback_acked: Vec<i64>,
}

impl PushResponse {
    /// Error message the remote gave for `id`, if any.
    pub fn error_for(&self, id: &str) -> Option<&str> {
        self.errors
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.message.as_str())
    }
}

/// One page of the remote change log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaPage {
    #[serde(default)]
    pub changes: Vec<LoreRecord>,
    #[serde(default)]
    pub deleted_ids: Vec<String>,
    #[serde(default)]
    pub next_cursor: Option<Cursor>,
}

impl DeltaPage {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.deleted_ids.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSummary {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub record_count: u64,
    #[serde(default)]
    pub last_accessed: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDetails {
    #[serde(flatten)]
    pub summary: StoreSummary,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub deleted_count: u64,
    #[serde(default)]
    pub by_category: BTreeMap<String, u64>,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub latest_cursor: Option<Cursor>,
}

/// A full-state snapshot being downloaded.
pub struct Snapshot {
    /// Change-log position the snapshot reflects, when the remote reports it.
    pub cursor: Option<Cursor>,
    pub body: Box<dyn SnapshotBody>,
}

/// Streaming NDJSON body of a [`Snapshot`].
#[async_trait]
pub trait SnapshotBody: Send {
    /// The next chunk of bytes, or `None` at end of stream.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>>;
}

#[async_trait]
pub trait RemoteSync: Send + Sync {
    async fn health(&self, cancel: &CancellationToken) -> Result<Health>;

    async fn snapshot(&self, store: &StoreId, cancel: &CancellationToken) -> Result<Snapshot>;

    async fn push(
        &self,
        store: &StoreId,
        batch: &ChangeBatch,
        cancel: &CancellationToken,
    ) -> Result<PushResponse>;

    async fn delta(
        &self,
        store: &StoreId,
        after: Option<&Cursor>,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<DeltaPage>;

    async fn list_stores(
        &self,
        prefix: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<StoreSummary>>;

    async fn create_store(
        &self,
        store: &StoreId,
        description: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<StoreSummary>;

    async fn delete_store(&self, store: &StoreId, cancel: &CancellationToken) -> Result<()>;

    async fn store_info(&self, store: &StoreId, cancel: &CancellationToken) -> Result<StoreDetails>;
}

/// Run `fut` unless `cancel` fires first.
pub async fn cancellable<T>(
    operation: &'static str,
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled { operation }),
        result = fut => result,
    }
}

/// In-memory snapshot body, for callers that already hold the bytes.
pub struct BytesBody {
    chunks: std::collections::VecDeque<Vec<u8>>,
}

impl BytesBody {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self::chunked(vec![bytes.into()])
    }

    pub fn chunked(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks: chunks.into(),
        }
    }
}

#[async_trait]
impl SnapshotBody for BytesBody {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.chunks.pop_front())
    }
}
