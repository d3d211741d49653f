#![allow(dead_code)]

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lore::lore::{Category, EmbeddingStatus, LocalStore, LoreRecord, DB_FILE};
use lore::remote::{
    cancellable, ChangeBatch, Cursor, DeltaPage, Health, PushResponse, RemoteSync, Snapshot,
    SnapshotBody, StoreDetails, StoreSummary,
};
use lore::store_id::StoreId;
use lore::sync::{SyncEngine, SyncSettings};
use lore::{Error, Result};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// A store named `id` in a fresh temp directory. Keep the `TempDir` alive.
pub fn temp_store_named(id: &str) -> (TempDir, Arc<LocalStore>) {
    let dir = TempDir::new().unwrap();
    let id = StoreId::parse(id).unwrap();
    let path = dir.path().join(id.encode()).join(DB_FILE);
    let store = LocalStore::open(id, path).unwrap();
    (dir, Arc::new(store))
}

pub fn temp_store() -> (TempDir, Arc<LocalStore>) {
    temp_store_named("default")
}

/// A synced remote record with fixed timestamps.
pub fn remote_record(id: &str, content: &str) -> LoreRecord {
    LoreRecord {
        id: id.to_string(),
        content: content.to_string(),
        context: None,
        category: Category::Pattern,
        confidence: 0.7,
        embedding: None,
        embedding_status: EmbeddingStatus::Pending,
        source_id: None,
        sources: BTreeSet::new(),
        validation_count: 0,
        created_at: "2026-01-01T00:00:00.000000Z".to_string(),
        updated_at: "2026-01-01T00:00:00.000000Z".to_string(),
        synced_at: Some("2026-01-01T00:00:00.000000Z".to_string()),
        deleted_at: None,
        sync_error: None,
    }
}

/// Serialize records as an NDJSON snapshot body.
pub fn ndjson(records: &[LoreRecord]) -> Vec<u8> {
    let mut out = Vec::new();
    for record in records {
        out.extend(serde_json::to_vec(record).unwrap());
        out.push(b'\n');
    }
    out
}

pub fn engine(remote: &Arc<MockRemote>) -> SyncEngine {
    engine_with(remote, SyncSettings::default())
}

pub fn engine_with(remote: &Arc<MockRemote>, settings: SyncSettings) -> SyncEngine {
    let remote: Arc<dyn RemoteSync> = Arc::clone(remote) as Arc<dyn RemoteSync>;
    SyncEngine::new(Some(remote), settings)
}

type PushPolicy = Box<dyn Fn(&ChangeBatch) -> PushResponse + Send + Sync>;

/// A scripted in-process remote that records every call.
pub struct MockRemote {
    pub health: Mutex<Health>,
    pub snapshot_chunks: Mutex<Vec<Vec<u8>>>,
    pub snapshot_cursor: Mutex<Option<Cursor>>,
    /// After the scripted chunks, wait forever instead of ending the stream.
    pub stall_snapshot: Mutex<bool>,
    pub push_policy: Mutex<PushPolicy>,
    pub pushes: Mutex<Vec<ChangeBatch>>,
    pub delta_pages: Mutex<VecDeque<DeltaPage>>,
    pub delta_calls: Mutex<Vec<(Option<Cursor>, usize)>>,
    pub stores: Mutex<Vec<StoreSummary>>,
    pub calls: AtomicUsize,
}

impl MockRemote {
    pub fn new(embedding_model: &str) -> Arc<Self> {
        Arc::new(Self {
            health: Mutex::new(Health {
                status: "ok".into(),
                embedding_model: embedding_model.into(),
                version: "1.0.0".into(),
            }),
            snapshot_chunks: Mutex::new(Vec::new()),
            snapshot_cursor: Mutex::new(None),
            stall_snapshot: Mutex::new(false),
            push_policy: Mutex::new(Box::new(accept_all)),
            pushes: Mutex::new(Vec::new()),
            delta_pages: Mutex::new(VecDeque::new()),
            delta_calls: Mutex::new(Vec::new()),
            stores: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_snapshot(&self, chunks: Vec<Vec<u8>>, cursor: Option<&str>) {
        *self.snapshot_chunks.lock().unwrap() = chunks;
        *self.snapshot_cursor.lock().unwrap() = cursor.map(Cursor::new);
    }

    pub fn set_push_policy(
        &self,
        policy: impl Fn(&ChangeBatch) -> PushResponse + Send + Sync + 'static,
    ) {
        *self.push_policy.lock().unwrap() = Box::new(policy);
    }

    pub fn queue_delta(&self, page: DeltaPage) {
        self.delta_pages.lock().unwrap().push_back(page);
    }

    pub fn push_count(&self) -> usize {
        self.pushes.lock().unwrap().len()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn called(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Accept every record, tombstone and feedback entry in the batch.
pub fn accept_all(batch: &ChangeBatch) -> PushResponse {
    PushResponse {
        accepted: batch
            .records
            .iter()
            .map(|r| r.id.clone())
            .chain(batch.deleted.iter().cloned())
            .collect(),
        feedback_acked: batch.feedback.iter().map(|f| f.id).collect(),
        ..Default::default()
    }
}

struct ScriptedBody {
    chunks: VecDeque<Vec<u8>>,
    stall: bool,
}

#[async_trait]
impl SnapshotBody for ScriptedBody {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if let Some(chunk) = self.chunks.pop_front() {
            return Ok(Some(chunk));
        }
        if self.stall {
            std::future::pending::<()>().await;
        }
        Ok(None)
    }
}

#[async_trait]
impl RemoteSync for MockRemote {
    async fn health(&self, cancel: &CancellationToken) -> Result<Health> {
        self.called();
        let health = self.health.lock().unwrap().clone();
        cancellable("health check", cancel, async { Ok(health) }).await
    }

    async fn snapshot(&self, _store: &StoreId, cancel: &CancellationToken) -> Result<Snapshot> {
        self.called();
        let body = ScriptedBody {
            chunks: self.snapshot_chunks.lock().unwrap().clone().into(),
            stall: *self.stall_snapshot.lock().unwrap(),
        };
        let cursor = self.snapshot_cursor.lock().unwrap().clone();
        cancellable("snapshot", cancel, async {
            Ok(Snapshot {
                cursor,
                body: Box::new(body),
            })
        })
        .await
    }

    async fn push(
        &self,
        _store: &StoreId,
        batch: &ChangeBatch,
        _cancel: &CancellationToken,
    ) -> Result<PushResponse> {
        self.called();
        self.pushes.lock().unwrap().push(batch.clone());
        let response = (self.push_policy.lock().unwrap())(batch);
        Ok(response)
    }

    async fn delta(
        &self,
        _store: &StoreId,
        after: Option<&Cursor>,
        limit: usize,
        _cancel: &CancellationToken,
    ) -> Result<DeltaPage> {
        self.called();
        self.delta_calls.lock().unwrap().push((after.cloned(), limit));
        Ok(self.delta_pages.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn list_stores(
        &self,
        prefix: Option<&str>,
        _cancel: &CancellationToken,
    ) -> Result<Vec<StoreSummary>> {
        self.called();
        Ok(self
            .stores
            .lock()
            .unwrap()
            .iter()
            .filter(|s| prefix.map_or(true, |p| s.id.starts_with(p)))
            .cloned()
            .collect())
    }

    async fn create_store(
        &self,
        store: &StoreId,
        description: Option<&str>,
        _cancel: &CancellationToken,
    ) -> Result<StoreSummary> {
        self.called();
        let mut stores = self.stores.lock().unwrap();
        if stores.iter().any(|s| s.id == store.as_str()) {
            return Err(Error::Remote {
                operation: "create store",
                status: Some(409),
                message: "store already exists".into(),
            });
        }
        let summary = StoreSummary {
            id: store.to_string(),
            description: description.map(str::to_string),
            record_count: 0,
            last_accessed: None,
        };
        stores.push(summary.clone());
        Ok(summary)
    }

    async fn delete_store(&self, store: &StoreId, _cancel: &CancellationToken) -> Result<()> {
        self.called();
        self.stores.lock().unwrap().retain(|s| s.id != store.as_str());
        Ok(())
    }

    async fn store_info(&self, store: &StoreId, _cancel: &CancellationToken) -> Result<StoreDetails> {
        self.called();
        self.stores
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == store.as_str())
            .map(|summary| StoreDetails {
                summary: summary.clone(),
                created_at: None,
                deleted_count: 0,
                by_category: Default::default(),
                embedding_model: Some(self.health.lock().unwrap().embedding_model.clone()),
                latest_cursor: None,
            })
            .ok_or_else(|| Error::NotFound(format!("remote store {store}")))
    }
}
