//! The sync engine: bootstrap, push and pull between a [`LocalStore`] and a
//! [`RemoteSync`] service.
//!
//! Each call is a fresh run from [`SyncState::Idle`]. Runs against the same
//! store are serialised; runs against different stores proceed in parallel.
//! The engine never retries. Every failure after the offline
//! check is wrapped in [`Error::Phase`] naming the step that failed and
//! whether local state had already changed.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Phase, Result, StoreError};
use crate::lore::{
    timestamp, FeedbackEntry, LocalStore, LoreRecord, META_EMBEDDING_MODEL, META_LAST_SYNC,
    META_SYNC_CURSOR,
};
use crate::remote::{
    cancellable, ChangeBatch, Cursor, DeltaPage, Health, PushError, RemoteSync, SnapshotBody,
    StoreDetails, StoreSummary,
};
use crate::store_id::StoreId;

pub const DEFAULT_PUSH_BATCH_SIZE: usize = 100;
pub const DEFAULT_DELTA_PAGE_SIZE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Most changes sent in one push call.
    pub push_batch_size: usize,
    /// `limit` passed on each delta call.
    pub delta_page_size: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            push_batch_size: DEFAULT_PUSH_BATCH_SIZE,
            delta_page_size: DEFAULT_DELTA_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Bootstrapping,
    Pushing,
    PullingDelta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    pub records: usize,
    pub embedding_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
    pub synced_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
    /// Changes sent: records, tombstones and feedback entries.
    pub pushed: usize,
    pub accepted: usize,
    pub merged: usize,
    pub rejected: Vec<PushError>,
    pub feedback_acked: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PullReport {
    pub pages: usize,
    pub upserted: usize,
    pub deleted: usize,
    /// Position after the last applied page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub push: PushReport,
    pub pull: PullReport,
}

pub struct SyncEngine {
    remote: Option<Arc<dyn RemoteSync>>,
    settings: SyncSettings,
    /// Stores with a run in progress. Absent means Idle.
    states: Mutex<HashMap<StoreId, SyncState>>,
    permits: Mutex<HashMap<StoreId, Arc<tokio::sync::Mutex<()>>>>,
}

/// Holds one store's run permit; puts that store back to Idle when dropped.
struct RunGuard<'a> {
    engine: &'a SyncEngine,
    store: StoreId,
    _permit: tokio::sync::OwnedMutexGuard<()>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.engine.set_state(&self.store, SyncState::Idle);
    }
}

impl SyncEngine {
    pub fn new(remote: Option<Arc<dyn RemoteSync>>, settings: SyncSettings) -> Self {
        Self {
            remote,
            settings,
            states: Mutex::new(HashMap::new()),
            permits: Mutex::new(HashMap::new()),
        }
    }

    /// An engine with no remote; every sync call returns [`Error::Offline`].
    pub fn offline() -> Self {
        Self::new(None, SyncSettings::default())
    }

    pub fn settings(&self) -> SyncSettings {
        self.settings
    }

    pub fn is_online(&self) -> bool {
        self.remote.is_some()
    }

    /// The configured remote, or [`Error::Offline`].
    pub fn ensure_online(&self) -> Result<&Arc<dyn RemoteSync>> {
        self.remote.as_ref().ok_or(Error::Offline)
    }

    /// What the engine is currently doing with `store`.
    pub fn state(&self, store: &StoreId) -> SyncState {
        self.states
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(store)
            .copied()
            .unwrap_or(SyncState::Idle)
    }

    fn set_state(&self, store: &StoreId, state: SyncState) {
        let mut states = self.states.lock().unwrap_or_else(|p| p.into_inner());
        match state {
            SyncState::Idle => states.remove(store),
            _ => states.insert(store.clone(), state),
        };
    }

    /// Wait for `store`'s run permit, then enter `state`.
    async fn begin(&self, store: &StoreId, state: SyncState) -> RunGuard<'_> {
        let permit = {
            let mut permits = self.permits.lock().unwrap_or_else(|p| p.into_inner());
            Arc::clone(permits.entry(store.clone()).or_default())
        };
        let permit = permit.lock_owned().await;
        self.set_state(store, state);
        tracing::debug!(store = %store, ?state, "sync state changed");
        RunGuard {
            engine: self,
            store: store.clone(),
            _permit: permit,
        }
    }

    pub async fn health(&self, cancel: &CancellationToken) -> Result<Health> {
        self.ensure_online()?.health(cancel).await
    }

    /// Replace the local store with the remote's full state.
    ///
    /// Refuses with [`Error::ModelMismatch`] when the store already has an
    /// embedding model that differs from the remote's, before touching
    /// anything. The snapshot is downloaded to a staging file first, so a
    /// failed or cancelled download leaves the store as it was.
    pub async fn bootstrap(
        &self,
        store: &Arc<LocalStore>,
        cancel: &CancellationToken,
    ) -> Result<BootstrapReport> {
        let remote = self.ensure_online()?;
        let _run = self.begin(store.id(), SyncState::Bootstrapping).await;
        let id = store.id().clone();

        let health = remote
            .health(cancel)
            .await
            .map_err(|e| e.at(Phase::HealthCheck, false))?;

        let local_model = blocking(store, |s| s.get_metadata(META_EMBEDDING_MODEL))
            .await
            .map_err(|e| e.at(Phase::ModelCheck, false))?;
        if !local_model.is_empty() && local_model != health.embedding_model {
            tracing::warn!(
                store = %id,
                local = %local_model,
                remote = %health.embedding_model,
                "embedding model mismatch, bootstrap refused"
            );
            return Err(Error::ModelMismatch {
                local: local_model,
                remote: health.embedding_model,
            }
            .at(Phase::ModelCheck, false));
        }

        let snapshot = remote
            .snapshot(&id, cancel)
            .await
            .map_err(|e| e.at(Phase::Snapshot, false))?;
        let staged = stage_snapshot(store, snapshot.body, cancel)
            .await
            .map_err(|e| e.at(Phase::Snapshot, false))?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled {
                operation: "snapshot",
            }
            .at(Phase::Snapshot, false));
        }

        let cursor = snapshot.cursor;
        let cursor_value = cursor.as_ref().map(|c| c.as_str().to_string());
        let records = blocking(store, move |s| {
            let file = std::fs::File::open(staged.path())?;
            s.replace_from_snapshot(std::io::BufReader::new(file), cursor_value.as_deref())
        })
        .await
        .map_err(|e| e.at(Phase::Replace, false))?;

        let model = health.embedding_model.clone();
        blocking(store, move |s| s.set_metadata(META_EMBEDDING_MODEL, &model))
            .await
            .map_err(|e| e.at(Phase::SaveModel, true))?;

        let synced_at = timestamp();
        let ts = synced_at.clone();
        blocking(store, move |s| s.set_metadata(META_LAST_SYNC, &ts))
            .await
            .map_err(|e| e.at(Phase::SaveLastSync, true))?;

        tracing::info!(
            store = %id,
            records,
            embedding_model = %health.embedding_model,
            "bootstrap complete"
        );
        Ok(BootstrapReport {
            records,
            embedding_model: health.embedding_model,
            cursor,
            synced_at,
        })
    }

    /// Send local changes. Only ids the remote accepted or merged are marked
    /// synced; rejected ids stay dirty with the remote's message attached.
    pub async fn push(
        &self,
        store: &Arc<LocalStore>,
        cancel: &CancellationToken,
    ) -> Result<PushReport> {
        let remote = self.ensure_online()?;
        let _run = self.begin(store.id(), SyncState::Pushing).await;
        let id = store.id().clone();

        // Taken before collecting: edits that land after this stay dirty.
        let collected_at = timestamp();
        let (records, deletions, feedback) = blocking(store, |s| {
            Ok((s.unsynced()?, s.unsynced_deletions()?, s.pending_feedback()?))
        })
        .await
        .map_err(|e| e.at(Phase::CollectChanges, false))?;

        let deleted: Vec<String> = deletions.into_iter().map(|r| r.id).collect();
        let batches = chunk_changes(records, deleted, feedback, self.settings.push_batch_size);
        if batches.is_empty() {
            tracing::debug!(store = %id, "nothing to push");
            return Ok(PushReport::default());
        }

        let mut report = PushReport::default();
        let mut mutated = false;
        for batch in batches {
            let response = remote
                .push(&id, &batch, cancel)
                .await
                .map_err(|e| e.at(Phase::Push, mutated))?;

            let sent: HashSet<&str> = batch
                .records
                .iter()
                .map(|r| r.id.as_str())
                .chain(batch.deleted.iter().map(String::as_str))
                .collect();
            let sent_feedback: HashSet<i64> = batch.feedback.iter().map(|f| f.id).collect();

            let accepted: Vec<String> = response
                .accepted
                .iter()
                .filter(|id| sent.contains(id.as_str()))
                .cloned()
                .collect();
            let merged: Vec<String> = response
                .merged
                .iter()
                .filter(|id| sent.contains(id.as_str()))
                .cloned()
                .collect();
            let synced: HashSet<&str> = accepted
                .iter()
                .chain(merged.iter())
                .map(String::as_str)
                .collect();

            let mut rejected: Vec<PushError> = Vec::new();
            let error_ids = response.errors.iter().map(|e| &e.id);
            for rejected_id in response.rejected.iter().chain(error_ids) {
                if !sent.contains(rejected_id.as_str())
                    || synced.contains(rejected_id.as_str())
                    || rejected.iter().any(|r| &r.id == rejected_id)
                {
                    continue;
                }
                let message = response
                    .error_for(rejected_id)
                    .unwrap_or("rejected by remote")
                    .to_string();
                tracing::warn!(store = %id, id = %rejected_id, %message, "push rejected");
                rejected.push(PushError {
                    id: rejected_id.clone(),
                    message,
                });
            }

            let acked: Vec<i64> = response
                .feedback_acked
                .iter()
                .copied()
                .filter(|fid| sent_feedback.contains(fid))
                .collect();

            let to_mark: Vec<String> = synced.iter().map(|s| s.to_string()).collect();
            let errors: Vec<(String, String)> = rejected
                .iter()
                .map(|r| (r.id.clone(), r.message.clone()))
                .collect();
            let ts = collected_at.clone();
            let acked_count = acked.len();
            blocking(store, move |s| {
                s.mark_synced(&to_mark, &ts)?;
                s.mark_feedback_synced(&acked)?;
                s.record_push_errors(&errors)
            })
            .await
            .map_err(|e| e.at(Phase::MarkSynced, mutated))?;
            mutated = true;

            report.pushed += batch.len();
            report.accepted += accepted.len();
            report.merged += merged.len();
            report.feedback_acked += acked_count;
            report.rejected.extend(rejected);
        }

        tracing::info!(
            store = %id,
            pushed = report.pushed,
            accepted = report.accepted,
            merged = report.merged,
            rejected = report.rejected.len(),
            "push complete"
        );
        Ok(report)
    }

    /// Drain the remote change log from `since` (or the persisted cursor).
    ///
    /// Pages are applied in order. Each page and its cursor commit together,
    /// so a crash between pages replays at most the page in flight.
    pub async fn pull(
        &self,
        store: &Arc<LocalStore>,
        since: Option<Cursor>,
        cancel: &CancellationToken,
    ) -> Result<PullReport> {
        let remote = self.ensure_online()?;
        let _run = self.begin(store.id(), SyncState::PullingDelta).await;
        let id = store.id().clone();

        let mut cursor = match since {
            Some(cursor) => Some(cursor),
            None => {
                let saved = blocking(store, |s| s.get_metadata(META_SYNC_CURSOR))
                    .await
                    .map_err(|e| e.at(Phase::Delta, false))?;
                (!saved.is_empty()).then(|| Cursor::new(saved))
            }
        };

        let mut report = PullReport::default();
        loop {
            let page = remote
                .delta(&id, cursor.as_ref(), self.settings.delta_page_size, cancel)
                .await
                .map_err(|e| e.at(Phase::Delta, report.pages > 0))?;
            if page.is_empty() {
                break;
            }

            let DeltaPage {
                changes,
                deleted_ids,
                next_cursor,
            } = page;
            let advanced = next_cursor.is_some() && next_cursor != cursor;
            let cursor_value = next_cursor.as_ref().map(|c| c.as_str().to_string());
            let applied = blocking(store, move |s| {
                s.apply_delta(&changes, &deleted_ids, cursor_value.as_deref())
            })
            .await
            .map_err(|e| e.at(Phase::ApplyDelta, report.pages > 0))?;

            report.pages += 1;
            report.upserted += applied.upserted;
            report.deleted += applied.deleted;
            tracing::debug!(
                store = %id,
                page = report.pages,
                upserted = applied.upserted,
                deleted = applied.deleted,
                "delta page applied"
            );

            if let Some(next) = next_cursor {
                cursor = Some(next);
            }
            if !advanced {
                tracing::warn!(store = %id, "delta page did not advance the cursor, stopping");
                break;
            }
        }

        let ts = timestamp();
        blocking(store, move |s| s.set_metadata(META_LAST_SYNC, &ts))
            .await
            .map_err(|e| e.at(Phase::SaveLastSync, report.pages > 0))?;

        report.cursor = cursor;
        tracing::info!(
            store = %id,
            pages = report.pages,
            upserted = report.upserted,
            deleted = report.deleted,
            "pull complete"
        );
        Ok(report)
    }

    /// Push, then pull from the persisted cursor.
    pub async fn sync(&self, store: &Arc<LocalStore>, cancel: &CancellationToken) -> Result<SyncReport> {
        let push = self.push(store, cancel).await?;
        let pull = self.pull(store, None, cancel).await?;
        Ok(SyncReport { push, pull })
    }

    pub async fn list_stores(
        &self,
        prefix: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<StoreSummary>> {
        self.ensure_online()?.list_stores(prefix, cancel).await
    }

    pub async fn create_store(
        &self,
        id: &str,
        description: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<StoreSummary> {
        let id = StoreId::parse_for_creation(id)?;
        let summary = self
            .ensure_online()?
            .create_store(&id, description, cancel)
            .await?;
        tracing::info!(store = %id, "remote store created");
        Ok(summary)
    }

    pub async fn delete_store(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        let id = StoreId::parse(id)?;
        if id.is_reserved() {
            return Err(Error::ReservedStoreId(id.into()));
        }
        self.ensure_online()?.delete_store(&id, cancel).await?;
        tracing::info!(store = %id, "remote store deleted");
        Ok(())
    }

    pub async fn store_info(&self, id: &str, cancel: &CancellationToken) -> Result<StoreDetails> {
        let id = StoreId::parse(id)?;
        self.ensure_online()?.store_info(&id, cancel).await
    }
}

/// Run a store operation on the blocking pool.
async fn blocking<T, F>(store: &Arc<LocalStore>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&LocalStore) -> Result<T> + Send + 'static,
{
    let store = Arc::clone(store);
    match tokio::task::spawn_blocking(move || f(&store)).await {
        Ok(result) => result,
        Err(e) => Err(StoreError::Task(e.to_string()).into()),
    }
}

/// Download the snapshot body into a temp file beside the store database.
async fn stage_snapshot(
    store: &LocalStore,
    mut body: Box<dyn SnapshotBody>,
    cancel: &CancellationToken,
) -> Result<tempfile::NamedTempFile> {
    let staged = tempfile::Builder::new()
        .prefix(".snapshot-")
        .suffix(".ndjson")
        .tempfile_in(store.dir())?;
    let mut out = tokio::fs::File::from_std(staged.reopen()?);

    let mut bytes = 0usize;
    while let Some(chunk) = cancellable("snapshot", cancel, body.next_chunk()).await? {
        bytes += chunk.len();
        out.write_all(&chunk).await?;
    }
    out.flush().await?;

    tracing::debug!(store = %store.id(), bytes, "snapshot staged");
    Ok(staged)
}

enum Change {
    Record(LoreRecord),
    Deleted(String),
    Feedback(FeedbackEntry),
}

/// Split changes into batches of at most `size`: records first, then
/// tombstones, then feedback, each in collection order.
fn chunk_changes(
    records: Vec<LoreRecord>,
    deleted: Vec<String>,
    feedback: Vec<FeedbackEntry>,
    size: usize,
) -> Vec<ChangeBatch> {
    let size = size.max(1);
    let changes = records
        .into_iter()
        .map(Change::Record)
        .chain(deleted.into_iter().map(Change::Deleted))
        .chain(feedback.into_iter().map(Change::Feedback));

    let mut batches = Vec::new();
    let mut current = ChangeBatch::default();
    for change in changes {
        match change {
            Change::Record(r) => current.records.push(r),
            Change::Deleted(id) => current.deleted.push(id),
            Change::Feedback(f) => current.feedback.push(f),
        }
        if current.len() == size {
            batches.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lore::{Category, FeedbackOutcome, NewLore};

    fn record(id: &str) -> LoreRecord {
        let (_dir, store) = crate::lore::test_support::temp_store();
        let mut record = store.capture(NewLore::new("x", Category::Pattern)).unwrap();
        record.id = id.into();
        record
    }

    fn feedback(id: i64) -> FeedbackEntry {
        FeedbackEntry {
            id,
            lore_id: "r".into(),
            outcome: FeedbackOutcome::Helpful,
            created_at: timestamp(),
        }
    }

    #[test]
    fn chunks_respect_batch_size_and_order() {
        let batches = chunk_changes(
            vec![record("a"), record("b"), record("c")],
            vec!["d".into()],
            vec![feedback(1)],
            2,
        );
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].records.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(batches[1].records[0].id, "c");
        assert_eq!(batches[1].deleted, ["d"]);
        assert_eq!(batches[2].feedback[0].id, 1);
        assert!(batches.iter().all(|b| b.len() <= 2));
    }

    #[test]
    fn no_changes_means_no_batches() {
        assert!(chunk_changes(Vec::new(), Vec::new(), Vec::new(), 10).is_empty());
    }

    #[test]
    fn zero_batch_size_is_treated_as_one() {
        assert_eq!(chunk_changes(vec![record("a"), record("b")], Vec::new(), Vec::new(), 0).len(), 2);
    }

    #[tokio::test]
    async fn offline_engine_refuses_everything() {
        let engine = SyncEngine::offline();
        let cancel = CancellationToken::new();
        assert!(!engine.is_online());
        assert!(matches!(engine.health(&cancel).await, Err(Error::Offline)));
        assert!(matches!(engine.list_stores(None, &cancel).await, Err(Error::Offline)));
        assert_eq!(engine.state(&StoreId::default_store()), SyncState::Idle);
    }

    #[tokio::test]
    async fn store_management_validates_before_the_network() {
        let engine = SyncEngine::offline();
        let cancel = CancellationToken::new();
        assert!(matches!(
            engine.create_store("default", None, &cancel).await,
            Err(Error::ReservedStoreId(_))
        ));
        assert!(matches!(
            engine.delete_store("default", &cancel).await,
            Err(Error::ReservedStoreId(_))
        ));
        assert!(matches!(
            engine.store_info("Bad Id", &cancel).await,
            Err(Error::InvalidStoreId { .. })
        ));
        assert!(matches!(
            engine.create_store("team/api", None, &cancel).await,
            Err(Error::Offline)
        ));
    }
}
