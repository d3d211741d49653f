//! The tool-facing surface: store resolution, session references, feedback
//! routing, and sync entry points, composed over one registry, one session
//! tracker and one engine.
//!
//! Record operations are synchronous SQLite calls; async callers should run
//! them under `spawn_blocking`. Sync operations are async.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::lore::{FeedbackApplied, FeedbackOutcome, LocalStore, LoreRecord, NewLore, SearchFilter};
use crate::registry::StoreRegistry;
use crate::remote::Cursor;
use crate::session::{looks_like_ref, SessionTracker, TrackedLore};
use crate::store_id::StoreId;
use crate::sync::{BootstrapReport, PullReport, PushReport, SyncEngine, SyncReport};

/// A record returned to a caller, tagged with its session reference.
#[derive(Debug, Clone, Serialize)]
pub struct LoreHit {
    pub reference: String,
    pub store: StoreId,
    #[serde(flatten)]
    pub record: LoreRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackResult {
    /// The target as the caller wrote it.
    pub target: String,
    pub reference: String,
    pub store: StoreId,
    #[serde(flatten)]
    pub applied: FeedbackApplied,
}

pub struct Lore {
    registry: StoreRegistry,
    session: Arc<SessionTracker>,
    engine: SyncEngine,
    store_override: Option<String>,
}

impl Lore {
    pub fn new(registry: StoreRegistry, engine: SyncEngine) -> Self {
        Self {
            registry,
            session: Arc::new(SessionTracker::new()),
            engine,
            store_override: None,
        }
    }

    /// Store used when a call names none (the `LORE_STORE` override).
    pub fn with_store_override(mut self, store: Option<String>) -> Self {
        self.store_override = store;
        self
    }

    /// Share a session tracker with another surface.
    pub fn with_session(mut self, session: Arc<SessionTracker>) -> Self {
        self.session = session;
        self
    }

    pub fn registry(&self) -> &StoreRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn session(&self) -> &Arc<SessionTracker> {
        &self.session
    }

    pub fn resolve_store(&self, store: Option<&str>) -> Result<StoreId> {
        StoreId::resolve(store, self.store_override.as_deref())
    }

    pub fn open(&self, store: Option<&str>) -> Result<Arc<LocalStore>> {
        let id = self.resolve_store(store)?;
        self.registry.open(&id)
    }

    pub fn capture(&self, store: Option<&str>, new: NewLore) -> Result<LoreHit> {
        let local = self.open(store)?;
        let record = local.capture(new)?;
        Ok(self.hit(local.id(), record))
    }

    pub fn query(&self, store: Option<&str>, filter: &SearchFilter) -> Result<Vec<LoreHit>> {
        let local = self.open(store)?;
        let records = local.search(filter)?;
        Ok(records
            .into_iter()
            .map(|record| self.hit(local.id(), record))
            .collect())
    }

    /// Search several stores; results are merged by confidence and cut to
    /// `filter.limit`. References stay unique across all of them.
    pub fn query_stores(&self, stores: &[StoreId], filter: &SearchFilter) -> Result<Vec<LoreHit>> {
        let mut found: Vec<(StoreId, LoreRecord)> = Vec::new();
        for id in stores {
            let local = self.registry.open(id)?;
            found.extend(local.search(filter)?.into_iter().map(|r| (id.clone(), r)));
        }
        found.sort_by(|(sa, a), (sb, b)| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| sa.cmp(sb))
                .then_with(|| a.id.cmp(&b.id))
        });
        found.truncate(filter.limit);
        Ok(found
            .into_iter()
            .map(|(id, record)| self.hit(&id, record))
            .collect())
    }

    fn hit(&self, store: &StoreId, record: LoreRecord) -> LoreHit {
        LoreHit {
            reference: self.session.track(store, &record.id),
            store: store.clone(),
            record,
        }
    }

    /// Apply `outcome` to each target.
    ///
    /// A target is a session reference (`L3`), routed to the store it was
    /// issued for, or a raw record id in the resolved store. A target shaped
    /// like a reference that this session never issued is treated as a raw
    /// id. Every target is resolved and checked before the first outcome is
    /// applied, so an unknown reference or id changes nothing. Repeated
    /// targets naming the same record are applied once.
    ///
    /// Each store's targets are checked again and applied in one
    /// transaction. When targets span stores and a record is forgotten
    /// concurrently, stores applied before the failing one keep their
    /// feedback.
    pub fn feedback(
        &self,
        store: Option<&str>,
        targets: &[String],
        outcome: FeedbackOutcome,
    ) -> Result<Vec<FeedbackResult>> {
        if targets.is_empty() {
            return Err(Error::Invalid("feedback needs at least one target".into()));
        }

        let mut fallback: Option<StoreId> = None;
        let mut seen: HashSet<TrackedLore> = HashSet::new();
        let mut routed: BTreeMap<StoreId, Vec<(String, String)>> = BTreeMap::new();
        for target in targets {
            let target = target.trim();
            if target.is_empty() {
                return Err(Error::Invalid("empty feedback target".into()));
            }
            let issued = if looks_like_ref(target) {
                self.session.resolve(target).ok()
            } else {
                None
            };
            let tracked = match issued {
                Some(tracked) => tracked,
                None => {
                    let id = match &fallback {
                        Some(id) => id.clone(),
                        None => {
                            let id = self.resolve_store(store)?;
                            fallback = Some(id.clone());
                            id
                        }
                    };
                    TrackedLore {
                        store: id,
                        lore_id: target.to_string(),
                    }
                }
            };
            if !seen.insert(tracked.clone()) {
                continue;
            }
            routed
                .entry(tracked.store)
                .or_default()
                .push((target.to_string(), tracked.lore_id));
        }

        let mut stores = Vec::with_capacity(routed.len());
        for (id, items) in routed {
            let local = self.registry.open(&id)?;
            for (_, lore_id) in &items {
                local.ensure_visible(lore_id)?;
            }
            stores.push((local, items));
        }

        let mut results = Vec::new();
        for (local, items) in stores {
            let lore_ids: Vec<&str> = items.iter().map(|(_, lore_id)| lore_id.as_str()).collect();
            let applied = local.apply_feedback_batch(&lore_ids, outcome)?;
            for ((target, lore_id), applied) in items.into_iter().zip(applied) {
                results.push(FeedbackResult {
                    target,
                    reference: self.session.track(local.id(), &lore_id),
                    store: local.id().clone(),
                    applied,
                });
            }
        }
        Ok(results)
    }

    /// Forget every session reference; numbering restarts at `L1`.
    pub fn reset_session(&self) {
        self.session.clear();
    }

    /// Open the store for a sync call, refusing before touching disk when
    /// no remote is configured.
    fn open_for_sync(&self, store: Option<&str>) -> Result<Arc<LocalStore>> {
        let id = self.resolve_store(store)?;
        self.engine.ensure_online()?;
        self.registry.open(&id)
    }

    pub async fn bootstrap(
        &self,
        store: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<BootstrapReport> {
        let local = self.open_for_sync(store)?;
        self.engine.bootstrap(&local, cancel).await
    }

    pub async fn push(&self, store: Option<&str>, cancel: &CancellationToken) -> Result<PushReport> {
        let local = self.open_for_sync(store)?;
        self.engine.push(&local, cancel).await
    }

    pub async fn pull(
        &self,
        store: Option<&str>,
        since: Option<Cursor>,
        cancel: &CancellationToken,
    ) -> Result<PullReport> {
        let local = self.open_for_sync(store)?;
        self.engine.pull(&local, since, cancel).await
    }

    pub async fn sync(&self, store: Option<&str>, cancel: &CancellationToken) -> Result<SyncReport> {
        let local = self.open_for_sync(store)?;
        self.engine.sync(&local, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lore::Category;
    use tempfile::TempDir;

    fn lore(dir: &TempDir) -> Lore {
        Lore::new(StoreRegistry::new(dir.path()), SyncEngine::offline())
    }

    #[test]
    fn query_tags_results_with_stable_references() {
        let dir = TempDir::new().unwrap();
        let lore = lore(&dir);
        lore.capture(None, NewLore::new("use sqlx offline mode", Category::Tooling))
            .unwrap();
        lore.capture(None, NewLore::new("pin sqlx version", Category::Dependency))
            .unwrap();

        let filter = SearchFilter {
            text: Some("sqlx".into()),
            ..Default::default()
        };
        let first = lore.query(None, &filter).unwrap();
        let second = lore.query(None, &filter).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(
            first.iter().map(|h| &h.reference).collect::<Vec<_>>(),
            second.iter().map(|h| &h.reference).collect::<Vec<_>>()
        );
        assert!(first.iter().all(|h| h.store.as_str() == "default"));
    }

    #[test]
    fn store_override_applies_when_no_store_is_named() {
        let dir = TempDir::new().unwrap();
        let lore = lore(&dir).with_store_override(Some("team/api".into()));
        let hit = lore.capture(None, NewLore::new("x", Category::Pattern)).unwrap();
        assert_eq!(hit.store.as_str(), "team/api");
        let explicit = lore
            .capture(Some("solo"), NewLore::new("y", Category::Pattern))
            .unwrap();
        assert_eq!(explicit.store.as_str(), "solo");
    }

    #[test]
    fn feedback_with_unknown_reference_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let lore = lore(&dir);
        let hit = lore.capture(None, NewLore::new("x", Category::Pattern)).unwrap();

        let err = lore
            .feedback(None, &[hit.reference.clone(), "L99".into()], FeedbackOutcome::Helpful)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let store = lore.open(None).unwrap();
        assert_eq!(store.get(&hit.record.id).unwrap().unwrap().validation_count, 0);
        assert!(store.pending_feedback().unwrap().is_empty());
    }

    #[test]
    fn duplicate_targets_apply_once() {
        let dir = TempDir::new().unwrap();
        let lore = lore(&dir);
        let hit = lore.capture(None, NewLore::new("x", Category::Pattern)).unwrap();

        let results = lore
            .feedback(
                None,
                &[hit.reference.clone(), hit.record.id.clone()],
                FeedbackOutcome::Helpful,
            )
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].applied.validation_count, 1);
    }

    #[test]
    fn feedback_rejects_empty_targets() {
        let dir = TempDir::new().unwrap();
        let lore = lore(&dir);
        assert!(matches!(
            lore.feedback(None, &[], FeedbackOutcome::Helpful),
            Err(Error::Invalid(_))
        ));
        assert!(matches!(
            lore.feedback(None, &["  ".into()], FeedbackOutcome::Helpful),
            Err(Error::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn offline_sync_never_opens_a_store() {
        let dir = TempDir::new().unwrap();
        let lore = lore(&dir);
        let cancel = CancellationToken::new();

        assert!(matches!(lore.push(Some("team/api"), &cancel).await, Err(Error::Offline)));
        assert!(matches!(lore.bootstrap(None, &cancel).await, Err(Error::Offline)));
        assert!(!lore.registry().exists(&StoreId::parse("team/api").unwrap()));
        assert!(lore.registry().list_local().unwrap().is_empty());
    }
}
