//! Session references: short `L<n>` tokens for records an agent has seen.
//!
//! One counter is shared across every store tracked in a session, so a
//! reference never names two records even when several stores are queried.
//! The tracker is an ordinary value; pass it to whoever needs it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::store_id::StoreId;

const REF_PREFIX: char = 'L';

/// What a session reference points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TrackedLore {
    pub store: StoreId,
    pub lore_id: String,
}

#[derive(Debug, Default)]
struct Table {
    counter: u64,
    by_ref: HashMap<String, TrackedLore>,
    by_key: HashMap<String, String>,
}

#[derive(Debug, Default)]
pub struct SessionTracker {
    table: Mutex<Table>,
}

/// Reverse-index key. `:` never occurs in a store id, so the first `:` always
/// ends the store part.
fn key(store: &StoreId, lore_id: &str) -> String {
    format!("{store}:{lore_id}")
}

/// Whether `token` has the shape of a session reference (`L` + digits).
pub fn looks_like_ref(token: &str) -> bool {
    token
        .strip_prefix(REF_PREFIX)
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        // The table holds no invariants a panicking holder could break halfway.
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reference for `(store, lore_id)`, allocating the next one if new.
    pub fn track(&self, store: &StoreId, lore_id: &str) -> String {
        let mut table = self.lock();
        let key = key(store, lore_id);
        if let Some(existing) = table.by_key.get(&key) {
            return existing.clone();
        }

        table.counter += 1;
        let reference = format!("{REF_PREFIX}{}", table.counter);
        table.by_ref.insert(
            reference.clone(),
            TrackedLore {
                store: store.clone(),
                lore_id: lore_id.to_string(),
            },
        );
        table.by_key.insert(key, reference.clone());
        reference
    }

    pub fn resolve(&self, reference: &str) -> Result<TrackedLore> {
        self.lock()
            .by_ref
            .get(reference)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("session reference {reference}")))
    }

    pub fn resolve_by_lore(&self, store: &StoreId, lore_id: &str) -> Result<String> {
        self.lock()
            .by_key
            .get(&key(store, lore_id))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no session reference for {store}:{lore_id}")))
    }

    /// Copy of the whole reference table.
    pub fn all(&self) -> HashMap<String, TrackedLore> {
        self.lock().by_ref.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().by_ref.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every reference and restart numbering at `L1`.
    pub fn clear(&self) {
        let mut table = self.lock();
        *table = Table::default();
        tracing::debug!("session references cleared");
    }
}
