//! Maps store identifiers to on-disk stores under one root directory.
//!
//! Layout: `<root>/<encoded-id>/lore.db`. The registry hands out at most one
//! [`LocalStore`] per identifier, so a process never holds two writers on the
//! same file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{Result, StoreError};
use crate::lore::{LocalStore, DB_FILE};
use crate::store_id::{self, StoreId};

pub struct StoreRegistry {
    root: PathBuf,
    open: Mutex<HashMap<StoreId, Arc<LocalStore>>>,
}

impl StoreRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store_dir(&self, id: &StoreId) -> PathBuf {
        self.root.join(id.encode())
    }

    pub fn db_path(&self, id: &StoreId) -> PathBuf {
        self.store_dir(id).join(DB_FILE)
    }

    pub fn exists(&self, id: &StoreId) -> bool {
        self.db_path(id).exists()
    }

    /// The shared handle for `id`, opening (and creating) the store on first use.
    pub fn open(&self, id: &StoreId) -> Result<Arc<LocalStore>> {
        let mut open = self
            .open
            .lock()
            .map_err(|_| StoreError::Poisoned("store registry"))?;

        if let Some(store) = open.get(id) {
            return Ok(Arc::clone(store));
        }

        let store = Arc::new(LocalStore::open(id.clone(), self.db_path(id))?);
        open.insert(id.clone(), Arc::clone(&store));
        Ok(store)
    }

    /// Stores present on disk. Directories that do not decode to a valid
    /// identifier are skipped.
    pub fn list_local(&self) -> Result<Vec<StoreId>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.path().join(DB_FILE).is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            match store_id::decode(name) {
                Ok(id) => ids.push(id),
                Err(e) => tracing::debug!(dir = %name, error = %e, "skipping non-store directory"),
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn store_paths_use_encoded_ids() {
        let registry = StoreRegistry::new("/var/lore");
        let id = StoreId::parse("team/api").unwrap();
        assert_eq!(
            registry.db_path(&id),
            PathBuf::from("/var/lore/team--api/lore.db")
        );
    }

    #[test]
    fn open_returns_the_same_handle() {
        let tmp = TempDir::new().unwrap();
        let registry = StoreRegistry::new(tmp.path());
        let id = StoreId::parse("team/api").unwrap();

        let a = registry.open(&id).unwrap();
        let b = registry.open(&id).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.exists(&id));
    }

    #[test]
    fn list_local_decodes_directories() {
        let tmp = TempDir::new().unwrap();
        let registry = StoreRegistry::new(tmp.path());
        for raw in ["default", "team/api", "solo"] {
            registry.open(&StoreId::parse(raw).unwrap()).unwrap();
        }
        std::fs::create_dir_all(tmp.path().join("Not_A_Store")).unwrap();

        let listed: Vec<String> = registry
            .list_local()
            .unwrap()
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(listed, ["default", "solo", "team/api"]);
    }

    #[test]
    fn list_local_on_missing_root_is_empty() {
        let registry = StoreRegistry::new("/nonexistent/lore/root");
        assert!(registry.list_local().unwrap().is_empty());
    }
}
