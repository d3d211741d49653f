mod helpers;

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use lore::lore::{Category, LoreUpdate, NewLore, SearchFilter};
use lore::registry::StoreRegistry;
use lore::store_id::StoreId;
use tempfile::TempDir;

#[test]
fn records_survive_a_new_registry() {
    let dir = TempDir::new().unwrap();
    let id = StoreId::parse("team/api").unwrap();
    let captured = {
        let registry = StoreRegistry::new(dir.path());
        let store = registry.open(&id).unwrap();
        store
            .capture(NewLore {
                context: Some("src/http.rs".into()),
                ..NewLore::new("retry idempotent requests only", Category::Gotcha)
            })
            .unwrap()
    };

    let registry = StoreRegistry::new(dir.path());
    assert_eq!(registry.list_local().unwrap(), [id.clone()]);
    let record = registry.open(&id).unwrap().get(&captured.id).unwrap().unwrap();
    assert_eq!(record, captured);
}

#[test]
fn concurrent_captures_all_land() {
    let (_dir, store) = helpers::temp_store();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                (0..25)
                    .map(|i| {
                        store
                            .capture(NewLore::new(format!("thread {t} item {i}"), Category::Testing))
                            .unwrap()
                            .id
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let ids: HashSet<String> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    assert_eq!(ids.len(), 100);
    assert_eq!(store.unsynced().unwrap().len(), 100);
}

#[test]
fn reads_run_beside_writes() {
    let (_dir, store) = helpers::temp_store();
    store.capture(NewLore::new("seed", Category::Pattern)).unwrap();

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for i in 0..50 {
                store
                    .capture(NewLore::new(format!("write {i}"), Category::Pattern))
                    .unwrap();
            }
        })
    };
    let filter = SearchFilter {
        limit: 1000,
        ..Default::default()
    };
    let mut last = 0;
    for _ in 0..50 {
        let seen = store.search(&filter).unwrap().len();
        assert!(seen >= last);
        last = seen;
    }
    writer.join().unwrap();
    assert_eq!(store.search(&filter).unwrap().len(), 51);
}

#[test]
fn forget_keeps_a_tombstone_for_sync() {
    let (_dir, store) = helpers::temp_store();
    let record = store.capture(NewLore::new("temporary", Category::Tooling)).unwrap();
    store.forget(&record.id).unwrap();

    assert!(store.get(&record.id).unwrap().is_none());
    assert!(store.search(&SearchFilter::default()).unwrap().is_empty());
    let tombstone = store.get_with_tombstone(&record.id).unwrap().unwrap();
    assert!(tombstone.is_deleted());
    assert_eq!(store.unsynced_deletions().unwrap().len(), 1);
    assert!(store.unsynced().unwrap().is_empty());

    // Forgotten records can be neither forgotten again nor edited.
    assert!(store.forget(&record.id).is_err());
    assert!(store
        .update(
            &record.id,
            LoreUpdate {
                content: Some("revived".into()),
                ..Default::default()
            }
        )
        .is_err());
}
