use lore::db;
use lore::lore::{Category, LocalStore, NewLore, DB_FILE};
use lore::store_id::StoreId;
use tempfile::TempDir;

#[test]
fn open_creates_new_db_at_nonexistent_path() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("team--api").join(DB_FILE);

    assert!(!db_path.exists());

    let conn = db::open_database(&db_path).unwrap();

    assert!(db_path.exists());
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM lore", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn health_check_passes_on_valid_db() {
    let tmp = TempDir::new().unwrap();
    let store = LocalStore::open(StoreId::default_store(), tmp.path().join(DB_FILE)).unwrap();
    let record = store.capture(NewLore::new("x", Category::Security)).unwrap();
    store
        .apply_feedback(&record.id, lore::lore::FeedbackOutcome::Helpful)
        .unwrap();

    let report = store.health().unwrap();
    assert!(report.integrity_ok);
    assert_eq!(report.schema_version, db::migrations::CURRENT_SCHEMA_VERSION);
    assert_eq!(report.lore_count, 1);
    assert_eq!(report.queue_count, 1);
}

#[test]
fn busy_timeout_and_wal_are_set() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("test.db");

    let conn = db::open_database(&db_path).unwrap();

    let timeout: i64 = conn
        .pragma_query_value(None, "busy_timeout", |row| row.get(0))
        .unwrap();
    assert_eq!(timeout, 5000);
    let mode: String = conn
        .pragma_query_value(None, "journal_mode", |row| row.get(0))
        .unwrap();
    assert_eq!(mode, "wal");
}

#[test]
fn reader_connections_refuse_writes() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("test.db");
    drop(db::open_database(&db_path).unwrap());

    let reader = db::open_reader(&db_path).unwrap();
    let result = reader.execute(
        "INSERT INTO metadata (key, value) VALUES ('k', 'v')",
        [],
    );
    assert!(result.is_err());
}

#[test]
fn store_reopens_with_data_intact() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join(DB_FILE);
    let id = {
        let store = LocalStore::open(StoreId::default_store(), &path).unwrap();
        store.capture(NewLore::new("durable", Category::Architecture)).unwrap().id
    };

    let store = LocalStore::open(StoreId::default_store(), &path).unwrap();
    assert_eq!(store.get(&id).unwrap().unwrap().content, "durable");
}
