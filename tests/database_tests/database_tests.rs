//! Tests for Database
//!
//! These tests verify:
//! - Directory layout and the data directory lock
//! - Document CRUD and batch inserts through the facade
//! - Collection management
//! - Collection and database statistics
//! - Key rotation against stored documents
//! - Database lifecycle (open/flush/close)

use std::fs;

use sealdb::value::fields_from_json;
use sealdb::{Config, Database, Fields, SealError, SyncStrategy, Value};
use serde_json::json;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn test_config(temp_dir: &TempDir) -> Config {
    Config::builder()
        .data_dir(temp_dir.path())
        .sync_strategy(SyncStrategy::EveryWrite)
        .build()
}

fn setup_temp_db() -> (TempDir, Database) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let temp_dir = TempDir::new().unwrap();
    let db = Database::open(test_config(&temp_dir)).unwrap();
    (temp_dir, db)
}

fn fields(value: serde_json::Value) -> Fields {
    fields_from_json(value).unwrap()
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_open_creates_layout() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("mydb");

    let db = Database::open(Config::builder().data_dir(&data_dir).build()).unwrap();

    assert!(data_dir.join(".lock").exists());
    assert!(data_dir.join("ledger.chain").exists());
    assert!(data_dir.join("keys/master.key").exists());
    assert!(data_dir.join("keys/keyring.bin").exists());
    assert!(data_dir.join("collections").is_dir());
    assert_eq!(db.ledger_len(), 1);
    assert_eq!(db.encryption().active_key().as_deref(), Some("default"));
}

#[test]
fn test_second_open_is_rejected_until_close() {
    let (temp_dir, db) = setup_temp_db();

    let second = Database::open(test_config(&temp_dir));
    assert!(matches!(second, Err(SealError::AlreadyOpen(_))));

    db.close().unwrap();
    assert!(Database::open(test_config(&temp_dir)).is_ok());
}

#[test]
fn test_lock_released_on_drop() {
    let (temp_dir, db) = setup_temp_db();
    drop(db);
    assert!(Database::open(test_config(&temp_dir)).is_ok());
}

#[test]
fn test_invalid_config_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .btree_min_degree(1)
        .build();

    assert!(matches!(Database::open(config), Err(SealError::Config(_))));
}

#[test]
fn test_custom_default_key_name() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .default_key_name("primary")
        .build();

    let db = Database::open(config).unwrap();
    assert_eq!(db.encryption().active_key().as_deref(), Some("primary"));
}

// =============================================================================
// Document Tests
// =============================================================================

#[test]
fn test_insert_get_round_trip() {
    let (_temp, db) = setup_temp_db();
    let doc = fields(json!({
        "name": "Ωmega ✓",
        "score": 9.5,
        "active": true,
        "nested": { "list": [1, "two", null] }
    }));

    let id = db.insert("users", doc.clone()).unwrap();
    let stored = db.get("users", &id).unwrap();

    assert_eq!(stored.fields, doc);
    assert_eq!(stored.id, id);
    assert_eq!(stored.collection, "users");
    assert_eq!(stored.version, 1);
}

#[test]
fn test_generated_ids_are_simple_uuids() {
    let (_temp, db) = setup_temp_db();
    let id = db.insert("users", Fields::new()).unwrap();

    assert_eq!(id.len(), 32);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn test_duplicate_id_is_rejected() {
    let (_temp, db) = setup_temp_db();
    db.insert_with_id("users", "u1", Fields::new()).unwrap();

    let again = db.insert_with_id("users", "u1", Fields::new());
    assert!(matches!(again, Err(SealError::DuplicateId { .. })));
    assert_eq!(db.ledger_len(), 2);
}

#[test]
fn test_empty_id_is_rejected() {
    let (_temp, db) = setup_temp_db();
    let result = db.insert_with_id("users", "", Fields::new());
    assert!(matches!(result, Err(SealError::InvalidName(_))));
}

#[test]
fn test_insert_many_records_one_block_per_document() {
    let (_temp, db) = setup_temp_db();
    let before = db.ledger_len();

    let ids = db
        .insert_many(
            "users",
            vec![
                fields(json!({ "name": "a" })),
                fields(json!({ "name": "b" })),
                fields(json!({ "name": "c" })),
            ],
        )
        .unwrap();

    assert_eq!(ids.len(), 3);
    assert_eq!(db.ledger_len(), before + 3);
    assert_eq!(db.count("users").unwrap(), 3);
    for (id, name) in ids.iter().zip(["a", "b", "c"]) {
        let doc = db.get("users", id).unwrap();
        assert_eq!(doc.get("name"), Some(&Value::from(name)));
    }

    // Insertion order follows input order
    let found: Vec<String> = db
        .find("users", sealdb::Query::all())
        .unwrap()
        .to_vec()
        .unwrap()
        .into_iter()
        .map(|d| d.id)
        .collect();
    assert_eq!(found, ids);
    assert!(db.verify_chain().unwrap().is_valid());
}

#[test]
fn test_insert_many_empty_batch() {
    let (_temp, db) = setup_temp_db();
    let before = db.ledger_len();

    assert!(db.insert_many("users", Vec::new()).unwrap().is_empty());
    assert_eq!(db.ledger_len(), before);
    assert_eq!(db.list_collections(), vec!["users"]);
}

#[test]
fn test_update_merges_top_level_fields() {
    let (_temp, db) = setup_temp_db();
    let id = db
        .insert("users", fields(json!({ "name": "Alice", "age": 30, "city": "Oslo" })))
        .unwrap();

    let updated = db
        .update("users", &id, fields(json!({ "age": 31, "email": "a@example.com" })))
        .unwrap();
    assert!(updated);

    let doc = db.get("users", &id).unwrap();
    assert_eq!(doc.version, 2);
    assert_eq!(doc.get("name"), Some(&Value::from("Alice")));
    assert_eq!(doc.get("city"), Some(&Value::from("Oslo")));
    assert_eq!(doc.get("age"), Some(&Value::from(31)));
    assert_eq!(doc.get("email"), Some(&Value::from("a@example.com")));
}

#[test]
fn test_update_missing_document_is_not_found() {
    let (_temp, db) = setup_temp_db();
    db.create_collection("users").unwrap();

    let result = db.update("users", "ghost", Fields::new());
    assert!(matches!(result, Err(SealError::NotFound { .. })));
}

#[test]
fn test_delete_then_get_is_not_found() {
    let (_temp, db) = setup_temp_db();
    let id = db.insert("users", fields(json!({ "name": "Bob" }))).unwrap();

    assert!(db.delete("users", &id).unwrap());
    assert!(matches!(db.get("users", &id), Err(SealError::NotFound { .. })));
    assert!(matches!(db.delete("users", &id), Err(SealError::NotFound { .. })));
    assert_eq!(db.count("users").unwrap(), 0);
}

#[test]
fn test_deleted_id_can_be_reused() {
    let (_temp, db) = setup_temp_db();
    db.insert_with_id("users", "u1", fields(json!({ "v": 1 }))).unwrap();
    db.delete("users", "u1").unwrap();
    db.insert_with_id("users", "u1", fields(json!({ "v": 2 }))).unwrap();

    assert_eq!(db.get("users", "u1").unwrap().get("v"), Some(&Value::from(2)));
}

#[test]
fn test_operations_on_missing_collection() {
    let (_temp, db) = setup_temp_db();

    assert!(matches!(db.get("nope", "x"), Err(SealError::CollectionNotFound(_))));
    assert!(matches!(db.find("nope", sealdb::Query::all()), Err(SealError::CollectionNotFound(_))));
    assert!(db.count("nope").unwrap_err().is_not_found());
}

// =============================================================================
// Collection Management Tests
// =============================================================================

#[test]
fn test_create_list_drop_collections() {
    let (temp_dir, db) = setup_temp_db();

    db.create_collection("orders").unwrap();
    db.insert("users", Fields::new()).unwrap();
    assert_eq!(db.list_collections(), vec!["orders", "users"]);

    assert!(matches!(db.create_collection("orders"), Err(SealError::AlreadyExists(_))));

    db.drop_collection("users").unwrap();
    assert_eq!(db.list_collections(), vec!["orders"]);
    assert!(!temp_dir.path().join("collections/users.dat").exists());
    assert!(!temp_dir.path().join("collections/users.idx").exists());
    assert!(matches!(db.drop_collection("users"), Err(SealError::CollectionNotFound(_))));
}

#[test]
fn test_invalid_collection_names() {
    let (_temp, db) = setup_temp_db();

    for name in ["", "has space", "../escape", "dot.name"] {
        assert!(
            matches!(db.create_collection(name), Err(SealError::InvalidName(_))),
            "{:?} should be rejected",
            name
        );
    }
    let too_long = "x".repeat(65);
    assert!(matches!(db.insert(&too_long, Fields::new()), Err(SealError::InvalidName(_))));
}

#[test]
fn test_collections_are_rediscovered_on_open() {
    let (temp_dir, db) = setup_temp_db();
    db.create_collection("empty").unwrap();
    db.insert("users", Fields::new()).unwrap();
    db.close().unwrap();

    let db = Database::open(test_config(&temp_dir)).unwrap();
    assert_eq!(db.list_collections(), vec!["empty", "users"]);
    assert_eq!(db.count("users").unwrap(), 1);
}

#[test]
fn test_dropped_handle_reports_missing_collection() {
    let (_temp, db) = setup_temp_db();
    db.insert_with_id("users", "u1", Fields::new()).unwrap();
    let handle = db.collection("users").unwrap();

    db.drop_collection("users").unwrap();
    assert!(matches!(handle.get("u1"), Err(SealError::CollectionNotFound(_))));
}

#[cfg(unix)]
#[test]
fn test_failed_drop_keeps_collection_registered() {
    let (temp_dir, db) = setup_temp_db();
    db.insert_with_id("users", "u1", fields(json!({ "n": 1 }))).unwrap();

    // A directory in place of the payload store cannot be removed as a file
    let data = temp_dir.path().join("collections/users.dat");
    fs::remove_file(&data).unwrap();
    fs::create_dir(&data).unwrap();

    assert!(matches!(db.drop_collection("users"), Err(SealError::Io(_))));
    assert_eq!(db.list_collections(), vec!["users"]);
    assert_eq!(db.get("users", "u1").unwrap().get("n"), Some(&Value::from(1)));

    // Once the obstacle is gone the drop goes through
    fs::remove_dir(&data).unwrap();
    db.drop_collection("users").unwrap();
    assert!(db.list_collections().is_empty());
    assert!(!temp_dir.path().join("collections/users.idx").exists());
}

// =============================================================================
// Statistics Tests
// =============================================================================

#[test]
fn test_collection_stats() {
    let (temp_dir, db) = setup_temp_db();
    for i in 0..20 {
        db.insert_with_id("users", &format!("u{:02}", i), fields(json!({ "n": i })))
            .unwrap();
    }
    for i in 0..5 {
        db.delete("users", &format!("u{:02}", i)).unwrap();
    }

    let stats = db.collection_stats("users").unwrap();
    assert_eq!(stats.name, "users");
    assert_eq!(stats.documents, 15);
    assert_eq!(
        stats.payload_bytes,
        fs::metadata(temp_dir.path().join("collections/users.dat")).unwrap().len()
    );
    assert!(stats.live_bytes < stats.payload_bytes);
    assert!(stats.reclaimable_bytes() > 0);
    assert!(stats.index_height >= 1);

    db.compact("users").unwrap();
    let compacted = db.collection_stats("users").unwrap();
    assert_eq!(compacted.documents, 15);
    assert_eq!(compacted.live_bytes, stats.live_bytes);
    assert_eq!(compacted.reclaimable_bytes(), 0);

    assert!(matches!(
        db.collection_stats("missing"),
        Err(SealError::CollectionNotFound(_))
    ));
}

#[test]
fn test_database_stats() {
    let (_temp, db) = setup_temp_db();
    db.create_collection("empty").unwrap();
    db.insert_many("users", vec![Fields::new(), Fields::new()]).unwrap();
    db.insert("orders", Fields::new()).unwrap();

    let stats = db.stats().unwrap();
    let names: Vec<&str> = stats.collections.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["empty", "orders", "users"]);
    assert_eq!(stats.documents, 3);
    assert_eq!(stats.collections[0].documents, 0);
    assert_eq!(stats.ledger_blocks, db.ledger_len());
    assert_eq!(stats.ledger_blocks, 4);
    assert_eq!(
        stats.payload_bytes,
        stats.collections.iter().map(|c| c.payload_bytes).sum::<u64>()
    );
}

// =============================================================================
// Encryption Tests
// =============================================================================

#[test]
fn test_documents_survive_key_rotation() {
    let (_temp, db) = setup_temp_db();
    let old = db.insert("users", fields(json!({ "n": 1 }))).unwrap();

    db.encryption().generate_key("k2").unwrap();
    db.encryption().set_active_key("k2").unwrap();
    let new = db.insert("users", fields(json!({ "n": 2 }))).unwrap();

    assert_eq!(db.get("users", &old).unwrap().get("n"), Some(&Value::from(1)));
    assert_eq!(db.get("users", &new).unwrap().get("n"), Some(&Value::from(2)));
}

#[test]
fn test_deleting_old_key_makes_its_documents_unreadable() {
    let (_temp, db) = setup_temp_db();
    let old = db.insert("users", fields(json!({ "n": 1 }))).unwrap();

    db.encryption().generate_key("k2").unwrap();
    db.encryption().set_active_key("k2").unwrap();
    db.encryption().delete_key("default").unwrap();

    assert!(matches!(db.get("users", &old), Err(SealError::KeyNotFound(_))));
    // Deleting never needs the old key
    assert!(db.delete("users", &old).unwrap());
}

#[test]
fn test_active_key_survives_reopen() {
    let (temp_dir, db) = setup_temp_db();
    db.encryption().generate_key("k2").unwrap();
    db.encryption().set_active_key("k2").unwrap();
    db.close().unwrap();

    let db = Database::open(test_config(&temp_dir)).unwrap();
    assert_eq!(db.encryption().active_key().as_deref(), Some("k2"));
    assert_eq!(db.encryption().list_keys().len(), 2);
}

// =============================================================================
// Ledger Access Tests
// =============================================================================

#[test]
fn test_explicit_audit_blocks() {
    let (_temp, db) = setup_temp_db();

    assert_eq!(db.add_block(b"checkpoint").unwrap(), 1);
    db.insert("users", Fields::new()).unwrap();
    assert_eq!(db.add_block(b"checkpoint 2").unwrap(), 3);

    let recent = db.recent_blocks(2).unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].index, 2);
    assert_eq!(recent[1].payload_hash, sealdb::ledger::hash_payload(b"checkpoint 2"));
    assert!(matches!(db.get_block(4), Err(SealError::BlockNotFound(4))));
}
