//! Tests for the Collection Store
//!
//! These tests verify:
//! - Index self-healing (missing, garbled and stale index files)
//! - Torn and zero-filled payload store tails after a crash
//! - Undoing mutations the ledger could not record
//! - Compaction
//! - Concurrent readers alongside a writer

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use sealdb::value::fields_from_json;
use sealdb::{Config, Database, Fields, Query, SealError, SyncStrategy};
use serde_json::json;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn test_config(temp_dir: &TempDir) -> Config {
    Config::builder()
        .data_dir(temp_dir.path())
        .sync_strategy(SyncStrategy::EveryWrite)
        .btree_min_degree(2)
        .index_flush_interval(1000)
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

fn index_path(temp_dir: &TempDir, name: &str) -> PathBuf {
    temp_dir.path().join("collections").join(format!("{}.idx", name))
}

fn data_path(temp_dir: &TempDir, name: &str) -> PathBuf {
    temp_dir.path().join("collections").join(format!("{}.dat", name))
}

/// Insert `n` documents (`{"n": i}` under id `doc-<i>`), then close
fn populate(temp_dir: &TempDir, n: usize) {
    let db = Database::open(test_config(temp_dir)).unwrap();
    for i in 0..n {
        db.insert_with_id("items", &format!("doc-{:03}", i), fields(json!({ "n": i })))
            .unwrap();
    }
    db.close().unwrap();
}

fn assert_all_present(db: &Database, n: usize) {
    assert_eq!(db.count("items").unwrap(), n);
    for i in 0..n {
        let doc = db.get("items", &format!("doc-{:03}", i)).unwrap();
        assert_eq!(doc.get("n").and_then(|v| v.as_f64()), Some(i as f64));
    }
}

// =============================================================================
// Self-Healing Tests
// =============================================================================

#[test]
fn test_missing_index_is_rebuilt() {
    let temp_dir = TempDir::new().unwrap();
    populate(&temp_dir, 40);

    fs::remove_file(index_path(&temp_dir, "items")).unwrap();

    let db = Database::open(test_config(&temp_dir)).unwrap();
    assert_all_present(&db, 40);
    assert!(index_path(&temp_dir, "items").exists());
}

#[test]
fn test_garbled_index_is_rebuilt() {
    let temp_dir = TempDir::new().unwrap();
    populate(&temp_dir, 40);

    let path = index_path(&temp_dir, "items");
    let mut bytes = fs::read(&path).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    let db = Database::open(test_config(&temp_dir)).unwrap();
    assert_all_present(&db, 40);
}

#[test]
fn test_stale_index_is_rebuilt() {
    let temp_dir = TempDir::new().unwrap();
    populate(&temp_dir, 10);
    let stale = fs::read(index_path(&temp_dir, "items")).unwrap();

    {
        let db = Database::open(test_config(&temp_dir)).unwrap();
        for i in 10..15 {
            db.insert_with_id("items", &format!("doc-{:03}", i), fields(json!({ "n": i })))
                .unwrap();
        }
        db.delete("items", "doc-000").unwrap();
        db.close().unwrap();
    }

    // Put back the index from before the second session
    fs::write(index_path(&temp_dir, "items"), &stale).unwrap();

    let db = Database::open(test_config(&temp_dir)).unwrap();
    assert_eq!(db.count("items").unwrap(), 14);
    assert!(db.get("items", "doc-000").unwrap_err().is_not_found());
    assert!(db.get("items", "doc-014").is_ok());
}

#[test]
fn test_rebuild_keeps_insertion_order() {
    let temp_dir = TempDir::new().unwrap();
    {
        let db = Database::open(test_config(&temp_dir)).unwrap();
        for id in ["c", "a", "b"] {
            db.insert_with_id("items", id, Fields::new()).unwrap();
        }
        // Updating keeps a document's original position
        db.update("items", "c", fields(json!({ "touched": true }))).unwrap();
        db.close().unwrap();
    }
    fs::remove_file(index_path(&temp_dir, "items")).unwrap();

    let db = Database::open(test_config(&temp_dir)).unwrap();
    let ids: Vec<String> = db
        .find("items", Query::all())
        .unwrap()
        .to_vec()
        .unwrap()
        .into_iter()
        .map(|d| d.id)
        .collect();
    assert_eq!(ids, vec!["c", "a", "b"]);

    // New inserts go after everything rebuilt
    db.insert_with_id("items", "d", Fields::new()).unwrap();
    let last = db.find("items", Query::all()).unwrap().to_vec().unwrap();
    assert_eq!(last.last().map(|d| d.id.as_str()), Some("d"));
}

#[test]
fn test_torn_payload_tail_is_discarded() {
    let temp_dir = TempDir::new().unwrap();
    populate(&temp_dir, 5);

    // Simulate a crash halfway through appending a frame
    let mut file = OpenOptions::new()
        .append(true)
        .open(data_path(&temp_dir, "items"))
        .unwrap();
    file.write_all(&[200, 0, 0, 0, 1, 2, 3, 4, 9, 9, 9]).unwrap();
    drop(file);

    let db = Database::open(test_config(&temp_dir)).unwrap();
    assert_all_present(&db, 5);
    db.insert_with_id("items", "after-crash", Fields::new()).unwrap();
    assert_eq!(db.count("items").unwrap(), 6);
}

#[test]
fn test_zero_filled_payload_tail_is_discarded() {
    let temp_dir = TempDir::new().unwrap();
    populate(&temp_dir, 5);
    let path = data_path(&temp_dir, "items");
    let good_len = fs::metadata(&path).unwrap().len();

    // Filesystems may extend a file with zeros before the data lands
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0u8; 8]).unwrap();
    drop(file);

    let db = Database::open(test_config(&temp_dir)).unwrap();
    assert_eq!(fs::metadata(&path).unwrap().len(), good_len);
    assert_all_present(&db, 5);
    db.insert_with_id("items", "after-crash", Fields::new()).unwrap();
    assert_eq!(db.count("items").unwrap(), 6);
}

#[test]
fn test_mid_store_damage_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    populate(&temp_dir, 5);
    fs::remove_file(index_path(&temp_dir, "items")).unwrap();

    // Flip a byte inside the first frame's body
    let path = data_path(&temp_dir, "items");
    let mut bytes = fs::read(&path).unwrap();
    bytes[8 + 8 + 20] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    assert!(matches!(
        Database::open(test_config(&temp_dir)),
        Err(SealError::Storage(_))
    ));
}

// =============================================================================
// Rollback Tests
// =============================================================================

#[test]
fn test_unrecorded_mutations_are_rolled_back() {
    let temp_dir = TempDir::new().unwrap();
    populate(&temp_dir, 5);

    // Genesis plus five inserts; shorten the tip block so appends are refused
    let ledger_path = temp_dir.path().join("ledger.chain");
    let ledger_len = fs::metadata(&ledger_path).unwrap().len();
    let file = OpenOptions::new().write(true).open(&ledger_path).unwrap();
    file.set_len(ledger_len - 10).unwrap();
    drop(file);

    let db = Database::open(test_config(&temp_dir)).unwrap();
    assert_eq!(db.ledger_len(), 5);
    assert_eq!(db.verify_chain().unwrap().first_invalid_index(), Some(5));
    let store_len = fs::metadata(data_path(&temp_dir, "items")).unwrap().len();

    assert!(matches!(
        db.insert_with_id("items", "unrecorded", fields(json!({ "n": 99 }))),
        Err(SealError::ChainTampered { index: 5 })
    ));
    assert!(matches!(
        db.get("items", "unrecorded"),
        Err(SealError::NotFound { .. })
    ));

    assert!(db.update("items", "doc-001", fields(json!({ "n": 99 }))).is_err());
    let doc = db.get("items", "doc-001").unwrap();
    assert_eq!(doc.version, 1);

    assert!(db.delete("items", "doc-002").is_err());

    assert_all_present(&db, 5);
    assert_eq!(fs::metadata(data_path(&temp_dir, "items")).unwrap().len(), store_len);
    assert_eq!(fs::metadata(&ledger_path).unwrap().len(), ledger_len - 10);
    db.close().unwrap();

    // Nothing left behind for the next open to replay
    let db = Database::open(test_config(&temp_dir)).unwrap();
    assert_all_present(&db, 5);
    assert!(matches!(
        db.get("items", "unrecorded"),
        Err(SealError::NotFound { .. })
    ));
}

// =============================================================================
// Compaction Tests
// =============================================================================

#[test]
fn test_compact_reclaims_space_and_keeps_documents() {
    let (temp_dir, db) = setup_temp_db();
    for i in 0..30 {
        db.insert_with_id("items", &format!("doc-{:03}", i), fields(json!({ "n": i })))
            .unwrap();
    }
    for i in 0..30 {
        db.update("items", &format!("doc-{:03}", i), fields(json!({ "pad": "x".repeat(64) })))
            .unwrap();
    }
    for i in 20..30 {
        db.delete("items", &format!("doc-{:03}", i)).unwrap();
    }

    let before = fs::metadata(data_path(&temp_dir, "items")).unwrap().len();
    let blocks = db.ledger_len();
    db.compact("items").unwrap();
    let after = fs::metadata(data_path(&temp_dir, "items")).unwrap().len();

    assert!(after < before);
    assert_eq!(db.ledger_len(), blocks);
    assert_all_present(&db, 20);

    // The compacted store reopens cleanly and keeps accepting writes
    db.insert_with_id("items", "doc-999", Fields::new()).unwrap();
    db.close().unwrap();
    let db = Database::open(test_config(&temp_dir)).unwrap();
    assert_eq!(db.count("items").unwrap(), 21);
    assert!(db.verify_chain().unwrap().is_valid());
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_readers_never_see_partial_updates() {
    let (_temp, db) = setup_temp_db();
    db.insert_with_id("items", "counter", fields(json!({ "a": 0, "b": 0 })))
        .unwrap();

    crossbeam::scope(|s| {
        let writer_db = &db;
        s.spawn(move |_| {
            for i in 1..=50 {
                writer_db
                    .update("items", "counter", fields(json!({ "a": i, "b": i })))
                    .unwrap();
            }
        });

        for _ in 0..4 {
            let reader_db = &db;
            s.spawn(move |_| {
                for _ in 0..50 {
                    let doc = reader_db.get("items", "counter").unwrap();
                    assert_eq!(doc.get("a"), doc.get("b"));
                }
            });
        }
    })
    .unwrap();

    assert_eq!(db.get("items", "counter").unwrap().version, 51);
}
