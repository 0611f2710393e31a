//! Tests for the Encryption Manager
//!
//! These tests verify:
//! - Data round trips (empty, binary, non-ASCII)
//! - Key lifecycle (generate, activate, delete) and its error cases
//! - Key ring persistence and on-disk permissions
//! - Streaming file encryption across chunk boundaries

use std::fs;
use std::path::PathBuf;

use sealdb::crypto::{EncryptionManager, CHUNK_SIZE};
use sealdb::SealError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_manager() -> (TempDir, EncryptionManager) {
    let temp_dir = TempDir::new().unwrap();
    let manager = EncryptionManager::open(&temp_dir.path().join("keys")).unwrap();
    manager.generate_key("k1").unwrap();
    (temp_dir, manager)
}

fn key_dir(temp_dir: &TempDir) -> PathBuf {
    temp_dir.path().join("keys")
}

// =============================================================================
// Data Encryption Tests
// =============================================================================

#[test]
fn test_round_trip_various_inputs() {
    let (_temp, manager) = setup_temp_manager();

    let inputs: Vec<Vec<u8>> = vec![
        Vec::new(),
        b"hello".to_vec(),
        "ключ · 鍵 · 🔑".as_bytes().to_vec(),
        (0..=255u8).collect(),
        vec![0u8; 100_000],
    ];
    for input in inputs {
        let sealed = manager.encrypt_data(&input).unwrap();
        assert_eq!(manager.decrypt_data(&sealed).unwrap(), input);
    }
}

#[test]
fn test_ciphertext_is_tagged_with_key_name() {
    let (_temp, manager) = setup_temp_manager();
    let sealed = manager.encrypt_data(b"x").unwrap();
    assert_eq!(manager.key_name_of(&sealed).unwrap(), "k1");
}

#[test]
fn test_same_plaintext_encrypts_differently() {
    let (_temp, manager) = setup_temp_manager();
    let a = manager.encrypt_data(b"same").unwrap();
    let b = manager.encrypt_data(b"same").unwrap();
    assert_ne!(a, b);
}

#[test]
fn test_corrupted_ciphertext_fails() {
    let (_temp, manager) = setup_temp_manager();
    let mut sealed = manager.encrypt_data(b"payload").unwrap();
    let last = sealed.len() - 1;
    sealed[last] ^= 0x01;

    assert!(matches!(manager.decrypt_data(&sealed), Err(SealError::Decryption(_))));
    assert!(matches!(manager.decrypt_data(b"garbage"), Err(SealError::Decryption(_))));
}

#[test]
fn test_no_active_key() {
    let temp_dir = TempDir::new().unwrap();
    let manager = EncryptionManager::open(&key_dir(&temp_dir)).unwrap();

    assert!(matches!(manager.encrypt_data(b"x"), Err(SealError::NoActiveKey)));
}

// =============================================================================
// Key Lifecycle Tests
// =============================================================================

#[test]
fn test_first_key_becomes_active() {
    let (_temp, manager) = setup_temp_manager();
    manager.generate_key("k2").unwrap();

    assert_eq!(manager.active_key().as_deref(), Some("k1"));
    let keys = manager.list_keys();
    assert_eq!(keys.len(), 2);
    assert!(keys.iter().any(|k| k.name == "k1" && k.active));
    assert!(keys.iter().any(|k| k.name == "k2" && !k.active));
}

#[test]
fn test_duplicate_and_invalid_key_names() {
    let (_temp, manager) = setup_temp_manager();

    assert!(matches!(manager.generate_key("k1"), Err(SealError::KeyExists(_))));
    assert!(matches!(manager.generate_key(""), Err(SealError::InvalidName(_))));
    assert!(matches!(
        manager.generate_key(&"n".repeat(256)),
        Err(SealError::InvalidName(_))
    ));
    assert!(manager.generate_key(&"n".repeat(255)).is_ok());
}

#[test]
fn test_rotation_keeps_old_ciphertext_readable() {
    let (_temp, manager) = setup_temp_manager();
    let old = manager.encrypt_data(b"old").unwrap();

    manager.generate_key("k2").unwrap();
    manager.set_active_key("k2").unwrap();
    let new = manager.encrypt_data(b"new").unwrap();

    assert_eq!(manager.key_name_of(&new).unwrap(), "k2");
    assert_eq!(manager.decrypt_data(&old).unwrap(), b"old");
    assert_eq!(manager.decrypt_data(&new).unwrap(), b"new");
}

#[test]
fn test_set_active_missing_key() {
    let (_temp, manager) = setup_temp_manager();
    assert!(matches!(manager.set_active_key("nope"), Err(SealError::KeyNotFound(_))));
}

#[test]
fn test_delete_key_rules() {
    let (_temp, manager) = setup_temp_manager();
    let sealed = manager.encrypt_data(b"under k1").unwrap();

    assert!(matches!(manager.delete_key("k1"), Err(SealError::KeyInUse(_))));
    assert!(matches!(manager.delete_key("nope"), Err(SealError::KeyNotFound(_))));

    manager.generate_key("k2").unwrap();
    manager.set_active_key("k2").unwrap();
    manager.delete_key("k1").unwrap();

    assert!(!manager.has_key("k1"));
    assert!(matches!(manager.decrypt_data(&sealed), Err(SealError::KeyNotFound(_))));
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_keys_persist_across_reopen() {
    let (temp_dir, manager) = setup_temp_manager();
    manager.generate_key("k2").unwrap();
    manager.set_active_key("k2").unwrap();
    let sealed = manager.encrypt_data(b"persisted").unwrap();
    drop(manager);

    let manager = EncryptionManager::open(&key_dir(&temp_dir)).unwrap();
    assert_eq!(manager.active_key().as_deref(), Some("k2"));
    assert_eq!(manager.decrypt_data(&sealed).unwrap(), b"persisted");
}

#[test]
fn test_independent_managers_do_not_share_keys() {
    let (_a_dir, a) = setup_temp_manager();
    let (_b_dir, b) = setup_temp_manager();

    let sealed = a.encrypt_data(b"secret").unwrap();
    // Same key name, different material
    assert!(matches!(b.decrypt_data(&sealed), Err(SealError::Decryption(_))));
}

#[test]
fn test_key_ring_is_not_stored_in_clear() {
    let (temp_dir, manager) = setup_temp_manager();
    manager.generate_key("very-distinctive-key-name").unwrap();

    let ring = fs::read(key_dir(&temp_dir).join("keyring.bin")).unwrap();
    let needle = b"very-distinctive-key-name";
    assert!(!ring.windows(needle.len()).any(|w| w == needle));
}

#[cfg(unix)]
#[test]
fn test_key_files_are_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let (temp_dir, _manager) = setup_temp_manager();
    let dir = key_dir(&temp_dir);

    let mode = |p: PathBuf| fs::metadata(p).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode(dir.clone()), 0o700);
    assert_eq!(mode(dir.join("master.key")), 0o600);
    assert_eq!(mode(dir.join("keyring.bin")), 0o600);
}

// =============================================================================
// File Encryption Tests
// =============================================================================

#[test]
fn test_file_round_trip_across_chunks() {
    let (temp_dir, manager) = setup_temp_manager();
    let src = temp_dir.path().join("plain.bin");
    let enc = temp_dir.path().join("plain.bin.sealed");
    let out = temp_dir.path().join("plain.out");

    let data: Vec<u8> = (0..CHUNK_SIZE * 3 + 123).map(|i| (i % 251) as u8).collect();
    fs::write(&src, &data).unwrap();

    assert_eq!(manager.encrypt_file(&src, &enc).unwrap(), data.len() as u64);
    assert_eq!(manager.decrypt_file(&enc, &out).unwrap(), data.len() as u64);
    assert_eq!(fs::read(&out).unwrap(), data);
}

#[test]
fn test_truncated_file_is_detected_and_output_removed() {
    let (temp_dir, manager) = setup_temp_manager();
    let src = temp_dir.path().join("plain.bin");
    let enc = temp_dir.path().join("sealed.bin");
    let out = temp_dir.path().join("out.bin");

    fs::write(&src, vec![5u8; CHUNK_SIZE * 2 + 1]).unwrap();
    manager.encrypt_file(&src, &enc).unwrap();

    let sealed = fs::read(&enc).unwrap();
    fs::write(&enc, &sealed[..sealed.len() - 40]).unwrap();

    assert!(matches!(manager.decrypt_file(&enc, &out), Err(SealError::Decryption(_))));
    assert!(!out.exists());
    assert!(!temp_dir.path().join("out.bin.partial").exists());
}

#[test]
fn test_file_under_deleted_key_is_unreadable() {
    let (temp_dir, manager) = setup_temp_manager();
    let src = temp_dir.path().join("a.txt");
    let enc = temp_dir.path().join("a.sealed");
    fs::write(&src, b"contents").unwrap();
    manager.encrypt_file(&src, &enc).unwrap();

    manager.generate_key("k2").unwrap();
    manager.set_active_key("k2").unwrap();
    manager.delete_key("k1").unwrap();

    let result = manager.decrypt_file(&enc, &temp_dir.path().join("a.out"));
    assert!(matches!(result, Err(SealError::KeyNotFound(_))));
}
