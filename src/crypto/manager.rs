//! Encryption Manager
//!
//! Holds named keys and the active key for one database instance.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::error::{Result, SealError};

use super::cipher;
use super::keystore::{EncryptionKey, KeyRing, KeyStore};
use super::stream;
use super::KEY_LENGTH;

/// Summary of a stored key (never exposes key material)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    pub name: String,
    pub created_at: u64,
    pub active: bool,
}

/// Manages encryption keys and tagged encryption
///
/// ## Concurrency:
/// - `ring`: RwLock; encrypt/decrypt only copy key material out under a read
///   lock, so they run in parallel with each other
/// - Key creation, activation and removal take the write lock and persist the
///   ring before releasing it
pub struct EncryptionManager {
    store: KeyStore,
    ring: RwLock<KeyRing>,
}

impl EncryptionManager {
    /// Open (or create) the key store in `key_dir`
    pub fn open(key_dir: &Path) -> Result<Self> {
        let store = KeyStore::open(key_dir)?;
        let ring = store.load()?;

        tracing::debug!(
            keys = ring.keys.len(),
            active = ?ring.active,
            "Loaded key ring"
        );

        Ok(Self {
            store,
            ring: RwLock::new(ring),
        })
    }

    // =========================================================================
    // Key Management
    // =========================================================================

    /// Create and persist a new key. The first key created becomes active.
    pub fn generate_key(&self, name: &str) -> Result<()> {
        validate_key_name(name)?;

        let mut ring = self.ring.write();
        if ring.keys.contains_key(name) {
            return Err(SealError::KeyExists(name.to_string()));
        }

        let mut next = ring.clone();
        next.keys.insert(name.to_string(), EncryptionKey::generate(name));
        if next.active.is_none() {
            next.active = Some(name.to_string());
        }

        self.store.save(&next)?;
        *ring = next;

        tracing::info!(key = name, "Generated encryption key");
        Ok(())
    }

    /// Make `name` the key used for new encryptions
    pub fn set_active_key(&self, name: &str) -> Result<()> {
        let mut ring = self.ring.write();
        if !ring.keys.contains_key(name) {
            return Err(SealError::KeyNotFound(name.to_string()));
        }

        let mut next = ring.clone();
        next.active = Some(name.to_string());
        self.store.save(&next)?;
        *ring = next;

        tracing::info!(key = name, "Activated encryption key");
        Ok(())
    }

    /// Remove a retired key. Data sealed under it becomes undecryptable.
    pub fn delete_key(&self, name: &str) -> Result<()> {
        let mut ring = self.ring.write();
        if !ring.keys.contains_key(name) {
            return Err(SealError::KeyNotFound(name.to_string()));
        }
        if ring.active.as_deref() == Some(name) {
            return Err(SealError::KeyInUse(name.to_string()));
        }

        let mut next = ring.clone();
        next.keys.remove(name);
        self.store.save(&next)?;
        *ring = next;

        tracing::warn!(key = name, "Deleted encryption key");
        Ok(())
    }

    /// Name of the active key, if any
    pub fn active_key(&self) -> Option<String> {
        self.ring.read().active.clone()
    }

    pub fn has_key(&self, name: &str) -> bool {
        self.ring.read().keys.contains_key(name)
    }

    /// All stored keys, by name
    pub fn list_keys(&self) -> Vec<KeyInfo> {
        let ring = self.ring.read();
        ring.keys
            .values()
            .map(|key| KeyInfo {
                name: key.name.clone(),
                created_at: key.created_at,
                active: ring.active.as_deref() == Some(key.name.as_str()),
            })
            .collect()
    }

    // =========================================================================
    // Data Encryption
    // =========================================================================

    /// Encrypt under the active key; the output carries the key's name
    pub fn encrypt_data(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let (name, material) = self.active_material()?;
        cipher::seal(&name, &material, plaintext)
    }

    /// Decrypt data produced by [`encrypt_data`](Self::encrypt_data) under any retained key
    pub fn decrypt_data(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let envelope = cipher::parse(ciphertext)?;
        let material = self.material(envelope.key_name)?;
        cipher::open(&envelope, &material)
    }

    /// Name of the key a ciphertext is tagged with
    pub fn key_name_of(&self, ciphertext: &[u8]) -> Result<String> {
        Ok(cipher::parse(ciphertext)?.key_name.to_string())
    }

    // =========================================================================
    // File Encryption
    // =========================================================================

    /// Stream-encrypt `src` into `dst` under the active key. Returns plaintext bytes.
    pub fn encrypt_file(&self, src: &Path, dst: &Path) -> Result<u64> {
        let (name, material) = self.active_material()?;
        let reader = BufReader::new(File::open(src)?);

        let written = write_via_temp(dst, |writer| {
            stream::encrypt_stream(&name, &material, reader, writer)
        })?;

        tracing::debug!(src = %src.display(), dst = %dst.display(), bytes = written, key = %name, "Encrypted file");
        Ok(written)
    }

    /// Stream-decrypt `src` into `dst`, resolving the key from the file header
    pub fn decrypt_file(&self, src: &Path, dst: &Path) -> Result<u64> {
        let reader = BufReader::new(File::open(src)?);

        let written = write_via_temp(dst, |writer| {
            stream::decrypt_stream(reader, |name| self.material(name), writer)
        })?;

        tracing::debug!(src = %src.display(), dst = %dst.display(), bytes = written, "Decrypted file");
        Ok(written)
    }

    /// Directory holding the key store
    pub fn key_dir(&self) -> &Path {
        self.store.dir()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn active_material(&self) -> Result<(String, [u8; KEY_LENGTH])> {
        let ring = self.ring.read();
        let name = ring.active.as_ref().ok_or(SealError::NoActiveKey)?;
        let key = ring
            .keys
            .get(name)
            .ok_or_else(|| SealError::KeyNotFound(name.clone()))?;
        Ok((name.clone(), key.material))
    }

    fn material(&self, name: &str) -> Result<[u8; KEY_LENGTH]> {
        self.ring
            .read()
            .keys
            .get(name)
            .map(|key| key.material)
            .ok_or_else(|| SealError::KeyNotFound(name.to_string()))
    }
}

fn validate_key_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 255 {
        return Err(SealError::InvalidName(format!(
            "key name must be 1-255 bytes, got {}",
            name.len()
        )));
    }
    Ok(())
}

/// Write through a temporary sibling; renamed on success, removed on failure
fn write_via_temp<F>(dst: &Path, write: F) -> Result<u64>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<u64>,
{
    let tmp = temp_sibling(dst);
    let outcome = (|| -> Result<u64> {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        let written = write(&mut writer)?;
        let file = writer
            .into_inner()
            .map_err(|e| SealError::Io(e.into_error()))?;
        file.sync_all()?;
        fs::rename(&tmp, dst)?;
        Ok(written)
    })();

    if outcome.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    outcome
}

fn temp_sibling(dst: &Path) -> PathBuf {
    let mut name = dst
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    dst.with_file_name(name)
}
