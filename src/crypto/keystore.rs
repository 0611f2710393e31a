//! On-disk key store
//!
//! ## Layout
//! ```text
//! keys/                (0700)
//!   ├── master.key     32 random bytes (0600)
//!   └── keyring.bin    nonce ‖ AES-GCM(master, bincode(KeyRing))  (0600)
//! ```
//!
//! The ring is rewritten through a temporary sibling and renamed into place,
//! so a crash mid-write leaves the previous ring intact.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SealError};

use super::cipher::{open_raw, seal_raw};
use super::KEY_LENGTH;

const MASTER_FILENAME: &str = "master.key";
const RING_FILENAME: &str = "keyring.bin";

/// A named symmetric key
#[derive(Clone, Serialize, Deserialize)]
pub struct EncryptionKey {
    pub name: String,
    pub(crate) material: [u8; KEY_LENGTH],
    /// Creation time (unix millis)
    pub created_at: u64,
}

impl EncryptionKey {
    /// Generate fresh random key material
    pub(crate) fn generate(name: &str) -> Self {
        let mut material = [0u8; KEY_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut material);
        Self {
            name: name.to_string(),
            material,
            created_at: crate::now_millis(),
        }
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("name", &self.name)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// All keys plus the active key name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyRing {
    pub active: Option<String>,
    pub keys: BTreeMap<String, EncryptionKey>,
}

/// Owns the key directory and the master key that seals the ring
pub struct KeyStore {
    dir: PathBuf,
    master: [u8; KEY_LENGTH],
}

impl KeyStore {
    /// Open or create a key store in `dir`
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        restrict_dir(dir)?;

        let master_path = dir.join(MASTER_FILENAME);
        let master = if master_path.exists() {
            let mut file = File::open(&master_path)?;
            let mut master = [0u8; KEY_LENGTH];
            file.read_exact(&mut master).map_err(|e| {
                SealError::Storage(format!("unreadable master key {}: {}", master_path.display(), e))
            })?;
            master
        } else {
            let mut master = [0u8; KEY_LENGTH];
            rand::rngs::OsRng.fill_bytes(&mut master);
            write_private(&master_path, &master)?;
            tracing::info!(path = %master_path.display(), "Created master key");
            master
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            master,
        })
    }

    /// Load the ring (empty if none has been saved yet)
    pub fn load(&self) -> Result<KeyRing> {
        let path = self.dir.join(RING_FILENAME);
        if !path.exists() {
            return Ok(KeyRing::default());
        }

        let sealed = fs::read(&path)?;
        let plain = open_raw(&self.master, &sealed).map_err(|_| {
            SealError::Decryption(format!("key ring {} cannot be unsealed", path.display()))
        })?;
        Ok(bincode::deserialize(&plain)?)
    }

    /// Persist the ring atomically
    pub fn save(&self, ring: &KeyRing) -> Result<()> {
        let plain = bincode::serialize(ring)?;
        let sealed = seal_raw(&self.master, &plain)?;

        let path = self.dir.join(RING_FILENAME);
        let tmp = self.dir.join(format!("{}.tmp", RING_FILENAME));
        write_private(&tmp, &sealed)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

// =============================================================================
// Private Helpers
// =============================================================================

fn write_private(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut options = OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(unix)]
fn restrict_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
