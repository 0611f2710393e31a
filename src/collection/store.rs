//! Collection Store
//!
//! Registry of open collections under `<data_dir>/collections/`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::crypto::EncryptionManager;
use crate::error::{Result, SealError};
use crate::ledger::Ledger;

use super::collection::{Collection, CollectionSettings};

/// Longest accepted collection name
pub const MAX_NAME_LEN: usize = 64;

/// Owns every open collection
///
/// ## Concurrency:
/// - `collections`: RwLock over the name map; lookups share it, create and
///   drop take it exclusively
/// - Each collection carries its own lock for document operations
pub struct CollectionStore {
    dir: PathBuf,
    settings: CollectionSettings,
    crypto: Arc<EncryptionManager>,
    ledger: Arc<Ledger>,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
}

impl CollectionStore {
    /// Open the store, discovering every collection already on disk
    pub(crate) fn open(
        dir: &Path,
        settings: CollectionSettings,
        crypto: Arc<EncryptionManager>,
        ledger: Arc<Ledger>,
    ) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let mut collections = HashMap::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("dat") {
                continue;
            }
            let name = match path.file_stem().and_then(|s| s.to_str()) {
                Some(name) if validate_name(name).is_ok() => name.to_string(),
                _ => {
                    tracing::warn!(path = %path.display(), "Ignoring file with invalid collection name");
                    continue;
                }
            };

            let collection = Collection::open(
                &name,
                dir,
                settings.clone(),
                Arc::clone(&crypto),
                Arc::clone(&ledger),
            )?;
            collections.insert(name, Arc::new(collection));
        }

        tracing::info!(dir = %dir.display(), collections = collections.len(), "Opened collection store");

        Ok(Self {
            dir: dir.to_path_buf(),
            settings,
            crypto,
            ledger,
            collections: RwLock::new(collections),
        })
    }

    /// Create an empty collection
    pub fn create_collection(&self, name: &str) -> Result<Arc<Collection>> {
        validate_name(name)?;

        let mut collections = self.collections.write();
        if collections.contains_key(name) {
            return Err(SealError::AlreadyExists(name.to_string()));
        }
        let collection = Arc::new(self.open_collection(name)?);
        collections.insert(name.to_string(), Arc::clone(&collection));

        tracing::info!(collection = name, "Created collection");
        Ok(collection)
    }

    /// Look up an existing collection
    pub fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.collections
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SealError::CollectionNotFound(name.to_string()))
    }

    /// Look up a collection, creating it on first use
    pub fn get_or_create(&self, name: &str) -> Result<Arc<Collection>> {
        if let Some(collection) = self.collections.read().get(name) {
            return Ok(Arc::clone(collection));
        }

        validate_name(name)?;
        let mut collections = self.collections.write();
        // Another caller may have created it between the two locks
        if let Some(collection) = collections.get(name) {
            return Ok(Arc::clone(collection));
        }
        let collection = Arc::new(self.open_collection(name)?);
        collections.insert(name.to_string(), Arc::clone(&collection));

        tracing::info!(collection = name, "Created collection");
        Ok(collection)
    }

    /// Remove a collection and all of its documents
    pub fn drop_collection(&self, name: &str) -> Result<()> {
        // Held until the files are gone so the name cannot be reused mid-drop
        let mut collections = self.collections.write();
        let collection = collections
            .get(name)
            .cloned()
            .ok_or_else(|| SealError::CollectionNotFound(name.to_string()))?;

        // The entry stays registered unless its files are really gone
        collection.destroy()?;
        collections.remove(name);
        tracing::info!(collection = name, "Dropped collection");
        Ok(())
    }

    /// Collection names, sorted
    pub fn list_collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Persist every collection's index
    pub fn flush_all(&self) -> Result<()> {
        let collections: Vec<Arc<Collection>> = self.collections.read().values().cloned().collect();
        for collection in collections {
            collection.flush()?;
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn open_collection(&self, name: &str) -> Result<Collection> {
        Collection::open(
            name,
            &self.dir,
            self.settings.clone(),
            Arc::clone(&self.crypto),
            Arc::clone(&self.ledger),
        )
    }
}

/// Collection names: 1-64 characters from `[A-Za-z0-9_-]`
pub fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if valid {
        Ok(())
    } else {
        Err(SealError::InvalidName(format!(
            "collection name {:?} must be 1-{} characters of [A-Za-z0-9_-]",
            name, MAX_NAME_LEN
        )))
    }
}
