//! Database Module
//!
//! The facade that ties the components together.
//!
//! ## Responsibilities
//! - Lay out and lock the data directory
//! - Bootstrap the key ring, open the ledger and the collections
//! - Route document operations to their collection
//! - Expose ledger audit and verification

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::collection::{
    Collection, CollectionSettings, CollectionStats, CollectionStore, Document, Find, Query,
};
use crate::config::Config;
use crate::crypto::EncryptionManager;
use crate::error::{Result, SealError};
use crate::ledger::{Block, BlockIter, ChainStatus, Ledger};
use crate::lock::DataDirLock;
use crate::value::{fields_from_json, Fields};

/// Point-in-time figures for the whole database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    /// One entry per collection, sorted by name
    pub collections: Vec<CollectionStats>,
    pub documents: usize,
    pub payload_bytes: u64,
    /// Ledger blocks, genesis included
    pub ledger_blocks: u64,
}

/// An open SealDB instance
///
/// ## Concurrency Model: one writer per collection
///
/// - **Mutations** (insert/update/delete): take the collection's write lock
///   and hold it through encrypt → payload append → index update → ledger
///   append, so each mutation produces exactly one block
/// - **Reads** (get, each `find` step): take the collection's read lock and
///   run in parallel with each other
/// - **Ledger**: appends from different collections serialize on the
///   ledger's own Mutex; block indexes stay gap-free
/// - **Process**: `<data_dir>/.lock` keeps other handles out
pub struct Database {
    config: Config,
    crypto: Arc<EncryptionManager>,
    ledger: Arc<Ledger>,
    collections: CollectionStore,
    closed: bool,

    /// Declared last: released after everything else has been dropped
    _lock: DataDirLock,
}

impl Database {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const LEDGER_FILENAME: &'static str = "ledger.chain";
    const KEYS_DIR: &'static str = "keys";
    const COLLECTIONS_DIR: &'static str = "collections";

    /// Open or create a database with the given config
    ///
    /// On startup:
    /// 1. Create the data directory and take its lock
    /// 2. Open the key store, generating the default key on first use
    /// 3. Open the ledger (writing genesis if new)
    /// 4. Open every collection, rebuilding stale indexes
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        // Step 1: Directory and lock
        fs::create_dir_all(&config.data_dir)?;
        let lock = DataDirLock::acquire(&config.data_dir)?;

        // Step 2: Keys
        let crypto = Arc::new(EncryptionManager::open(
            &config.data_dir.join(Self::KEYS_DIR),
        )?);
        if crypto.active_key().is_none() && crypto.list_keys().is_empty() {
            crypto.generate_key(&config.default_key_name)?;
        }

        // Step 3: Ledger
        let ledger = Arc::new(Ledger::open(
            config.data_dir.join(Self::LEDGER_FILENAME),
            config.sync_strategy,
        )?);

        // Step 4: Collections
        let collections = CollectionStore::open(
            &config.data_dir.join(Self::COLLECTIONS_DIR),
            CollectionSettings::from_config(&config),
            Arc::clone(&crypto),
            Arc::clone(&ledger),
        )?;

        tracing::info!(
            data_dir = %config.data_dir.display(),
            blocks = ledger.len(),
            collections = collections.list_collections().len(),
            "Opened database"
        );

        Ok(Self {
            config,
            crypto,
            ledger,
            collections,
            closed: false,
            _lock: lock,
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config {
            data_dir: path.to_path_buf(),
            ..Config::default()
        };
        Self::open(config)
    }

    // =========================================================================
    // Documents
    // =========================================================================

    /// Insert a document under a generated id, creating the collection if needed
    pub fn insert(&self, collection: &str, fields: Fields) -> Result<String> {
        self.collections.get_or_create(collection)?.insert(None, fields)
    }

    /// Insert a document under a caller-chosen id
    pub fn insert_with_id(&self, collection: &str, id: &str, fields: Fields) -> Result<String> {
        self.collections
            .get_or_create(collection)?
            .insert(Some(id.to_string()), fields)
    }

    /// Insert documents under generated ids, creating the collection if needed
    ///
    /// One block per document. On error the documents before the failing one
    /// stay inserted.
    pub fn insert_many(&self, collection: &str, documents: Vec<Fields>) -> Result<Vec<String>> {
        self.collections
            .get_or_create(collection)?
            .insert_many(documents)
    }

    /// Insert a JSON object
    pub fn insert_json(&self, collection: &str, json: serde_json::Value) -> Result<String> {
        self.insert(collection, fields_from_json(json)?)
    }

    pub fn get(&self, collection: &str, id: &str) -> Result<Document> {
        self.collections.collection(collection)?.get(id)
    }

    /// Merge `patch` into a document. `Err(NotFound)` if it does not exist.
    pub fn update(&self, collection: &str, id: &str, patch: Fields) -> Result<bool> {
        self.collections.collection(collection)?.update(id, patch)
    }

    /// Remove a document. `Err(NotFound)` if it does not exist.
    pub fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        self.collections.collection(collection)?.delete(id)
    }

    /// Lazy, restartable query
    pub fn find(&self, collection: &str, query: impl Into<Query>) -> Result<Find> {
        let collection = self.collections.collection(collection)?;
        Ok(Find::new(collection, query.into()))
    }

    /// Lazy query with an arbitrary predicate, insertion order
    pub fn find_by<F>(&self, collection: &str, predicate: F) -> Result<Find>
    where
        F: Fn(&Document) -> bool + Send + Sync + 'static,
    {
        let collection = self.collections.collection(collection)?;
        Ok(Find::with_predicate(collection, Query::all(), Arc::new(predicate)))
    }

    /// Number of live documents in a collection
    pub fn count(&self, collection: &str) -> Result<usize> {
        self.collections.collection(collection)?.count()
    }

    // =========================================================================
    // Collections
    // =========================================================================

    pub fn create_collection(&self, name: &str) -> Result<()> {
        self.collections.create_collection(name).map(|_| ())
    }

    /// Delete a collection with all of its documents
    pub fn drop_collection(&self, name: &str) -> Result<()> {
        self.collections.drop_collection(name)
    }

    /// Collection names, sorted
    pub fn list_collections(&self) -> Vec<String> {
        self.collections.list_collections()
    }

    /// Reclaim space held by updated and deleted records
    pub fn compact(&self, collection: &str) -> Result<()> {
        self.collections.collection(collection)?.compact()
    }

    pub fn collection_stats(&self, name: &str) -> Result<CollectionStats> {
        self.collections.collection(name)?.stats()
    }

    /// Figures for every collection and the ledger
    pub fn stats(&self) -> Result<DatabaseStats> {
        let mut collections = Vec::new();
        for name in self.collections.list_collections() {
            match self.collection_stats(&name) {
                Ok(stats) => collections.push(stats),
                // Dropped since it was listed
                Err(SealError::CollectionNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(DatabaseStats {
            documents: collections.iter().map(|c| c.documents).sum(),
            payload_bytes: collections.iter().map(|c| c.payload_bytes).sum(),
            ledger_blocks: self.ledger.len(),
            collections,
        })
    }

    /// Handle to a collection, for repeated operations
    pub fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.collections.collection(name)
    }

    // =========================================================================
    // Ledger
    // =========================================================================

    /// Append an explicit audit entry
    pub fn add_block(&self, payload: &[u8]) -> Result<u64> {
        self.ledger.add_block(payload)
    }

    pub fn verify_chain(&self) -> Result<ChainStatus> {
        self.ledger.verify_chain()
    }

    /// Verify the chain, failing with `ChainTampered` on the first bad block
    pub fn ensure_chain_intact(&self) -> Result<u64> {
        self.ledger.ensure_chain_intact()
    }

    pub fn get_block(&self, index: u64) -> Result<Block> {
        self.ledger.get_block(index)
    }

    pub fn iterate_blocks(&self) -> Result<BlockIter> {
        self.ledger.iterate_blocks()
    }

    /// The last `n` blocks, oldest first
    pub fn recent_blocks(&self, n: usize) -> Result<Vec<Block>> {
        self.ledger.recent_blocks(n)
    }

    /// Number of ledger blocks, genesis included
    pub fn ledger_len(&self) -> u64 {
        self.ledger.len()
    }

    // =========================================================================
    // Encryption
    // =========================================================================

    /// Key management and raw data/file encryption
    pub fn encryption(&self) -> &EncryptionManager {
        &self.crypto
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Persist every index and sync the ledger
    pub fn flush(&self) -> Result<()> {
        self.collections.flush_all()?;
        self.ledger.sync()?;
        tracing::debug!("Flushed database");
        Ok(())
    }

    /// Flush and release the data directory
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        self.closed = true;
        tracing::info!(data_dir = %self.config.data_dir.display(), "Closed database");
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.flush() {
            tracing::error!(error = %e, "Failed to flush database on drop");
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("data_dir", &self.config.data_dir)
            .field("ledger", &self.ledger)
            .finish()
    }
}
