//! Configuration for SealDB
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, SealError};

/// Main configuration for a SealDB instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── .lock            (advisory process lock)
    ///     ├── ledger.chain     (hash-chained block ledger)
    ///     ├── keys/            (key store, owner-only permissions)
    ///     └── collections/     (<name>.dat payload stores, <name>.idx indexes)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // Ledger Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync the ledger and payload stores
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// Minimum degree of the B-Tree (each node holds between t-1 and 2t-1 keys)
    pub btree_min_degree: usize,

    /// Persist a collection's index after this many mutations
    pub index_flush_interval: usize,

    // -------------------------------------------------------------------------
    // Concurrency Configuration
    // -------------------------------------------------------------------------
    /// How long to wait on a contended collection lock before retrying (milliseconds)
    pub lock_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Encryption Configuration
    // -------------------------------------------------------------------------
    /// Key generated when a database is opened with an empty key ring
    pub default_key_name: String,
}

/// Sync strategy for append-only files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N unsynced appends (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl SyncStrategy {
    /// Whether an append that leaves `pending` unsynced writes should fsync
    pub(crate) fn should_sync(&self, pending: usize) -> bool {
        match self {
            SyncStrategy::EveryWrite => true,
            SyncStrategy::EveryNEntries { count } => pending >= *count,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./sealdb_data"),
            sync_strategy: SyncStrategy::EveryNEntries { count: 64 },
            btree_min_degree: 32,
            index_flush_interval: 256,
            lock_timeout_ms: 2000,
            default_key_name: "default".to_string(),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the storage layer cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.btree_min_degree < 2 {
            return Err(SealError::Config(format!(
                "btree_min_degree must be at least 2, got {}",
                self.btree_min_degree
            )));
        }
        if self.index_flush_interval == 0 {
            return Err(SealError::Config(
                "index_flush_interval must be greater than zero".to_string(),
            ));
        }
        if let SyncStrategy::EveryNEntries { count: 0 } = self.sync_strategy {
            return Err(SealError::Config(
                "EveryNEntries sync count must be greater than zero".to_string(),
            ));
        }
        if self.default_key_name.is_empty() || self.default_key_name.len() > 255 {
            return Err(SealError::Config(
                "default_key_name must be 1-255 bytes".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the B-Tree minimum degree
    pub fn btree_min_degree(mut self, degree: usize) -> Self {
        self.config.btree_min_degree = degree;
        self
    }

    /// Set how many mutations may pass before an index is persisted
    pub fn index_flush_interval(mut self, mutations: usize) -> Self {
        self.config.index_flush_interval = mutations;
        self
    }

    /// Set the lock acquisition timeout (in milliseconds)
    pub fn lock_timeout_ms(mut self, ms: u64) -> Self {
        self.config.lock_timeout_ms = ms;
        self
    }

    /// Set the name of the bootstrap encryption key
    pub fn default_key_name(mut self, name: impl Into<String>) -> Self {
        self.config.default_key_name = name.into();
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
