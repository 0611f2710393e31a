//! Error types for SealDB
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using SealError
pub type Result<T> = std::result::Result<T, SealError>;

/// Unified error type for SealDB operations
#[derive(Debug, Error)]
pub enum SealError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Collection Errors
    // -------------------------------------------------------------------------
    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Collection already exists: {0}")]
    AlreadyExists(String),

    #[error("Duplicate document id in {collection}: {id}")]
    DuplicateId { collection: String, id: String },

    #[error("Invalid name: {0}")]
    InvalidName(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Index corruption detected: {0}")]
    IndexCorruption(String),

    // -------------------------------------------------------------------------
    // Ledger Errors
    // -------------------------------------------------------------------------
    #[error("Ledger chain tampered at block {index}")]
    ChainTampered { index: u64 },

    #[error("Block not found: {0}")]
    BlockNotFound(u64),

    // -------------------------------------------------------------------------
    // Encryption Errors
    // -------------------------------------------------------------------------
    #[error("Encryption key already exists: {0}")]
    KeyExists(String),

    #[error("Encryption key not found: {0}")]
    KeyNotFound(String),

    #[error("Encryption key is active and cannot be removed: {0}")]
    KeyInUse(String),

    #[error("No active encryption key")]
    NoActiveKey,

    #[error("Decryption failed: {0}")]
    Decryption(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Concurrency Errors
    // -------------------------------------------------------------------------
    #[error("Timed out waiting for lock: {0}")]
    LockTimeout(String),

    #[error("Data directory is already open in another handle: {0}")]
    AlreadyOpen(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for SealError {
    fn from(err: bincode::Error) -> Self {
        SealError::Serialization(err.to_string())
    }
}

impl SealError {
    pub(crate) fn not_found(collection: &str, id: &str) -> Self {
        SealError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    /// True for the `NotFound` family (document or collection)
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SealError::NotFound { .. } | SealError::CollectionNotFound(_)
        )
    }
}
