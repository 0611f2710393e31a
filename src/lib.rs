//! # SealDB
//!
//! An embeddable document store with:
//! - Transparent AES-256-GCM encryption of every stored record, with named
//!   keys that can rotate without re-encrypting old data
//! - A per-collection B-Tree index that rebuilds itself from the payload store
//! - A hash-chained ledger with one block per mutation, for tamper detection
//! - One writer per collection, many concurrent readers
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Database                             │
//! │          (insert / get / update / delete / find)            │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┼─────────────────────┐
//!          │            │                     │
//!          ▼            ▼                     ▼
//!   ┌─────────────┐ ┌──────────────────┐ ┌─────────────┐
//!   │ Encryption  │ │ Collection Store │ │   Ledger    │
//!   │  (RwLock)   │ │ (RwLock per coll)│ │  (Mutex)    │
//!   └─────────────┘ └────────┬─────────┘ └─────────────┘
//!                            │
//!                ┌───────────┴───────────┐
//!                ▼                       ▼
//!         ┌─────────────┐         ┌─────────────┐
//!         │   Payload   │         │   B-Tree    │
//!         │   (.dat)    │         │ Index(.idx) │
//!         └─────────────┘         └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use sealdb::{Config, Database, Filter};
//! use serde_json::json;
//!
//! # fn main() -> sealdb::Result<()> {
//! let db = Database::open(Config::builder().data_dir("./data").build())?;
//! let id = db.insert_json("users", json!({ "name": "Alice", "age": 30 }))?;
//!
//! for doc in &db.find("users", Filter::gte("age", 18))? {
//!     println!("{}", doc?.to_json());
//! }
//!
//! assert!(db.verify_chain()?.is_valid());
//! # let _ = id;
//! # Ok(())
//! # }
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod value;

pub mod crypto;
pub mod index;
pub mod ledger;
pub mod collection;
pub mod lock;
pub mod database;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, SealError};
pub use config::{Config, ConfigBuilder, SyncStrategy};
pub use value::{Fields, Value};
pub use collection::{CollectionStats, Document, Filter, Find, Query, ScanOrder};
pub use ledger::{Block, ChainIssue, ChainStatus};
pub use crypto::{EncryptionManager, KeyInfo};
pub use database::{Database, DatabaseStats};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of SealDB
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Milliseconds since the unix epoch (0 if the clock is before it)
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
