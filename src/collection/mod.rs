//! Collection Module
//!
//! Named sets of encrypted documents.
//!
//! ## Responsibilities
//! - Persist encrypted records in an append-only payload store per collection
//! - Keep each collection's B-Tree index in step with its store, rebuilding
//!   it when the index file is missing, damaged or stale
//! - Serve lookups and lazy, restartable queries
//! - Record every mutation in the ledger before returning
//!
//! ## Directory Layout
//! ```text
//! collections/
//!   ├── <name>.dat    (payload store, see `payload`)
//!   └── <name>.idx    (persisted index, see `index::file`)
//! ```

#[allow(clippy::module_inception)]
mod collection;
mod document;
mod find;
mod payload;
mod query;
mod store;

pub use collection::{Collection, CollectionStats, MAX_ID_LEN};
pub(crate) use collection::CollectionSettings;
pub use document::Document;
pub use find::{DocumentPredicate, Find, FindIter};
pub use payload::{PayloadStore, RecordOp, ScannedFrame, StoredRecord};
pub use query::{Filter, Query, ScanOrder};
pub use store::{validate_name, CollectionStore, MAX_NAME_LEN};
