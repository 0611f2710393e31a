//! Index Module
//!
//! Per-collection id → location index.
//!
//! ## Responsibilities
//! - O(log n) insert, lookup and delete of document ids
//! - Ordered range scans for sorted `find`
//! - Persist to `<collection>.idx`, stamped with the payload store length it
//!   reflects, so a stale or damaged file is detected at startup
//!
//! ## Data Structure Choice
//! A hand-written B-Tree (see [`btree`]) with configurable minimum degree.
//! The authoritative data is always the payload store; the index can be
//! rebuilt from it at any time.

pub mod btree;
pub mod file;

pub use btree::{BTree, Range};

/// Where a document's latest record lives in its collection's payload store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// Byte offset of the record frame
    pub offset: u64,
    /// Frame length in bytes (header included)
    pub len: u32,
    /// Insertion sequence of the document, used for insertion-order scans
    pub sequence: u64,
}

/// The index type every collection keeps
pub type DocumentIndex = BTree<String, Location>;
