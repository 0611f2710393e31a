//! Ledger Module
//!
//! Append-only, hash-chained record of every mutation.
//!
//! ## Responsibilities
//! - Append one block per committed mutation, linked to its predecessor
//! - Random access and sequential iteration over stored blocks
//! - Detect (never repair) tampering by re-walking the chain
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header: Magic "SLDG" (4) │ Version u16 LE (2) │ Reserved (2) │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Block 0 (genesis)                                            │
//! │ ┌───────────┬────────┬──────────────┬───────────┬──────────┐ │
//! │ │ Index (8) │ TS (8) │ PayloadH (32)│ PrevH (32)│ Hash (32)│ │
//! │ └───────────┴────────┴──────────────┴───────────┴──────────┘ │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Block 1 ...                                                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//! Block records are fixed-width (112 bytes, big-endian integers), so block
//! `i` lives at byte `8 + i * 112`.

mod block;
mod chain;
mod reader;
mod verify;
mod writer;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{Result, SealError};

pub use block::{hash_payload, offsets, Block, Hash, BLOCK_SIZE, GENESIS_PAYLOAD, GENESIS_PREV_HASH};
pub use chain::Ledger;
pub use reader::BlockIter;
pub use verify::{verify_blocks, ChainIssue, ChainStatus};
pub use writer::LedgerWriter;

/// Ledger file magic
pub const MAGIC: &[u8; 4] = b"SLDG";

/// Ledger file format version
pub const VERSION: u16 = 1;

/// Bytes before the first block record
pub const HEADER_SIZE: u64 = 8;

/// Validate the header of an existing ledger file
pub(crate) fn check_header(file: &mut File, path: &Path) -> Result<()> {
    let mut header = [0u8; HEADER_SIZE as usize];
    file.seek(SeekFrom::Start(0))?;
    if file.read_exact(&mut header).is_err() {
        return Err(SealError::Storage(format!(
            "ledger {} is shorter than its header",
            path.display()
        )));
    }

    if &header[0..4] != MAGIC {
        return Err(SealError::Storage(format!(
            "{} is not a ledger file",
            path.display()
        )));
    }

    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != VERSION {
        return Err(SealError::Storage(format!(
            "unsupported ledger version {} in {}",
            version,
            path.display()
        )));
    }

    Ok(())
}
