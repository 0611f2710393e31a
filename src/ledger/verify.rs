//! Chain verification
//!
//! Walks blocks from genesis to tip and reports the first one whose stored
//! fields no longer agree with its hash or with its predecessor. Detection
//! only: nothing here rewrites the ledger.

use crate::error::Result;

use super::block::{Block, Hash, GENESIS_PREV_HASH};

/// Outcome of a chain verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStatus {
    /// Every block passed
    Valid { blocks: u64 },

    /// `index` is the first block that failed
    Tampered { index: u64, issue: ChainIssue },
}

/// Why a block failed verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainIssue {
    /// The stored index does not match the block's position
    IndexMismatch { stored: u64 },

    /// The stored hash does not match the hash recomputed from the fields
    HashMismatch,

    /// `prev_hash` does not equal the previous block's hash
    BrokenLink,

    /// The file ends in `bytes` that do not form a whole block
    TruncatedRecord { bytes: u64 },
}

impl ChainStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, ChainStatus::Valid { .. })
    }

    /// Index of the first failing block, if any
    pub fn first_invalid_index(&self) -> Option<u64> {
        match self {
            ChainStatus::Valid { .. } => None,
            ChainStatus::Tampered { index, .. } => Some(*index),
        }
    }
}

impl std::fmt::Display for ChainIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainIssue::IndexMismatch { stored } => write!(f, "stored index {} out of place", stored),
            ChainIssue::HashMismatch => write!(f, "hash does not match block contents"),
            ChainIssue::BrokenLink => write!(f, "prev_hash does not link to previous block"),
            ChainIssue::TruncatedRecord { bytes } => {
                write!(f, "{} bytes of partial block after the last complete block", bytes)
            }
        }
    }
}

/// Verify a sequence of blocks read in position order
///
/// I/O failures while reading are returned as errors; they say nothing about
/// tampering.
pub fn verify_blocks<I>(blocks: I) -> Result<ChainStatus>
where
    I: IntoIterator<Item = Result<Block>>,
{
    let mut expected_prev: Hash = GENESIS_PREV_HASH;
    let mut position: u64 = 0;

    for block in blocks {
        let block = block?;

        let issue = if block.index != position {
            Some(ChainIssue::IndexMismatch {
                stored: block.index,
            })
        } else if block.recompute_hash() != block.hash {
            Some(ChainIssue::HashMismatch)
        } else if block.prev_hash != expected_prev {
            Some(ChainIssue::BrokenLink)
        } else {
            None
        };

        if let Some(issue) = issue {
            tracing::warn!(index = position, %issue, "Ledger verification failed");
            return Ok(ChainStatus::Tampered {
                index: position,
                issue,
            });
        }

        expected_prev = block.hash;
        position += 1;
    }

    Ok(ChainStatus::Valid { blocks: position })
}
