//! Ledger
//!
//! Thread-safe handle over the ledger file. Appends are serialized through
//! one writer; reads open their own handles and are bounded by the block
//! count published after each append.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::config::SyncStrategy;
use crate::error::{Result, SealError};

use super::block::{Block, GENESIS_PAYLOAD};
use super::reader::{read_block, BlockIter};
use super::verify::{verify_blocks, ChainIssue, ChainStatus};
use super::writer::LedgerWriter;

/// Hash-chained, append-only block ledger
pub struct Ledger {
    path: PathBuf,
    writer: Mutex<LedgerWriter>,
    /// Number of complete blocks visible to readers
    len: AtomicU64,
    /// Bytes found after the last complete block at open
    partial_bytes: u64,
}

impl Ledger {
    /// Open the ledger at `path`, writing the genesis block if it is new
    pub fn open(path: impl AsRef<Path>, sync_strategy: SyncStrategy) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut writer = LedgerWriter::open(&path, sync_strategy)?;

        let partial_bytes = writer.partial_bytes();
        if writer.next_index() == 0 && partial_bytes == 0 {
            let genesis = writer.append(GENESIS_PAYLOAD)?;
            writer.sync()?;
            tracing::info!(path = %path.display(), hash = %genesis.hash_hex(), "Created ledger");
        }

        let len = writer.next_index();
        tracing::debug!(path = %path.display(), blocks = len, "Opened ledger");

        Ok(Self {
            path,
            writer: Mutex::new(writer),
            len: AtomicU64::new(len),
            partial_bytes,
        })
    }

    /// Append a block recording `payload`, returning its index
    ///
    /// Fails with `ChainTampered` while the file ends in a partial record.
    pub fn add_block(&self, payload: &[u8]) -> Result<u64> {
        let mut writer = self.writer.lock();
        let result = writer.append(payload);

        self.len.store(writer.next_index(), Ordering::Release);

        let block = result?;
        tracing::trace!(index = block.index, "Appended ledger block");
        Ok(block.index)
    }

    /// Fetch the block at `index`
    pub fn get_block(&self, index: u64) -> Result<Block> {
        if index >= self.len() {
            return Err(SealError::BlockNotFound(index));
        }
        read_block(&self.path, index)
    }

    /// Iterate every block present when the iterator is created
    pub fn iterate_blocks(&self) -> Result<BlockIter> {
        BlockIter::open(&self.path, 0, self.len())
    }

    /// The last `n` blocks, oldest first
    pub fn recent_blocks(&self, n: usize) -> Result<Vec<Block>> {
        let end = self.len();
        let start = end.saturating_sub(n as u64);
        BlockIter::open(&self.path, start, end)?.collect()
    }

    /// The most recently appended block
    pub fn tip(&self) -> Result<Block> {
        let len = self.len();
        if len == 0 {
            return Err(SealError::BlockNotFound(0));
        }
        read_block(&self.path, len - 1)
    }

    /// Number of blocks, genesis included
    pub fn len(&self) -> u64 {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Walk the whole chain and report the first tampered block
    ///
    /// Bytes after the last complete block are reported at the position the
    /// next block would take.
    pub fn verify_chain(&self) -> Result<ChainStatus> {
        let status = match verify_blocks(self.iterate_blocks()?)? {
            ChainStatus::Valid { blocks } if self.partial_bytes != 0 => {
                let issue = ChainIssue::TruncatedRecord {
                    bytes: self.partial_bytes,
                };
                tracing::warn!(index = blocks, %issue, "Ledger verification failed");
                ChainStatus::Tampered {
                    index: blocks,
                    issue,
                }
            }
            status => status,
        };
        if let ChainStatus::Valid { blocks } = status {
            tracing::debug!(blocks, "Ledger chain verified");
        }
        Ok(status)
    }

    /// Like `verify_chain`, but a tampered chain is an error
    pub fn ensure_chain_intact(&self) -> Result<u64> {
        match self.verify_chain()? {
            ChainStatus::Valid { blocks } => Ok(blocks),
            ChainStatus::Tampered { index, .. } => Err(SealError::ChainTampered { index }),
        }
    }

    /// Force pending appends to disk
    pub fn sync(&self) -> Result<()> {
        self.writer.lock().sync()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("path", &self.path)
            .field("len", &self.len())
            .field("partial_bytes", &self.partial_bytes)
            .finish()
    }
}
