//! Ledger Writer
//!
//! Handles appending blocks to the ledger file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::config::SyncStrategy;
use crate::error::{Result, SealError};

use super::block::{hash_payload, Block, Hash, BLOCK_SIZE, GENESIS_PREV_HASH};
use super::{HEADER_SIZE, MAGIC, VERSION};

/// Appends blocks to the ledger file
///
/// Holds the chain tip (next index and last hash) so an append never has to
/// re-read the file. Callers serialize access; see `Ledger`.
pub struct LedgerWriter {
    file: File,
    next_index: u64,
    tip_hash: Hash,
    /// Bytes after the last complete block; non-zero blocks every append
    partial_bytes: u64,
    sync_strategy: SyncStrategy,
    unsynced: usize,
}

impl LedgerWriter {
    /// Open or create a ledger file
    ///
    /// A trailing partial record is left on disk untouched. It may be a torn
    /// append or the remains of a shortened tip block, and the two cannot be
    /// told apart, so the writer only records it and refuses to append.
    pub fn open(path: &Path, sync_strategy: SyncStrategy) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut file_len = file.metadata()?.len();
        if file_len == 0 {
            let mut header = [0u8; HEADER_SIZE as usize];
            header[0..4].copy_from_slice(MAGIC);
            header[4..6].copy_from_slice(&VERSION.to_le_bytes());
            file.write_all(&header)?;
            file.sync_all()?;
            file_len = HEADER_SIZE;
        } else {
            super::check_header(&mut file, path)?;
        }

        let body_len = file_len - HEADER_SIZE;
        let partial_bytes = body_len % BLOCK_SIZE as u64;
        if partial_bytes != 0 {
            tracing::warn!(
                path = %path.display(),
                bytes = partial_bytes,
                "Ledger ends in a partial block record; appends are disabled"
            );
        }

        let block_count = body_len / BLOCK_SIZE as u64;
        let tip_hash = if block_count == 0 {
            GENESIS_PREV_HASH
        } else {
            let mut record = [0u8; BLOCK_SIZE];
            file.seek(SeekFrom::Start(
                HEADER_SIZE + (block_count - 1) * BLOCK_SIZE as u64,
            ))?;
            file.read_exact(&mut record)?;
            Block::decode(&record).hash
        };

        file.seek(SeekFrom::End(0))?;

        Ok(Self {
            file,
            next_index: block_count,
            tip_hash,
            partial_bytes,
            sync_strategy,
            unsynced: 0,
        })
    }

    /// Append a block recording `payload`
    ///
    /// On error no block was added, unless undoing a block whose sync failed
    /// also failed; `next_index` always reflects what is on disk.
    pub fn append(&mut self, payload: &[u8]) -> Result<Block> {
        if self.partial_bytes != 0 {
            return Err(SealError::ChainTampered {
                index: self.next_index,
            });
        }

        let block = Block::new(
            self.next_index,
            crate::now_millis(),
            hash_payload(payload),
            self.tip_hash,
        );

        let start = HEADER_SIZE + self.next_index * BLOCK_SIZE as u64;
        if let Err(e) = self.file.write_all(&block.encode()) {
            // Roll back a partial write so the file stays record-aligned
            let _ = self.file.set_len(start);
            let _ = self.file.seek(SeekFrom::End(0));
            return Err(SealError::Io(e));
        }

        let prev_tip = self.tip_hash;
        self.next_index += 1;
        self.tip_hash = block.hash;

        self.unsynced += 1;
        if self.sync_strategy.should_sync(self.unsynced) {
            if let Err(e) = self.sync() {
                if self.file.set_len(start).is_ok() && self.file.seek(SeekFrom::End(0)).is_ok() {
                    self.next_index -= 1;
                    self.tip_hash = prev_tip;
                    self.unsynced -= 1;
                } else {
                    tracing::error!(index = block.index, "Failed to undo unsynced ledger block");
                }
                return Err(e);
            }
        }
        Ok(block)
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Index the next appended block will receive
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Hash the next block will link to
    pub fn tip_hash(&self) -> Hash {
        self.tip_hash
    }

    /// Length of the partial record after the last complete block
    pub fn partial_bytes(&self) -> u64 {
        self.partial_bytes
    }
}
