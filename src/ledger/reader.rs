//! Ledger Reader
//!
//! Read-only access to stored blocks. Readers use their own file handles and
//! never look past the block count they were given, so they cannot observe an
//! append in progress.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::Result;

use super::block::{Block, BLOCK_SIZE};
use super::HEADER_SIZE;

/// Read the block at `index` (caller checks `index` is below the block count)
pub fn read_block(path: &Path, index: u64) -> Result<Block> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(HEADER_SIZE + index * BLOCK_SIZE as u64))?;

    let mut record = [0u8; BLOCK_SIZE];
    file.read_exact(&mut record)?;
    Ok(Block::decode(&record))
}

/// Sequential iterator over blocks `[start, end)`
pub struct BlockIter {
    reader: BufReader<File>,
    next: u64,
    end: u64,
}

impl BlockIter {
    pub(crate) fn open(path: &Path, start: u64, end: u64) -> Result<Self> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(HEADER_SIZE + start * BLOCK_SIZE as u64))?;
        Ok(Self {
            reader: BufReader::new(file),
            next: start,
            end,
        })
    }

    /// Blocks left to yield
    pub fn remaining(&self) -> u64 {
        self.end.saturating_sub(self.next)
    }
}

impl Iterator for BlockIter {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }

        let mut record = [0u8; BLOCK_SIZE];
        match self.reader.read_exact(&mut record) {
            Ok(()) => {
                self.next += 1;
                Some(Ok(Block::decode(&record)))
            }
            Err(e) => {
                // Stop after the first failure
                self.next = self.end;
                Some(Err(e.into()))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining() as usize;
        (remaining, Some(remaining))
    }
}
