//! Index persistence
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │ Header (22 bytes)                                               │
//! │   Magic: "SIDX" (4) | Version: u16 (2) | Count: u64 (8)         │
//! │   StoreLen: u64 (8)  -- payload store length this index covers  │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Entries (ascending id order)                                    │
//! │   [IdLen: u32][Id][Offset: u64][Len: u32][Sequence: u64]        │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Footer (4 bytes)                                                │
//! │   CRC32 over header + entries                                   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every failed check on load is reported as `IndexCorruption`; the caller
//! answers that by rebuilding from the payload store.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, SealError};

use super::btree::BTree;
use super::Location;

/// Magic bytes identifying a SealDB index file
pub(crate) const MAGIC: &[u8; 4] = b"SIDX";

/// Current index format version
pub(crate) const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + Count (8) + StoreLen (8)
pub(crate) const HEADER_SIZE: usize = 22;

/// Footer size: CRC32 (4)
pub(crate) const FOOTER_SIZE: usize = 4;

/// Write `tree` to `path` atomically, stamped with the store length it reflects
pub fn save(path: &Path, tree: &BTree<String, Location>, store_len: u64) -> Result<()> {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + tree.len() * 48 + FOOTER_SIZE);
    buf.put_slice(MAGIC);
    buf.put_u16_le(VERSION);
    buf.put_u64_le(tree.len() as u64);
    buf.put_u64_le(store_len);

    for (id, loc) in tree.iter() {
        buf.put_u32_le(id.len() as u32);
        buf.put_slice(id.as_bytes());
        buf.put_u64_le(loc.offset);
        buf.put_u32_le(loc.len);
        buf.put_u64_le(loc.sequence);
    }

    let crc = crc32fast::hash(&buf);
    buf.put_u32_le(crc);

    let tmp = path.with_extension("idx.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&buf)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Load an index file into a fresh tree. Returns the tree and its stamped store length.
pub fn load(path: &Path, min_degree: usize) -> Result<(BTree<String, Location>, u64)> {
    if !path.exists() {
        return Err(SealError::IndexCorruption(format!(
            "index file {} is missing",
            path.display()
        )));
    }

    let data = fs::read(path)?;
    if data.len() < HEADER_SIZE + FOOTER_SIZE {
        return Err(corrupt(path, "file shorter than header"));
    }

    let (body, footer) = data.split_at(data.len() - FOOTER_SIZE);
    let stored_crc = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
    if crc32fast::hash(body) != stored_crc {
        return Err(corrupt(path, "checksum mismatch"));
    }

    let mut cursor = body;
    if &cursor[0..4] != MAGIC {
        return Err(corrupt(path, "bad magic"));
    }
    cursor.advance(4);

    let version = cursor.get_u16_le();
    if version != VERSION {
        return Err(corrupt(path, &format!("unsupported version {}", version)));
    }
    let count = cursor.get_u64_le();
    let store_len = cursor.get_u64_le();

    let mut tree = BTree::new(min_degree);
    for _ in 0..count {
        if cursor.remaining() < 4 {
            return Err(corrupt(path, "truncated entry"));
        }
        let id_len = cursor.get_u32_le() as usize;
        if cursor.remaining() < id_len + 20 {
            return Err(corrupt(path, "truncated entry"));
        }
        let id = String::from_utf8(cursor[..id_len].to_vec())
            .map_err(|_| corrupt(path, "id is not valid UTF-8"))?;
        cursor.advance(id_len);

        let location = Location {
            offset: cursor.get_u64_le(),
            len: cursor.get_u32_le(),
            sequence: cursor.get_u64_le(),
        };
        if tree.insert(id, location).is_some() {
            return Err(corrupt(path, "duplicate id"));
        }
    }

    if cursor.has_remaining() {
        return Err(corrupt(path, "trailing bytes after entries"));
    }

    Ok((tree, store_len))
}

fn corrupt(path: &Path, reason: &str) -> SealError {
    SealError::IndexCorruption(format!("{}: {}", path.display(), reason))
}
