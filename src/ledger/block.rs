//! Block definitions
//!
//! Defines the structure of individual ledger blocks and their canonical
//! encoding. The encoding is fixed-width big-endian, so a block hashes to the
//! same value on every platform.

use bytes::{Buf, BufMut};
use sha2::{Digest, Sha256};

/// SHA-256 digest
pub type Hash = [u8; 32];

/// `prev_hash` of the genesis block
pub const GENESIS_PREV_HASH: Hash = [0u8; 32];

/// Payload recorded by the genesis block
pub const GENESIS_PAYLOAD: &[u8] = b"genesis";

/// Encoded block size: Index (8) + Timestamp (8) + PayloadHash (32) + PrevHash (32) + Hash (32)
pub const BLOCK_SIZE: usize = 112;

/// Byte offsets of each field inside an encoded block
pub mod offsets {
    pub const INDEX: usize = 0;
    pub const TIMESTAMP: usize = 8;
    pub const PAYLOAD_HASH: usize = 16;
    pub const PREV_HASH: usize = 48;
    pub const HASH: usize = 80;
}

/// A single entry in the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Position in the chain, 0 = genesis
    pub index: u64,

    /// Creation time (unix millis)
    pub timestamp: u64,

    /// SHA-256 of the mutation payload
    pub payload_hash: Hash,

    /// Hash of the previous block
    pub prev_hash: Hash,

    /// Hash of this block's other four fields
    pub hash: Hash,
}

impl Block {
    /// Build a block and seal it with its hash
    pub fn new(index: u64, timestamp: u64, payload_hash: Hash, prev_hash: Hash) -> Self {
        let hash = Self::compute_hash(index, timestamp, &payload_hash, &prev_hash);
        Self {
            index,
            timestamp,
            payload_hash,
            prev_hash,
            hash,
        }
    }

    /// Hash over `index ‖ timestamp ‖ payload_hash ‖ prev_hash`
    pub fn compute_hash(index: u64, timestamp: u64, payload_hash: &Hash, prev_hash: &Hash) -> Hash {
        let mut canonical = Vec::with_capacity(offsets::HASH);
        canonical.put_u64(index);
        canonical.put_u64(timestamp);
        canonical.put_slice(payload_hash);
        canonical.put_slice(prev_hash);

        Sha256::digest(&canonical).into()
    }

    /// Recompute the hash from the stored fields
    pub fn recompute_hash(&self) -> Hash {
        Self::compute_hash(self.index, self.timestamp, &self.payload_hash, &self.prev_hash)
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }

    /// Encode into the fixed on-disk record
    pub fn encode(&self) -> [u8; BLOCK_SIZE] {
        let mut out = [0u8; BLOCK_SIZE];
        let mut buf = &mut out[..];
        buf.put_u64(self.index);
        buf.put_u64(self.timestamp);
        buf.put_slice(&self.payload_hash);
        buf.put_slice(&self.prev_hash);
        buf.put_slice(&self.hash);
        out
    }

    /// Decode a fixed on-disk record (no validation; that is `verify`'s job)
    pub fn decode(record: &[u8; BLOCK_SIZE]) -> Self {
        let mut buf = &record[..];
        let index = buf.get_u64();
        let timestamp = buf.get_u64();

        let mut payload_hash = [0u8; 32];
        buf.copy_to_slice(&mut payload_hash);
        let mut prev_hash = [0u8; 32];
        buf.copy_to_slice(&mut prev_hash);
        let mut hash = [0u8; 32];
        buf.copy_to_slice(&mut hash);

        Self {
            index,
            timestamp,
            payload_hash,
            prev_hash,
            hash,
        }
    }
}

/// SHA-256 of a payload
pub fn hash_payload(payload: &[u8]) -> Hash {
    Sha256::digest(payload).into()
}
