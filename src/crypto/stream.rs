//! Chunked file encryption
//!
//! Large inputs are sealed in fixed-size chunks so neither side ever buffers
//! a whole file in memory.
//!
//! ## File Format
//! ```text
//! ┌───────────┬─────────┬──────────┬──────────┬───────────────────┐
//! │ "SCF" (3) │ Ver (1) │ NLen (1) │ Key name │ Nonce prefix (8)  │
//! ├───────────┴─────────┴──────────┴──────────┴───────────────────┤
//! │ Chunk: [Last (1)][Len (4)][Ciphertext + tag]                  │
//! │ ... repeated, exactly one chunk has Last = 1 and it is final  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Chunk nonce is `prefix ‖ counter (u32 BE)`; the AAD binds the key name,
//! the counter and the last flag, so dropped, reordered or re-flagged chunks
//! fail authentication.

use std::io::{ErrorKind, Read, Write};

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;

use crate::error::{Result, SealError};

use super::cipher::TAG_LENGTH;
use super::{KEY_LENGTH, NONCE_LENGTH};

/// Magic bytes opening an encrypted file
pub(crate) const FILE_MAGIC: &[u8; 3] = b"SCF";

/// Encrypted file format version
pub(crate) const FILE_VERSION: u8 = 1;

/// Plaintext bytes per chunk
pub const CHUNK_SIZE: usize = 64 * 1024;

const PREFIX_LENGTH: usize = NONCE_LENGTH - 4;

/// Encrypt everything `reader` yields into `writer`. Returns plaintext bytes consumed.
pub fn encrypt_stream<R: Read, W: Write>(
    key_name: &str,
    key: &[u8; KEY_LENGTH],
    mut reader: R,
    mut writer: W,
) -> Result<u64> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| SealError::Storage("invalid key length".to_string()))?;

    let mut prefix = [0u8; PREFIX_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut prefix);

    writer.write_all(FILE_MAGIC)?;
    writer.write_all(&[FILE_VERSION, key_name.len() as u8])?;
    writer.write_all(key_name.as_bytes())?;
    writer.write_all(&prefix)?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut counter: u32 = 0;
    let mut total: u64 = 0;

    loop {
        let n = read_full(&mut reader, &mut buf)?;
        let last = n < CHUNK_SIZE;

        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&chunk_nonce(&prefix, counter)),
                Payload {
                    msg: &buf[..n],
                    aad: &chunk_aad(key_name, counter, last),
                },
            )
            .map_err(|_| SealError::Storage("chunk encryption failed".to_string()))?;

        writer.write_all(&[last as u8])?;
        writer.write_all(&(ciphertext.len() as u32).to_be_bytes())?;
        writer.write_all(&ciphertext)?;
        total += n as u64;

        if last {
            break;
        }
        counter = counter
            .checked_add(1)
            .ok_or_else(|| SealError::Storage("input too large for one stream".to_string()))?;
    }

    writer.flush()?;
    Ok(total)
}

/// Decrypt a stream produced by [`encrypt_stream`].
///
/// `resolve` maps the key name found in the header to key material.
/// Returns plaintext bytes written.
pub fn decrypt_stream<R, W, F>(mut reader: R, resolve: F, mut writer: W) -> Result<u64>
where
    R: Read,
    W: Write,
    F: FnOnce(&str) -> Result<[u8; KEY_LENGTH]>,
{
    let mut head = [0u8; 5];
    read_exact_or_corrupt(&mut reader, &mut head, "truncated file header")?;
    if &head[0..3] != FILE_MAGIC || head[3] != FILE_VERSION {
        return Err(SealError::Decryption("not an encrypted SealDB file".to_string()));
    }

    let mut name = vec![0u8; head[4] as usize];
    read_exact_or_corrupt(&mut reader, &mut name, "truncated key tag")?;
    let key_name = String::from_utf8(name)
        .map_err(|_| SealError::Decryption("key tag is not valid UTF-8".to_string()))?;

    let mut prefix = [0u8; PREFIX_LENGTH];
    read_exact_or_corrupt(&mut reader, &mut prefix, "truncated file header")?;

    let key = resolve(&key_name)?;
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|_| SealError::Decryption("invalid key length".to_string()))?;

    let mut counter: u32 = 0;
    let mut total: u64 = 0;
    let mut ciphertext = Vec::with_capacity(CHUNK_SIZE + TAG_LENGTH);

    loop {
        let mut frame = [0u8; 5];
        read_exact_or_corrupt(&mut reader, &mut frame, "stream truncated before final chunk")?;

        let last = match frame[0] {
            0 => false,
            1 => true,
            other => {
                return Err(SealError::Decryption(format!("invalid chunk flag {}", other)));
            }
        };
        let len = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]) as usize;
        if !(TAG_LENGTH..=CHUNK_SIZE + TAG_LENGTH).contains(&len) {
            return Err(SealError::Decryption(format!("invalid chunk length {}", len)));
        }

        ciphertext.resize(len, 0);
        read_exact_or_corrupt(&mut reader, &mut ciphertext, "truncated chunk")?;

        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&chunk_nonce(&prefix, counter)),
                Payload {
                    msg: &ciphertext,
                    aad: &chunk_aad(&key_name, counter, last),
                },
            )
            .map_err(|_| SealError::Decryption("wrong key or corrupted chunk".to_string()))?;

        writer.write_all(&plaintext)?;
        total += plaintext.len() as u64;

        if last {
            let mut trailing = [0u8; 1];
            if read_full(&mut reader, &mut trailing)? != 0 {
                return Err(SealError::Decryption(
                    "trailing data after final chunk".to_string(),
                ));
            }
            break;
        }
        counter = counter
            .checked_add(1)
            .ok_or_else(|| SealError::Decryption("chunk counter overflow".to_string()))?;
    }

    writer.flush()?;
    Ok(total)
}

/// Read the key tag from an encrypted file header without decrypting
pub fn peek_key_name<R: Read>(mut reader: R) -> Result<String> {
    let mut head = [0u8; 5];
    read_exact_or_corrupt(&mut reader, &mut head, "truncated file header")?;
    if &head[0..3] != FILE_MAGIC || head[3] != FILE_VERSION {
        return Err(SealError::Decryption("not an encrypted SealDB file".to_string()));
    }
    let mut name = vec![0u8; head[4] as usize];
    read_exact_or_corrupt(&mut reader, &mut name, "truncated key tag")?;
    String::from_utf8(name)
        .map_err(|_| SealError::Decryption("key tag is not valid UTF-8".to_string()))
}

// =============================================================================
// Private Helpers
// =============================================================================

fn chunk_nonce(prefix: &[u8; PREFIX_LENGTH], counter: u32) -> [u8; NONCE_LENGTH] {
    let mut nonce = [0u8; NONCE_LENGTH];
    nonce[..PREFIX_LENGTH].copy_from_slice(prefix);
    nonce[PREFIX_LENGTH..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

fn chunk_aad(key_name: &str, counter: u32, last: bool) -> Vec<u8> {
    let mut aad = Vec::with_capacity(key_name.len() + 5);
    aad.extend_from_slice(key_name.as_bytes());
    aad.extend_from_slice(&counter.to_be_bytes());
    aad.push(last as u8);
    aad
}

/// Fill `buf` as far as the reader allows; returns bytes read (short only at EOF)
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

fn read_exact_or_corrupt<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            Err(SealError::Decryption(what.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}
