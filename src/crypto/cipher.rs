//! Tagged AES-256-GCM envelopes
//!
//! ## Envelope Format
//! ```text
//! ┌──────────┬─────────┬──────────┬────────────┬───────────┬──────────────────┐
//! │ "SC" (2) │ Ver (1) │ NLen (1) │ Key name   │ Nonce(12) │ Ciphertext + tag │
//! └──────────┴─────────┴──────────┴────────────┴───────────┴──────────────────┘
//! ```
//!
//! The key name is bound as additional authenticated data, so a tag that is
//! rewritten to point at another key fails authentication instead of
//! decrypting under the wrong key.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;

use crate::error::{Result, SealError};

use super::{KEY_LENGTH, NONCE_LENGTH};

/// Magic bytes opening every data envelope
pub(crate) const ENVELOPE_MAGIC: &[u8; 2] = b"SC";

/// Envelope format version
pub(crate) const ENVELOPE_VERSION: u8 = 1;

/// GCM authentication tag length
pub(crate) const TAG_LENGTH: usize = 16;

/// A parsed, not yet authenticated envelope
#[derive(Debug)]
pub struct Envelope<'a> {
    pub key_name: &'a str,
    pub nonce: [u8; NONCE_LENGTH],
    pub ciphertext: &'a [u8],
}

/// Encrypt `plaintext` under `key` and tag it with `key_name`
pub fn seal(key_name: &str, key: &[u8; KEY_LENGTH], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| SealError::Storage("invalid key length".to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad: key_name.as_bytes(),
            },
        )
        .map_err(|_| SealError::Storage("encryption failed".to_string()))?;

    let name = key_name.as_bytes();
    let mut out = Vec::with_capacity(4 + name.len() + NONCE_LENGTH + ciphertext.len());
    out.extend_from_slice(ENVELOPE_MAGIC);
    out.push(ENVELOPE_VERSION);
    out.push(name.len() as u8);
    out.extend_from_slice(name);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Split an envelope into its tag, nonce and ciphertext
pub fn parse(data: &[u8]) -> Result<Envelope<'_>> {
    if data.len() < 4 || &data[0..2] != ENVELOPE_MAGIC {
        return Err(SealError::Decryption("malformed ciphertext header".to_string()));
    }
    if data[2] != ENVELOPE_VERSION {
        return Err(SealError::Decryption(format!(
            "unsupported ciphertext version {}",
            data[2]
        )));
    }

    let name_len = data[3] as usize;
    let name_end = 4 + name_len;
    let nonce_end = name_end + NONCE_LENGTH;
    if name_len == 0 || data.len() < nonce_end + TAG_LENGTH {
        return Err(SealError::Decryption("ciphertext too short".to_string()));
    }

    let key_name = std::str::from_utf8(&data[4..name_end])
        .map_err(|_| SealError::Decryption("key tag is not valid UTF-8".to_string()))?;

    let mut nonce = [0u8; NONCE_LENGTH];
    nonce.copy_from_slice(&data[name_end..nonce_end]);

    Ok(Envelope {
        key_name,
        nonce,
        ciphertext: &data[nonce_end..],
    })
}

/// Authenticate and decrypt a parsed envelope
pub fn open(envelope: &Envelope<'_>, key: &[u8; KEY_LENGTH]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| SealError::Decryption("invalid key length".to_string()))?;

    cipher
        .decrypt(
            Nonce::from_slice(&envelope.nonce),
            Payload {
                msg: envelope.ciphertext,
                aad: envelope.key_name.as_bytes(),
            },
        )
        .map_err(|_| SealError::Decryption("wrong key or corrupted ciphertext".to_string()))
}

/// Seal raw bytes without a key tag (used for the key ring itself)
pub(crate) fn seal_raw(key: &[u8; KEY_LENGTH], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| SealError::Storage("invalid key length".to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| SealError::Storage("encryption failed".to_string()))?;

    let mut out = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Inverse of [`seal_raw`]
pub(crate) fn open_raw(key: &[u8; KEY_LENGTH], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < NONCE_LENGTH + TAG_LENGTH {
        return Err(SealError::Decryption("ciphertext too short".to_string()));
    }
    let (nonce, ciphertext) = data.split_at(NONCE_LENGTH);
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| SealError::Decryption("invalid key length".to_string()))?;

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| SealError::Decryption("wrong key or corrupted ciphertext".to_string()))
}
