//! Encryption Module
//!
//! Named symmetric keys and transparent AES-256-GCM encryption.
//!
//! ## Responsibilities
//! - Generate, persist, activate and retire named keys
//! - Tag every ciphertext with the name of the key that sealed it
//! - Decrypt under whichever retained key a ciphertext names, so keys can
//!   rotate without re-encrypting existing data
//! - Stream-encrypt files of any size in fixed chunks

mod cipher;
mod keystore;
mod manager;
mod stream;

pub use cipher::{open, parse, seal, Envelope};
pub use keystore::{EncryptionKey, KeyRing, KeyStore};
pub use manager::{EncryptionManager, KeyInfo};
pub use stream::{decrypt_stream, encrypt_stream, peek_key_name, CHUNK_SIZE};

/// AES-256 key length in bytes
pub const KEY_LENGTH: usize = 32;

/// AES-GCM nonce length in bytes
pub const NONCE_LENGTH: usize = 12;
