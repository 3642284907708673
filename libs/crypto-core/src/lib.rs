//! Crypto primitives adapter for the zanix auth workspace.
//!
//! Everything here delegates to audited crates; this crate only fixes the
//! encodings (base64url payloads, base64-at-rest RSA keys, hex digests) the
//! rest of the workspace relies on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption error")]
    Encryption,
    #[error("decryption error")]
    Decryption,
    #[error("key generation error")]
    KeyGeneration,
}

pub mod aes;
pub mod b64;
pub mod hash;
pub mod keys;
