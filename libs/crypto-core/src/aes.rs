//! AES-256-GCM encryption for opaque token payloads.
//!
//! The key is derived from the signing secret (or an explicit encryption key)
//! and the token's `jti`, so each token encrypts under a distinct key.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use crate::{b64, hash, CryptoError};

const NONCE_LEN: usize = 12;

/// SHA-256 over `secret ‖ jti`, yielding the 32-byte AES key.
pub fn derive_key(secret: &str, jti: &str) -> [u8; 32] {
    let mut material = Vec::with_capacity(secret.len() + jti.len());
    material.extend_from_slice(secret.as_bytes());
    material.extend_from_slice(jti.as_bytes());
    hash::sha256(&material)
}

/// Encrypts `plaintext` and renders `nonce ‖ ciphertext` as base64url.
pub fn encrypt(key: &[u8; 32], plaintext: &str) -> Result<String, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| CryptoError::Encryption)?;

    let mut out = nonce.to_vec();
    out.extend_from_slice(&ciphertext);
    Ok(b64::encode_url(&out))
}

/// Inverse of [`encrypt`]. Fails on any tampering (GCM tag mismatch).
pub fn decrypt(key: &[u8; 32], encoded: &str) -> Result<String, CryptoError> {
    let raw = b64::decode_url(encoded).map_err(|_| CryptoError::Decryption)?;
    if raw.len() <= NONCE_LEN {
        return Err(CryptoError::Decryption);
    }
    let (nonce, ciphertext) = raw.split_at(NONCE_LEN);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Decryption)?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::Decryption)
}
