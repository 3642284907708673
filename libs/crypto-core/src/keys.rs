//! RSA keypair generation for API token signing.

use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::{b64, CryptoError};

pub const DEFAULT_RSA_BITS: usize = 2048;

/// A freshly generated keypair, rendered both as PEM and as the
/// base64-encoded form the key registry stores at rest.
#[derive(Debug, Clone)]
pub struct RsaKeyPair {
    pub private_pem: String,
    pub public_pem: String,
    pub private_b64: String,
    pub public_b64: String,
}

pub fn generate_rsa_keypair(bits: usize) -> Result<RsaKeyPair, CryptoError> {
    let mut rng = rand::thread_rng();
    let private = RsaPrivateKey::new(&mut rng, bits).map_err(|_| CryptoError::KeyGeneration)?;
    let public = RsaPublicKey::from(&private);

    let private_pem = private
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|_| CryptoError::KeyGeneration)?
        .to_string();
    let public_pem = public
        .to_public_key_pem(LineEnding::LF)
        .map_err(|_| CryptoError::KeyGeneration)?;

    Ok(RsaKeyPair {
        private_b64: b64::encode_standard(private_pem.as_bytes()),
        public_b64: b64::encode_standard(public_pem.as_bytes()),
        private_pem,
        public_pem,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_rsa_keypair() {
        let pair = generate_rsa_keypair(DEFAULT_RSA_BITS).expect("keypair generation");
        assert!(pair.private_pem.contains("BEGIN PRIVATE KEY"));
        assert!(pair.public_pem.contains("BEGIN PUBLIC KEY"));

        // The at-rest form must decode back to the PEM
        let decoded = b64::decode_standard(&pair.public_b64).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), pair.public_pem);
    }
}
