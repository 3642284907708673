use sha1::Sha1;
use sha2::{Digest, Sha256};

/// 32-byte SHA-256 digest; the AES key derivation builds on this.
pub fn sha256(input: &[u8]) -> [u8; 32] {
    Sha256::digest(input).into()
}

/// SHA1 rendered as hex. Only suitable for privacy-preserving
/// identifiers, never for integrity.
pub fn sha1_hex(input: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        // NIST test vector for "abc"
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_sha1_hex() {
        let digest = sha1_hex(b"203.0.113.7-Mozilla/5.0");
        assert_eq!(digest.len(), 40);
        assert_eq!(digest, sha1_hex(b"203.0.113.7-Mozilla/5.0"));
        assert_ne!(digest, sha1_hex(b"203.0.113.8-Mozilla/5.0"));
    }
}
