use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;

pub fn encode_url(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

pub fn decode_url(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(encoded)
}

pub fn encode_standard(data: &[u8]) -> String {
    STANDARD.encode(data)
}

pub fn decode_standard(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_round_trip() {
        let data = b"{\"alg\":\"HS256\",\"typ\":\"JWT\"}";
        let encoded = encode_url(data);
        assert!(!encoded.contains('='));
        assert_eq!(decode_url(&encoded).unwrap(), data);
    }

    #[test]
    fn test_standard_round_trip() {
        let data = b"-----BEGIN PUBLIC KEY-----";
        assert_eq!(decode_standard(&encode_standard(data)).unwrap(), data);
    }
}
