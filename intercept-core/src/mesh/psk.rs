//! Channel pre-shared-key parsing.

use crate::error::CoreError;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Parse a PSK string into key bytes.
///
/// Supported formats:
/// - `none` - no encryption (empty key)
/// - `default` - the well-known public key selector (1 byte)
/// - `random` - a fresh 32-byte AES-256 key
/// - `base64:...` - base64-encoded key
/// - `0x...` - hex-encoded key
/// - `simple:<passphrase>` - SHA-256 of the passphrase (32 bytes)
///
/// Raw base64 without a prefix is accepted for compatibility when it
/// decodes to a standard key length (0, 1, 16 or 32 bytes).
pub fn parse_psk(psk: &str) -> Result<Vec<u8>, CoreError> {
    let psk = psk.trim();
    let invalid = || CoreError::InvalidPsk(psk.to_string());

    if psk.eq_ignore_ascii_case("none") {
        return Ok(Vec::new());
    }
    if psk.eq_ignore_ascii_case("default") {
        return Ok(vec![0x01]);
    }
    if psk.eq_ignore_ascii_case("random") {
        let mut key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        return Ok(key);
    }
    if let Some(encoded) = psk.strip_prefix("base64:") {
        return base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| invalid());
    }
    if let Some(encoded) = psk.strip_prefix("0x") {
        return hex::decode(encoded).map_err(|_| invalid());
    }
    if let Some(passphrase) = psk.strip_prefix("simple:") {
        let mut hasher = Sha256::new();
        hasher.update(passphrase.as_bytes());
        return Ok(hasher.finalize().to_vec());
    }

    // Raw base64 fallback, only for standard key lengths.
    if let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(psk) {
        if matches!(decoded.len(), 0 | 1 | 16 | 32) {
            return Ok(decoded);
        }
    }

    Err(invalid())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_and_default() {
        assert!(parse_psk("none").unwrap().is_empty());
        assert_eq!(parse_psk("default").unwrap(), vec![0x01]);
        assert_eq!(parse_psk(" DEFAULT ").unwrap(), vec![0x01]);
    }

    #[test]
    fn random_is_32_bytes() {
        let a = parse_psk("random").unwrap();
        let b = parse_psk("random").unwrap();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn explicit_encodings() {
        assert_eq!(parse_psk("0xdeadbeef").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(parse_psk("base64:AQ==").unwrap(), vec![0x01]);
        assert!(parse_psk("0xnothex").is_err());
        assert!(parse_psk("base64:!!!").is_err());
    }

    #[test]
    fn simple_passphrase_is_sha256() {
        let key = parse_psk("simple:correct horse").unwrap();
        assert_eq!(key.len(), 32);
        // Deterministic for the same passphrase.
        assert_eq!(key, parse_psk("simple:correct horse").unwrap());
        assert_ne!(key, parse_psk("simple:other").unwrap());
    }

    #[test]
    fn raw_base64_requires_standard_length() {
        // 16 bytes of zeros.
        assert_eq!(parse_psk("AAAAAAAAAAAAAAAAAAAAAA==").unwrap().len(), 16);
        assert!(parse_psk("this is not a key").is_err());
    }
}
