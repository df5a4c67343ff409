//! HMAC-SHA256 helpers for callback signatures.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Returns the lowercase hex HMAC-SHA256 of `message` under `key`.
pub fn sign_hex(key: &[u8], message: &[u8]) -> String {
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Checks a hex-encoded signature in constant time.
pub fn verify_hex(key: &[u8], message: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_then_verify() {
        let signature = sign_hex(b"secret", b"payload");
        assert_eq!(signature.len(), 64);
        assert!(verify_hex(b"secret", b"payload", &signature));
        assert!(verify_hex(b"secret", b"payload", &signature.to_uppercase()));
    }

    #[test]
    fn test_verify_rejects_wrong_key_or_message() {
        let signature = sign_hex(b"secret", b"payload");
        assert!(!verify_hex(b"other", b"payload", &signature));
        assert!(!verify_hex(b"secret", b"payload2", &signature));
        assert!(!verify_hex(b"secret", b"payload", "not-hex"));
    }
}
