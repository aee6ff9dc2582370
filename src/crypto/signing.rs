/// HMAC-SHA256 signing for cookie values
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

fn signature(value: &str, secret: &str) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(value.as_bytes());
    URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
}

/// Append an HMAC signature: `{value}.{signature}`
pub fn sign_value(value: &str, secret: &str) -> String {
    format!("{}.{}", value, signature(value, secret))
}

/// Verify a signed value and return the inner value
pub fn verify_signed_value(signed: &str, secret: &str) -> Option<String> {
    let (value, sig) = signed.rsplit_once('.')?;
    let expected = signature(value, secret);
    if expected.is_empty() || !constant_time_equal(expected.as_bytes(), sig.as_bytes()) {
        return None;
    }
    Some(value.to_string())
}

/// Compare two byte slices in constant time
pub fn constant_time_equal(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let signed = sign_value("payload", "secret");
        assert_eq!(verify_signed_value(&signed, "secret").as_deref(), Some("payload"));
    }

    #[test]
    fn test_tampered_value_rejected() {
        let signed = sign_value("payload", "secret");
        let tampered = signed.replacen("payload", "payloae", 1);
        assert!(verify_signed_value(&tampered, "secret").is_none());
        assert!(verify_signed_value(&signed, "other-secret").is_none());
        assert!(verify_signed_value("unsigned", "secret").is_none());
    }

    #[test]
    fn test_constant_time_equal() {
        assert!(constant_time_equal(b"abc", b"abc"));
        assert!(!constant_time_equal(b"abc", b"abd"));
        assert!(!constant_time_equal(b"abc", b"abcd"));
    }
}
