/// Symmetric encryption of OAuth tokens at rest
///
/// Values are sealed with ChaCha20-Poly1305 under a key derived as
/// SHA-256 of the configured secret. The stored form is
/// `enc:` + base64(nonce ‖ tag ‖ ciphertext). Values without the prefix are
/// treated as legacy plaintext.
use crate::error::{AppError, AppResult};
use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::{
    aead::{AeadCore, AeadInPlace, KeyInit, OsRng},
    ChaCha20Poly1305, Key, Nonce, Tag,
};
use sha2::{Digest, Sha256};

const PREFIX: &str = "enc:";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Encrypts and decrypts secrets with an optional key
#[derive(Clone)]
pub struct SecretCodec {
    key: Option<[u8; 32]>,
}

impl std::fmt::Debug for SecretCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCodec")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl SecretCodec {
    /// Create a codec; `None` or an empty secret disables encryption
    pub fn new(secret: Option<&str>) -> Self {
        let key = secret
            .filter(|s| !s.is_empty())
            .map(|s| Sha256::digest(s.as_bytes()).into());
        Self { key }
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    fn cipher(&self) -> Option<ChaCha20Poly1305> {
        self.key
            .as_ref()
            .map(|k| ChaCha20Poly1305::new(Key::from_slice(k)))
    }

    /// Encrypt a plaintext value
    pub fn encrypt(&self, plaintext: &str) -> AppResult<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }
        let Some(cipher) = self.cipher() else {
            return Ok(plaintext.to_string());
        };

        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let mut buffer = plaintext.as_bytes().to_vec();
        let tag = cipher
            .encrypt_in_place_detached(&nonce, b"", &mut buffer)
            .map_err(|e| AppError::Crypto(format!("Encryption failed: {}", e)))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + TAG_LEN + buffer.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&tag);
        sealed.extend_from_slice(&buffer);

        Ok(format!("{}{}", PREFIX, STANDARD.encode(sealed)))
    }

    /// Decrypt a stored value
    pub fn decrypt(&self, stored: &str) -> AppResult<String> {
        let Some(encoded) = stored.strip_prefix(PREFIX) else {
            return Ok(stored.to_string());
        };
        let cipher = self.cipher().ok_or_else(|| {
            AppError::Crypto("Encrypted value found but no encryption key is configured".to_string())
        })?;

        let raw = STANDARD
            .decode(encoded)
            .map_err(|e| AppError::Crypto(format!("Invalid ciphertext encoding: {}", e)))?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(AppError::Crypto("Ciphertext too short".to_string()));
        }

        let (nonce, rest) = raw.split_at(NONCE_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);
        let mut buffer = ciphertext.to_vec();
        cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(nonce),
                b"",
                &mut buffer,
                Tag::from_slice(tag),
            )
            .map_err(|_| AppError::Crypto("Decryption failed".to_string()))?;

        String::from_utf8(buffer)
            .map_err(|e| AppError::Crypto(format!("Invalid UTF-8 plaintext: {}", e)))
    }

    /// Encrypt an optional value, keeping `None` as `None`
    pub fn encrypt_opt(&self, value: Option<&str>) -> AppResult<Option<String>> {
        value.map(|v| self.encrypt(v)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let codec = SecretCodec::new(Some("my-secret"));
        let sealed = codec.encrypt("act.example-token").unwrap();
        assert!(sealed.starts_with("enc:"));
        assert_ne!(sealed, "act.example-token");
        assert_eq!(codec.decrypt(&sealed).unwrap(), "act.example-token");
    }

    #[test]
    fn test_nonce_is_fresh_per_call() {
        let codec = SecretCodec::new(Some("my-secret"));
        assert_ne!(codec.encrypt("same").unwrap(), codec.encrypt("same").unwrap());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let codec = SecretCodec::new(Some("my-secret"));
        let sealed = codec.encrypt("token").unwrap();
        let mut raw = STANDARD.decode(&sealed[PREFIX.len()..]).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = format!("{}{}", PREFIX, STANDARD.encode(raw));

        assert!(matches!(codec.decrypt(&tampered), Err(AppError::Crypto(_))));
    }

    #[test]
    fn test_truncated_and_wrong_key_fail() {
        let codec = SecretCodec::new(Some("my-secret"));
        let sealed = codec.encrypt("token").unwrap();

        assert!(codec.decrypt("enc:AAAA").is_err());
        assert!(SecretCodec::new(Some("other")).decrypt(&sealed).is_err());
    }

    #[test]
    fn test_untagged_values_pass_through() {
        let codec = SecretCodec::new(Some("my-secret"));
        assert_eq!(codec.decrypt("legacy-plaintext").unwrap(), "legacy-plaintext");
        assert_eq!(codec.encrypt("").unwrap(), "");
    }

    #[test]
    fn test_disabled_codec_is_identity() {
        let codec = SecretCodec::new(None);
        assert!(!codec.is_enabled());
        assert_eq!(codec.encrypt("token").unwrap(), "token");
        assert_eq!(codec.decrypt("token").unwrap(), "token");
        assert!(!SecretCodec::new(Some("")).is_enabled());
    }
}
