/// PKCE (RFC 7636) helpers and the signed cookie carrying the verifier
use crate::crypto::{sign_value, verify_signed_value};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const CODE_CHALLENGE_METHOD: &str = "S256";
pub const PKCE_COOKIE_NAME: &str = "tiktok_oauth_pkce";
pub const PKCE_COOKIE_MAX_AGE_SECS: i64 = 600;

/// Random verifier: base64url of 32 random bytes
pub fn generate_code_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// S256 challenge for a verifier
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Random state: 16 bytes as hex
pub fn generate_state() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Values round-tripped between the start and the callback of a connection attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkceCookie {
    pub verifier: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
}

impl PkceCookie {
    /// Encode and sign for storage in a cookie
    pub fn seal(&self, secret: &str) -> String {
        // Serializing a struct of strings cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        sign_value(&URL_SAFE_NO_PAD.encode(json), secret)
    }

    /// Verify the signature and decode; `None` for unsigned or tampered values
    pub fn open(sealed: &str, secret: &str) -> Option<Self> {
        let encoded = verify_signed_value(sealed, secret)?;
        let json = URL_SAFE_NO_PAD.decode(encoded).ok()?;
        serde_json::from_slice(&json).ok()
    }
}
