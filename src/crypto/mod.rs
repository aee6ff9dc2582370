/// Cryptography for Clipforge
///
/// Token encryption at rest and HMAC signing of short-lived cookies.
pub mod secret;
pub mod signing;

pub use secret::SecretCodec;
pub use signing::{constant_time_equal, sign_value, verify_signed_value};
