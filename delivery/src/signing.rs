//! HMAC-SHA256 request signing.
//!
//! The signed message is `"{timestamp}.{body}"`; the signature travels as
//! `X-Intake-Signature: sha256=<hex>` next to `X-Intake-Timestamp`. Binding
//! the timestamp lets receivers reject replays outside their tolerance.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signature.
pub const SIGNATURE_HEADER: &str = "x-intake-signature";

/// Header carrying the unix timestamp (seconds) that was signed.
pub const TIMESTAMP_HEADER: &str = "x-intake-timestamp";

const SCHEME_PREFIX: &str = "sha256=";

/// Signs outbound payloads with a shared secret.
#[derive(Clone)]
pub struct Signer {
    secret: Vec<u8>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").field("secret", &"<redacted>").finish()
    }
}

impl Signer {
    /// Signer for `secret`.
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn mac(&self, timestamp: i64, body: &[u8]) -> HmacSha256 {
        // HMAC accepts keys of any length, so this cannot fail.
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        mac
    }

    /// Signature header value for `body` sent at `timestamp`.
    #[must_use]
    pub fn sign(&self, timestamp: i64, body: &[u8]) -> String {
        let digest = self.mac(timestamp, body).finalize().into_bytes();
        format!("{SCHEME_PREFIX}{}", hex::encode(digest))
    }

    /// Check a received signature header in constant time.
    #[must_use]
    pub fn verify(&self, timestamp: i64, body: &[u8], signature: &str) -> bool {
        let Some(hex_digest) = signature.strip_prefix(SCHEME_PREFIX) else {
            return false;
        };
        let Ok(received) = hex::decode(hex_digest) else {
            return false;
        };
        let expected = self.mac(timestamp, body).finalize().into_bytes();
        constant_time_eq::constant_time_eq(&expected, &received)
    }
}
