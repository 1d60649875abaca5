//! Token wire format: `base64url(JSON payload) ‖ "|" ‖ hex(HMAC-SHA256)`.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::service::TokenError;

type HmacSha256 = Hmac<Sha256>;

/// Minimum accepted secret length in bytes.
pub(crate) const SECRET_MIN_LEN_BYTES: usize = 32;

/// Keyed MAC secret for token signing.
///
/// At least 32 bytes; loaded from configuration or generated fresh.
#[derive(Clone)]
pub struct TokenSecret(Vec<u8>);

impl TokenSecret {
    /// Generates a fresh 32-byte secret from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut secret = [0u8; SECRET_MIN_LEN_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut secret);
        Self(secret.to_vec())
    }

    /// Loads a secret from its hex encoding.
    ///
    /// # Errors
    ///
    /// Returns `SecretTooShort` if the decoded secret is under 32 bytes,
    /// or `Malformed` if the hex encoding is invalid.
    pub fn from_hex(encoded: &str) -> Result<Self, TokenError> {
        let bytes = hex::decode(encoded.trim()).map_err(|e| TokenError::Malformed {
            reason: format!("invalid secret encoding: {e}"),
        })?;
        Self::from_bytes(bytes)
    }

    /// Wraps raw secret bytes.
    ///
    /// # Errors
    ///
    /// Returns `SecretTooShort` if the secret is under 32 bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, TokenError> {
        if bytes.len() < SECRET_MIN_LEN_BYTES {
            return Err(TokenError::SecretTooShort {
                len: bytes.len(),
                min: SECRET_MIN_LEN_BYTES,
            });
        }
        Ok(Self(bytes))
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for TokenSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret.
        f.debug_tuple("TokenSecret").field(&"[redacted]").finish()
    }
}

/// The signed token payload.
///
/// Carries the entity binding plus the descriptive fields a scanner needs
/// to render a result without a second lookup. Instants are unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenPayload {
    /// Token identifier (UUID).
    pub token_id: String,

    /// The certification version this token is bound to.
    pub entity_id: String,

    /// The employee the certification belongs to.
    pub subject_id: String,

    /// Kind of certification, for display.
    pub certification_type: String,

    /// Issue instant, unix seconds.
    pub issued_at: i64,

    /// Expiry instant, unix seconds.
    pub expires_at: i64,
}

/// Encodes and signs a payload into the wire form.
pub(crate) fn encode(payload: &TokenPayload, secret: &TokenSecret) -> String {
    // TokenPayload serialization cannot fail: all fields are strings and
    // integers.
    let payload_bytes = serde_json::to_vec(payload).expect("token payload serializes");
    let mac = compute_mac(secret, &payload_bytes);
    format!(
        "{}|{}",
        URL_SAFE_NO_PAD.encode(&payload_bytes),
        hex::encode(mac)
    )
}

/// Decodes a wire token and verifies its signature.
///
/// Signature comparison is constant-time. Expiry is the caller's concern:
/// this function authenticates bytes, nothing more.
pub(crate) fn decode(token: &str, secret: &TokenSecret) -> Result<TokenPayload, TokenError> {
    let (payload_b64, mac_hex) = token.split_once('|').ok_or_else(|| TokenError::Malformed {
        reason: "missing signature separator".to_string(),
    })?;

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|e| TokenError::Malformed {
            reason: format!("invalid payload encoding: {e}"),
        })?;
    let provided_mac = hex::decode(mac_hex).map_err(|e| TokenError::Malformed {
        reason: format!("invalid signature encoding: {e}"),
    })?;

    let expected_mac = compute_mac(secret, &payload_bytes);
    if expected_mac.len() != provided_mac.len() {
        return Err(TokenError::BadSignature);
    }
    let matches: bool = expected_mac.ct_eq(provided_mac.as_slice()).into();
    if !matches {
        return Err(TokenError::BadSignature);
    }

    serde_json::from_slice(&payload_bytes).map_err(|e| TokenError::Malformed {
        reason: format!("invalid payload: {e}"),
    })
}

fn compute_mac(secret: &TokenSecret, payload: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length; 32-byte minimum is enforced by
    // TokenSecret construction.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}
