//! Canonical encoding of signed messages.
//!
//! Signer and verifier both go through [`signing_payload`]: JCS (RFC 8785)
//! over the message with its top-level `signature` member removed. Keys are
//! sorted at every level, no whitespace is emitted, numbers use ECMAScript
//! formatting and text is UTF-8.

use serde::Serialize;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

use crate::error::CanonicalError;

/// Name of the member excluded from the signing payload.
pub const SIGNATURE_FIELD: &str = "signature";

/// Serialize any value to canonical JCS bytes.
pub fn to_canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CanonicalError> {
    serde_jcs::to_vec(value).map_err(|e| CanonicalError::Serialize {
        message: e.to_string(),
    })
}

/// Canonical bytes of `message` without its `signature` member.
///
/// Operates on the JSON value rather than a typed model so that a verifier
/// covers every member the producer signed, including ones it does not model.
pub fn signing_payload(message: &JsonValue) -> Result<Vec<u8>, CanonicalError> {
    let object = message.as_object().ok_or(CanonicalError::NotAnObject)?;

    let unsigned: serde_json::Map<String, JsonValue> = object
        .iter()
        .filter(|(k, _)| k.as_str() != SIGNATURE_FIELD)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    to_canonical_bytes(&unsigned)
}

/// SHA-256 of a canonical payload (digest sent to a remote authority).
pub fn sha256_digest(bytes: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(bytes));
    out
}

/// `sha256:{hex}` form, used for key ids.
pub fn sha256_prefixed(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}
