//! Trust Assertion Message: model, construction, signing and freshness.
//!
//! A TAM is minted per request, signed once over its canonical payload (see
//! [`crate::canonical::signing_payload`]), verified once and then discarded.

mod builder;
pub mod freshness;
pub mod timestamp;
mod types;

pub use builder::TamBuilder;
pub use freshness::{FreshnessError, FreshnessWindow};
pub use types::{
    Action, ActionClass, ActionParseError, AssertionContext, Device, Posture, Resource, Subject,
    TrustAssertionMessage, DEFAULT_RISK_SCORE, PROTOCOL_VERSION, UNKNOWN_DEVICE_TRUST,
};

pub(crate) use types::serialize_risk_score;

use serde_json::Value as JsonValue;

use crate::canonical::{self, SIGNATURE_FIELD};
use crate::error::{SigningError, VerifyError, MISSING_SIGNATURE};
use crate::signing::{SignatureBlock, Signer, Verifier};

/// Structural problems found after decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TamError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
}

impl TrustAssertionMessage {
    /// Reject TAMs whose identifying fields are empty.
    pub fn validate_structure(&self) -> Result<(), TamError> {
        let required: [(&'static str, &str); 5] = [
            ("version", &self.version),
            ("message_id", &self.message_id),
            ("issuer", &self.issuer),
            ("subject.id", &self.subject.id),
            ("resource.id", &self.resource.id),
        ];

        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(TamError::MissingField { field });
            }
        }
        Ok(())
    }

    pub fn to_value(&self) -> Result<JsonValue, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Canonical bytes covered by the signature.
    pub fn signing_payload(&self) -> Result<Vec<u8>, SigningError> {
        let value = self.to_value().map_err(|e| SigningError::Payload {
            reason: e.to_string(),
        })?;
        canonical::signing_payload(&value).map_err(|e| SigningError::Payload {
            reason: e.to_string(),
        })
    }
}

/// Sign a TAM, replacing any signature it already carries.
pub async fn sign_tam(
    mut tam: TrustAssertionMessage,
    signer: &dyn Signer,
) -> Result<TrustAssertionMessage, SigningError> {
    tam.signature = None;
    let payload = tam.signing_payload()?;
    let block = signer.sign(&payload).await?;

    tracing::debug!(
        message_id = %tam.message_id,
        alg = %block.alg,
        key_id = %block.key_id,
        "signed tam"
    );

    tam.signature = Some(block);
    Ok(tam)
}

/// Verify a TAM exactly as received.
///
/// The payload is rebuilt from the raw JSON so that members this crate does
/// not model are still covered.
pub async fn verify_tam_value(tam: &JsonValue, verifier: &dyn Verifier) -> Result<(), VerifyError> {
    let block = extract_signature_block(tam)?;
    let payload = canonical::signing_payload(tam).map_err(|e| VerifyError::Malformed {
        reason: e.to_string(),
    })?;
    verifier.verify(&payload, &block).await
}

fn extract_signature_block(tam: &JsonValue) -> Result<SignatureBlock, VerifyError> {
    match tam.get(SIGNATURE_FIELD) {
        None | Some(JsonValue::Null) => Err(VerifyError::Malformed {
            reason: MISSING_SIGNATURE.to_string(),
        }),
        Some(raw) => {
            serde_json::from_value(raw.clone()).map_err(|e| VerifyError::Malformed {
                reason: format!("signature block: {}", e),
            })
        }
    }
}
