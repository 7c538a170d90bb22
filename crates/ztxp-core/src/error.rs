//! Error types for the trust pipeline.
//!
//! Each stage owns its error enum; [`BrokerError`] is the combined taxonomy the
//! broker reports to callers.

use crate::policy::PolicyError;

/// Signing backend errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SigningError {
    /// Backend (key file or signing authority) could not be reached or loaded.
    #[error("signing unavailable: {reason}")]
    Unavailable { reason: String },

    /// No signing key is provisioned under the configured reference.
    #[error("signing key not found: {key_ref}")]
    KeyNotFound { key_ref: String },

    /// Payload could not be prepared for signing.
    #[error("signing payload error: {reason}")]
    Payload { reason: String },

    /// Refusing to overwrite an existing key without `force`.
    #[error("key already exists: {path}")]
    KeyExists { path: String },
}

impl SigningError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Verification errors.
///
/// Content failures (`Invalid`, `Malformed`) are terminal; `Unavailable` is a
/// transport failure and may be retried.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VerifyError {
    /// Signature does not match payload, key, or accepted algorithm.
    #[error("signature invalid: {reason}")]
    Invalid { reason: String },

    /// Signature block missing or undecodable.
    #[error("malformed signature block: {reason}")]
    Malformed { reason: String },

    /// Verification backend could not be reached.
    #[error("verification unavailable: {reason}")]
    Unavailable { reason: String },
}

impl VerifyError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Short detail used in `signature_rejected:<detail>` reasons.
    pub fn detail(&self) -> &str {
        match self {
            Self::Invalid { .. } => "invalid_signature",
            Self::Malformed { reason } if reason == MISSING_SIGNATURE => MISSING_SIGNATURE,
            Self::Malformed { .. } => "malformed_signature",
            Self::Unavailable { .. } => "verification_unavailable",
        }
    }
}

pub(crate) const MISSING_SIGNATURE: &str = "missing_signature";

/// Canonical encoding errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CanonicalError {
    #[error("canonical payload must be a JSON object")]
    NotAnObject,

    #[error("failed to serialize: {message}")]
    Serialize { message: String },
}

/// Configuration errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {message}")]
    Invalid { message: String },

    #[error("failed to read configuration {path}: {message}")]
    Read { path: String, message: String },
}

/// Broker errors: everything that keeps a TAM from reaching a policy decision.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    /// Envelope missing, not JSON, or TAM not decodable.
    #[error("malformed request: {reason}")]
    MalformedRequest { reason: String },

    #[error("signature invalid: {reason}")]
    SignatureInvalid { reason: String },

    #[error("malformed signature block: {reason}")]
    MalformedSignatureBlock { reason: String },

    #[error("verification unavailable: {reason}")]
    VerificationUnavailable { reason: String },

    #[error("tam expired: age {age_secs}s exceeds ttl {ttl_secs}s")]
    TamExpired { age_secs: i64, ttl_secs: i64 },

    #[error("tam from future: issued {ahead_secs}s ahead, tolerance {skew_secs}s")]
    TamFromFuture { ahead_secs: i64, skew_secs: i64 },

    /// `message_id` already seen inside the freshness window.
    #[error("tam replayed: {message_id}")]
    TamReplayed { message_id: String },

    #[error("policy backend unavailable: {reason}")]
    PolicyBackendUnavailable { reason: String },
}

impl BrokerError {
    /// HTTP-equivalent status for the rejection.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MalformedRequest { .. } => 400,

            Self::SignatureInvalid { .. }
            | Self::MalformedSignatureBlock { .. }
            | Self::TamExpired { .. }
            | Self::TamFromFuture { .. }
            | Self::TamReplayed { .. } => 403,

            Self::VerificationUnavailable { .. } | Self::PolicyBackendUnavailable { .. } => 500,
        }
    }

    /// Reason code placed in the wire response.
    pub fn reason_code(&self) -> String {
        match self {
            Self::MalformedRequest { reason } => reason.clone(),
            Self::SignatureInvalid { .. } => "signature_rejected:invalid_signature".to_string(),
            Self::MalformedSignatureBlock { reason } if reason == MISSING_SIGNATURE => {
                format!("signature_rejected:{}", MISSING_SIGNATURE)
            }
            Self::MalformedSignatureBlock { .. } => {
                "signature_rejected:malformed_signature".to_string()
            }
            Self::VerificationUnavailable { .. } => "verification_unavailable".to_string(),
            Self::TamExpired { .. } => "tam_expired".to_string(),
            Self::TamFromFuture { .. } => "tam_from_future".to_string(),
            Self::TamReplayed { .. } => "tam_replayed".to_string(),
            Self::PolicyBackendUnavailable { .. } => "policy_backend_unavailable".to_string(),
        }
    }

    /// Whether the caller may retry the same request.
    ///
    /// Freshness rejections need a new TAM, not a retry of this one.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::VerificationUnavailable { .. } | Self::PolicyBackendUnavailable { .. }
        )
    }
}

impl From<VerifyError> for BrokerError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::Invalid { reason } => Self::SignatureInvalid { reason },
            VerifyError::Malformed { reason } => Self::MalformedSignatureBlock { reason },
            VerifyError::Unavailable { reason } => Self::VerificationUnavailable { reason },
        }
    }
}

impl From<PolicyError> for BrokerError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::BackendUnavailable { reason } => {
                Self::PolicyBackendUnavailable { reason }
            }
        }
    }
}

impl From<reqwest::Error> for SigningError {
    fn from(err: reqwest::Error) -> Self {
        Self::Unavailable {
            reason: transport_reason(&err),
        }
    }
}

impl From<reqwest::Error> for VerifyError {
    fn from(err: reqwest::Error) -> Self {
        Self::Unavailable {
            reason: transport_reason(&err),
        }
    }
}

pub(crate) fn transport_reason(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("timeout: {}", err)
    } else {
        err.to_string()
    }
}

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;
