//! Signing and verification backends.
//!
//! Two variants sit behind the [`Signer`] / [`Verifier`] traits:
//!
//! - **Local**: Ed25519 key pair held in a [`KeyStore`] directory.
//! - **Remote**: a signing authority that receives only the SHA-256 digest of
//!   the canonical payload and answers with ECDSA P-256 signatures.
//!
//! Verifiers are bound to one algorithm and a set of key ids through
//! [`AcceptPolicy`]; the `alg`/`key_id` claimed by a message never selects
//! what gets checked.

mod keystore;
mod local;
mod remote;

pub use keystore::{KeyStore, PRIVATE_KEY_FILE, PUBLIC_KEY_FILE};
pub use local::{LocalKeySigner, LocalKeyVerifier};
pub use remote::{RemoteAuthority, RemoteAuthoritySigner, RemoteAuthorityVerifier};

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use crate::config::{SigningBackend, SigningConfig, VerificationConfig};
use crate::error::{SigningError, VerifyError};

/// Signature algorithms this crate can produce and check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Ed25519 over the canonical payload.
    Ed25519,
    /// ECDSA P-256 over the SHA-256 digest of the canonical payload.
    EcdsaSha256,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ed25519 => "EdDSA",
            Self::EcdsaSha256 => "ECDSA_SHA_256",
        }
    }

    /// Algorithm produced by a backend.
    pub fn for_backend(backend: SigningBackend) -> Self {
        match backend {
            SigningBackend::Local => Self::Ed25519,
            SigningBackend::Remote => Self::EcdsaSha256,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EdDSA" => Ok(Self::Ed25519),
            "ECDSA_SHA_256" => Ok(Self::EcdsaSha256),
            other => Err(format!("unsupported algorithm: {}", other)),
        }
    }
}

/// Wire signature block: `{"alg", "key_id", "sig"}` with standard base64.
///
/// `alg` stays a string so that unknown algorithms decode and are then
/// rejected by the verifier's [`AcceptPolicy`] rather than as malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureBlock {
    pub alg: String,
    pub key_id: String,
    pub sig: String,
}

impl SignatureBlock {
    pub fn new(alg: Algorithm, key_id: impl Into<String>, signature: &[u8]) -> Self {
        Self {
            alg: alg.as_str().to_string(),
            key_id: key_id.into(),
            sig: BASE64.encode(signature),
        }
    }

    /// Decoded signature bytes.
    pub fn signature_bytes(&self) -> Result<Vec<u8>, VerifyError> {
        BASE64
            .decode(self.sig.trim())
            .map_err(|e| VerifyError::Malformed {
                reason: format!("invalid base64 signature: {}", e),
            })
    }
}

/// Produces signature blocks over canonical payloads.
#[async_trait]
pub trait Signer: Send + Sync {
    fn algorithm(&self) -> Algorithm;

    fn key_id(&self) -> &str;

    async fn sign(&self, payload: &[u8]) -> Result<SignatureBlock, SigningError>;
}

/// Checks a signature block against a canonical payload.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, payload: &[u8], block: &SignatureBlock) -> Result<(), VerifyError>;
}

/// What a verifier is configured to accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptPolicy {
    algorithm: Algorithm,
    key_ids: BTreeSet<String>,
}

impl AcceptPolicy {
    pub fn new<I, S>(algorithm: Algorithm, key_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            algorithm,
            key_ids: key_ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn accepts_key(&self, key_id: &str) -> bool {
        self.key_ids.contains(key_id)
    }

    /// Gate applied before any cryptographic or network work.
    pub fn check(&self, block: &SignatureBlock) -> Result<(), VerifyError> {
        if block.alg != self.algorithm.as_str() {
            return Err(VerifyError::Invalid {
                reason: format!(
                    "algorithm '{}' not accepted (expected {})",
                    block.alg, self.algorithm
                ),
            });
        }
        if !self.accepts_key(&block.key_id) {
            return Err(VerifyError::Invalid {
                reason: format!("key_id '{}' not trusted", block.key_id),
            });
        }
        Ok(())
    }
}

/// Build the configured signer.
///
/// The local variant loads the key store, generating a key pair on first use.
pub fn build_signer(config: &SigningConfig) -> Result<Arc<dyn Signer>, SigningError> {
    match config.backend {
        SigningBackend::Local => {
            let store = KeyStore::new(config.resolved_key_dir()?);
            let signing_key = store.load_or_generate()?;
            Ok(Arc::new(LocalKeySigner::new(signing_key)))
        }
        SigningBackend::Remote => {
            let authority = RemoteAuthority::from_config(config)?;
            let key_id = required_remote_key_id(config)?;
            Ok(Arc::new(RemoteAuthoritySigner::new(authority, key_id)))
        }
    }
}

/// Build the configured verifier.
///
/// When `accepted_key_ids` is empty the verifier accepts only the configured
/// signing key.
pub fn build_verifier(
    signing: &SigningConfig,
    verification: &VerificationConfig,
) -> Result<Arc<dyn Verifier>, VerifyError> {
    let algorithm = Algorithm::for_backend(signing.backend);

    match signing.backend {
        SigningBackend::Local => {
            let dir = signing.resolved_key_dir().map_err(unavailable)?;
            let verifying_key = KeyStore::new(dir)
                .load_verifying_key()
                .map_err(unavailable)?;
            let own_id = KeyStore::compute_key_id(&verifying_key).map_err(unavailable)?;

            let policy = accept_policy(algorithm, own_id, &verification.accepted_key_ids);
            Ok(Arc::new(LocalKeyVerifier::new(verifying_key, policy)))
        }
        SigningBackend::Remote => {
            let authority = RemoteAuthority::from_config(signing).map_err(unavailable)?;
            let key_id = required_remote_key_id(signing).map_err(unavailable)?;

            let policy = accept_policy(algorithm, key_id, &verification.accepted_key_ids);
            Ok(Arc::new(RemoteAuthorityVerifier::new(authority, policy)))
        }
    }
}

fn accept_policy(algorithm: Algorithm, own_key_id: String, configured: &[String]) -> AcceptPolicy {
    if configured.is_empty() {
        AcceptPolicy::new(algorithm, [own_key_id])
    } else {
        AcceptPolicy::new(algorithm, configured.iter().cloned())
    }
}

fn required_remote_key_id(config: &SigningConfig) -> Result<String, SigningError> {
    config
        .key_id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| SigningError::KeyNotFound {
            key_ref: "signing.key_id (ZTXP_SIGNING_KEY_ID) is not set".to_string(),
        })
}

fn unavailable(err: SigningError) -> VerifyError {
    VerifyError::Unavailable {
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(alg: &str, key_id: &str) -> SignatureBlock {
        SignatureBlock {
            alg: alg.into(),
            key_id: key_id.into(),
            sig: "AAAA".into(),
        }
    }

    #[test]
    fn test_algorithm_wire_names() {
        assert_eq!(Algorithm::Ed25519.as_str(), "EdDSA");
        assert_eq!(Algorithm::EcdsaSha256.as_str(), "ECDSA_SHA_256");
        assert_eq!("EdDSA".parse::<Algorithm>(), Ok(Algorithm::Ed25519));
        assert!("none".parse::<Algorithm>().is_err());
    }

    #[test]
    fn test_accept_policy_rejects_claimed_algorithm() {
        let policy = AcceptPolicy::new(Algorithm::Ed25519, ["sha256:abc"]);

        assert!(policy.check(&block("EdDSA", "sha256:abc")).is_ok());

        let err = policy
            .check(&block("ECDSA_SHA_256", "sha256:abc"))
            .unwrap_err();
        assert!(matches!(err, VerifyError::Invalid { .. }));

        let err = policy.check(&block("none", "sha256:abc")).unwrap_err();
        assert!(matches!(err, VerifyError::Invalid { .. }));
    }

    #[test]
    fn test_accept_policy_rejects_unknown_key() {
        let policy = AcceptPolicy::new(Algorithm::Ed25519, ["sha256:abc"]);
        let err = policy.check(&block("EdDSA", "sha256:other")).unwrap_err();
        assert!(err.to_string().contains("not trusted"));
    }

    #[test]
    fn test_signature_bytes_reports_bad_base64_as_malformed() {
        let mut bad = block("EdDSA", "k");
        bad.sig = "not base64!".into();
        let err = bad.signature_bytes().unwrap_err();
        assert_eq!(err.detail(), "malformed_signature");
    }

    #[test]
    fn test_configured_key_ids_replace_own_key() {
        let policy = accept_policy(
            Algorithm::Ed25519,
            "sha256:own".into(),
            &["sha256:a".into(), "sha256:b".into()],
        );
        assert!(policy.accepts_key("sha256:a"));
        assert!(!policy.accepts_key("sha256:own"));

        let policy = accept_policy(Algorithm::Ed25519, "sha256:own".into(), &[]);
        assert!(policy.accepts_key("sha256:own"));
    }
}
