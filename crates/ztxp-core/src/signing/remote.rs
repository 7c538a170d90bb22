//! Remote signing authority client.
//!
//! Only the SHA-256 digest of the canonical payload leaves the process. The
//! authority exposes:
//!
//! - `POST {url}/sign`: `{key_id, message, message_type: "DIGEST", signing_algorithm}`
//!   answered with `{signature}`
//! - `POST {url}/verify`: same plus `signature`, answered with `{signature_valid}`
//!
//! `message` and `signature` are standard base64.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{AcceptPolicy, Algorithm, SignatureBlock, Signer, Verifier};
use crate::canonical::sha256_digest;
use crate::config::SigningConfig;
use crate::error::{transport_reason, SigningError, VerifyError};

const MESSAGE_TYPE_DIGEST: &str = "DIGEST";

#[derive(Debug, Serialize)]
struct SignRequest<'a> {
    key_id: &'a str,
    message: String,
    message_type: &'static str,
    signing_algorithm: &'static str,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    signature: String,
}

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    key_id: &'a str,
    message: String,
    message_type: &'static str,
    signature: &'a str,
    signing_algorithm: &'static str,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    signature_valid: bool,
}

/// HTTP client for the signing authority.
#[derive(Clone)]
pub struct RemoteAuthority {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl std::fmt::Debug for RemoteAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteAuthority")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl RemoteAuthority {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SigningError> {
        let parsed = url::Url::parse(base_url).map_err(|e| SigningError::Unavailable {
            reason: format!("invalid signing authority url '{}': {}", base_url, e),
        })?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("ztxp/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SigningError::Unavailable {
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn from_config(config: &SigningConfig) -> Result<Self, SigningError> {
        let url = config
            .authority_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| SigningError::Unavailable {
                reason: "signing.authority_url (ZTXP_SIGNING_AUTHORITY_URL) is not set"
                    .to_string(),
            })?;
        Self::new(
            url,
            config.authority_token.clone(),
            Duration::from_millis(config.timeout_ms),
        )
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        }
    }

    /// Sign a payload digest; returns the raw signature bytes.
    pub async fn sign_digest(&self, key_id: &str, digest: &[u8]) -> Result<Vec<u8>, SigningError> {
        let body = SignRequest {
            key_id,
            message: BASE64.encode(digest),
            message_type: MESSAGE_TYPE_DIGEST,
            signing_algorithm: Algorithm::EcdsaSha256.as_str(),
        };

        let response = self.post("/sign").json(&body).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(SigningError::KeyNotFound {
                key_ref: key_id.to_string(),
            });
        }
        if !status.is_success() {
            warn!(status = %status, "signing authority rejected sign request");
            return Err(SigningError::Unavailable {
                reason: format!("signing authority returned HTTP {}", status.as_u16()),
            });
        }

        let parsed: SignResponse = response.json().await.map_err(|e| SigningError::Unavailable {
            reason: format!("invalid sign response: {}", transport_reason(&e)),
        })?;

        BASE64
            .decode(parsed.signature.trim())
            .map_err(|e| SigningError::Unavailable {
                reason: format!("sign response signature is not base64: {}", e),
            })
    }

    /// Ask the authority whether `signature` is valid for `digest`.
    pub async fn verify_digest(
        &self,
        key_id: &str,
        digest: &[u8],
        signature_b64: &str,
    ) -> Result<(), VerifyError> {
        let body = VerifyRequest {
            key_id,
            message: BASE64.encode(digest),
            message_type: MESSAGE_TYPE_DIGEST,
            signature: signature_b64,
            signing_algorithm: Algorithm::EcdsaSha256.as_str(),
        };

        let response = self.post("/verify").json(&body).send().await?;
        let status = response.status();

        match status {
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                return Err(VerifyError::Invalid {
                    reason: format!(
                        "signing authority refused signature (HTTP {})",
                        status.as_u16()
                    ),
                });
            }
            s if !s.is_success() => {
                return Err(VerifyError::Unavailable {
                    reason: format!("signing authority returned HTTP {}", s.as_u16()),
                });
            }
            _ => {}
        }

        let parsed: VerifyResponse =
            response.json().await.map_err(|e| VerifyError::Unavailable {
                reason: format!("invalid verify response: {}", transport_reason(&e)),
            })?;

        if parsed.signature_valid {
            Ok(())
        } else {
            Err(VerifyError::Invalid {
                reason: "signing authority reported signature_valid=false".to_string(),
            })
        }
    }
}

/// Signer that delegates to the remote authority.
#[derive(Debug, Clone)]
pub struct RemoteAuthoritySigner {
    authority: RemoteAuthority,
    key_id: String,
}

impl RemoteAuthoritySigner {
    pub fn new(authority: RemoteAuthority, key_id: impl Into<String>) -> Self {
        Self {
            authority,
            key_id: key_id.into(),
        }
    }
}

#[async_trait]
impl Signer for RemoteAuthoritySigner {
    fn algorithm(&self) -> Algorithm {
        Algorithm::EcdsaSha256
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }

    async fn sign(&self, payload: &[u8]) -> Result<SignatureBlock, SigningError> {
        let digest = sha256_digest(payload);
        let signature = self.authority.sign_digest(&self.key_id, &digest).await?;
        debug!(key_id = %self.key_id, "remote signature obtained");
        Ok(SignatureBlock::new(
            Algorithm::EcdsaSha256,
            self.key_id.clone(),
            &signature,
        ))
    }
}

/// Verifier that delegates to the remote authority.
#[derive(Debug, Clone)]
pub struct RemoteAuthorityVerifier {
    authority: RemoteAuthority,
    policy: AcceptPolicy,
}

impl RemoteAuthorityVerifier {
    pub fn new(authority: RemoteAuthority, policy: AcceptPolicy) -> Self {
        Self { authority, policy }
    }
}

#[async_trait]
impl Verifier for RemoteAuthorityVerifier {
    async fn verify(&self, payload: &[u8], block: &SignatureBlock) -> Result<(), VerifyError> {
        self.policy.check(block)?;

        // Decode locally so malformed blocks never reach the authority.
        let bytes = block.signature_bytes()?;
        if bytes.is_empty() {
            return Err(VerifyError::Malformed {
                reason: "empty signature".to_string(),
            });
        }

        let digest = sha256_digest(payload);
        self.authority
            .verify_digest(&block.key_id, &digest, &BASE64.encode(&bytes))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_url() {
        let err = RemoteAuthority::new("not a url", None, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, SigningError::Unavailable { .. }));
    }

    #[test]
    fn test_debug_redacts_token() {
        let authority = RemoteAuthority::new(
            "https://kms.example.test/",
            Some("secret-token".into()),
            Duration::from_secs(1),
        )
        .unwrap();
        let debug = format!("{:?}", authority);
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("kms.example.test"));
    }

    #[tokio::test]
    async fn test_wrong_algorithm_rejected_without_network() {
        // Unroutable URL: any network attempt would surface as Unavailable.
        let authority =
            RemoteAuthority::new("http://127.0.0.1:9", None, Duration::from_millis(50)).unwrap();
        let verifier = RemoteAuthorityVerifier::new(
            authority,
            AcceptPolicy::new(Algorithm::EcdsaSha256, ["alias/ztxp"]),
        );
        let block = SignatureBlock::new(Algorithm::Ed25519, "alias/ztxp", &[1u8; 64]);

        let err = verifier.verify(b"payload", &block).await.unwrap_err();
        assert!(matches!(err, VerifyError::Invalid { .. }));
    }
}
