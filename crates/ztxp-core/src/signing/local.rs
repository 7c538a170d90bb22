use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer as _, SigningKey, VerifyingKey};

use super::{AcceptPolicy, Algorithm, KeyStore, SignatureBlock, Signer, Verifier};
use crate::error::{SigningError, VerifyError};

/// Ed25519 signer backed by a local key.
pub struct LocalKeySigner {
    key: SigningKey,
    key_id: String,
}

impl LocalKeySigner {
    pub fn new(key: SigningKey) -> Self {
        // SPKI encoding of an Ed25519 key cannot fail; fall back to a raw
        // digest so construction stays infallible.
        let key_id = KeyStore::compute_key_id(&key.verifying_key()).unwrap_or_else(|_| {
            crate::canonical::sha256_prefixed(key.verifying_key().as_bytes())
        });
        Self { key, key_id }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }
}

impl std::fmt::Debug for LocalKeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKeySigner")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Signer for LocalKeySigner {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Ed25519
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }

    async fn sign(&self, payload: &[u8]) -> Result<SignatureBlock, SigningError> {
        let signature: Signature = self.key.sign(payload);
        Ok(SignatureBlock::new(
            Algorithm::Ed25519,
            self.key_id.clone(),
            &signature.to_bytes(),
        ))
    }
}

/// Ed25519 verifier pinned to one public key.
#[derive(Debug, Clone)]
pub struct LocalKeyVerifier {
    key: VerifyingKey,
    policy: AcceptPolicy,
}

impl LocalKeyVerifier {
    pub fn new(key: VerifyingKey, policy: AcceptPolicy) -> Self {
        Self { key, policy }
    }

    /// Verifier that accepts only `key` under its own key id.
    pub fn from_verifying_key(key: VerifyingKey) -> Self {
        let key_id = KeyStore::compute_key_id(&key)
            .unwrap_or_else(|_| crate::canonical::sha256_prefixed(key.as_bytes()));
        Self::new(key, AcceptPolicy::new(Algorithm::Ed25519, [key_id]))
    }
}

#[async_trait]
impl Verifier for LocalKeyVerifier {
    async fn verify(&self, payload: &[u8], block: &SignatureBlock) -> Result<(), VerifyError> {
        self.policy.check(block)?;

        let bytes = block.signature_bytes()?;
        let signature = Signature::from_slice(&bytes).map_err(|e| VerifyError::Malformed {
            reason: format!("invalid ed25519 signature length: {}", e),
        })?;

        self.key
            .verify_strict(payload, &signature)
            .map_err(|_| VerifyError::Invalid {
                reason: "ed25519 verification failed".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (LocalKeySigner, LocalKeyVerifier) {
        let key = SigningKey::from_bytes(&[42u8; 32]);
        let verifier = LocalKeyVerifier::from_verifying_key(key.verifying_key());
        (LocalKeySigner::new(key), verifier)
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (signer, verifier) = pair();
        let block = signer.sign(b"payload").await.unwrap();
        assert_eq!(block.key_id, signer.key_id());
        verifier.verify(b"payload", &block).await.unwrap();
    }

    #[tokio::test]
    async fn test_every_signature_byte_flip_fails() {
        let (signer, verifier) = pair();
        let block = signer.sign(b"payload").await.unwrap();
        let original = block.signature_bytes().unwrap();

        for i in 0..original.len() {
            let mut bytes = original.clone();
            bytes[i] ^= 0x01;
            let tampered = SignatureBlock::new(Algorithm::Ed25519, block.key_id.clone(), &bytes);
            assert!(
                verifier.verify(b"payload", &tampered).await.is_err(),
                "flip at byte {} verified",
                i
            );
        }
    }

    #[tokio::test]
    async fn test_payload_byte_flip_fails() {
        let (signer, verifier) = pair();
        let payload = br#"{"a":1,"b":"two"}"#.to_vec();
        let block = signer.sign(&payload).await.unwrap();

        for i in 0..payload.len() {
            let mut altered = payload.clone();
            altered[i] ^= 0x01;
            let err = verifier.verify(&altered, &block).await.unwrap_err();
            assert!(matches!(err, VerifyError::Invalid { .. }));
        }
    }

    #[tokio::test]
    async fn test_other_key_is_rejected_before_crypto() {
        let (_, verifier) = pair();
        let other = LocalKeySigner::new(SigningKey::from_bytes(&[9u8; 32]));
        let block = other.sign(b"payload").await.unwrap();

        let err = verifier.verify(b"payload", &block).await.unwrap_err();
        assert!(err.to_string().contains("not trusted"));
    }

    #[tokio::test]
    async fn test_truncated_signature_is_malformed() {
        let (signer, verifier) = pair();
        let block = signer.sign(b"payload").await.unwrap();
        let short = SignatureBlock::new(Algorithm::Ed25519, block.key_id, &[0u8; 10]);

        let err = verifier.verify(b"payload", &short).await.unwrap_err();
        assert_eq!(err.detail(), "malformed_signature");
    }
}
