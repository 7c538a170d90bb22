//! Trust Broker: verify, check freshness, delegate to policy, decide.
//!
//! ```text
//! Received -> SignatureChecked -> FreshnessChecked -> PolicyEvaluated -> Decided
//!     \______________\___________________\___________________\-> Rejected
//! ```
//!
//! Content failures (malformed input, bad signature, stale TAM) are terminal.
//! Backend failures (verifier or PDP unreachable, timeouts) are reported as
//! retryable 500s whose body is still a deny record.

mod decision;
mod response;

pub use decision::{Decision, DecisionRecord};
pub use response::{BrokerResponse, BrokerStage, Rejection};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::canonical::SIGNATURE_FIELD;
use crate::config::ZtxpConfig;
use crate::error::BrokerError;
use crate::policy::{self, PolicyEvaluator, PolicyInput};
use crate::replay::ReplayGuard;
use crate::signing::{self, Verifier};
use crate::tam::{self, FreshnessWindow, TrustAssertionMessage};

/// Envelope member holding the TAM.
pub const ENVELOPE_FIELD: &str = "tam";

const DEFAULT_DECISION_TTL_SECS: u64 = 300;
const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Broker {
    verifier: Arc<dyn Verifier>,
    evaluator: Arc<dyn PolicyEvaluator>,
    freshness: FreshnessWindow,
    decision_ttl_secs: u64,
    backend_timeout: Duration,
    replay: Option<ReplayGuard>,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("freshness", &self.freshness)
            .field("decision_ttl_secs", &self.decision_ttl_secs)
            .field("backend_timeout", &self.backend_timeout)
            .field("replay", &self.replay.is_some())
            .finish_non_exhaustive()
    }
}

impl Broker {
    /// Broker with default freshness window, decision TTL and timeout.
    pub fn new(verifier: Arc<dyn Verifier>, evaluator: Arc<dyn PolicyEvaluator>) -> Self {
        Self {
            verifier,
            evaluator,
            freshness: FreshnessWindow::default(),
            decision_ttl_secs: DEFAULT_DECISION_TTL_SECS,
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
            replay: None,
        }
    }

    /// Build verifier and evaluator from configuration.
    pub fn from_config(config: &ZtxpConfig) -> anyhow::Result<Self> {
        let verifier = signing::build_verifier(&config.signing, &config.verification)
            .context("failed to build verifier")?;
        let evaluator =
            policy::build_evaluator(&config.policy).context("failed to build policy evaluator")?;
        Ok(Self::with_backends(config, verifier, evaluator))
    }

    /// Apply configuration to explicitly supplied backends.
    pub fn with_backends(
        config: &ZtxpConfig,
        verifier: Arc<dyn Verifier>,
        evaluator: Arc<dyn PolicyEvaluator>,
    ) -> Self {
        let freshness =
            FreshnessWindow::new(config.freshness.ttl_secs, config.freshness.future_skew_secs);

        let broker = Self::new(verifier, evaluator)
            .with_freshness(freshness)
            .with_decision_ttl(config.broker.decision_ttl_secs)
            .with_backend_timeout(Duration::from_millis(config.broker.backend_timeout_ms));

        if config.broker.replay_protection {
            broker.with_replay_guard(ReplayGuard::new(Duration::from_secs(freshness.span_secs())))
        } else {
            broker
        }
    }

    pub fn with_freshness(mut self, freshness: FreshnessWindow) -> Self {
        self.freshness = freshness;
        self
    }

    pub fn with_decision_ttl(mut self, secs: u64) -> Self {
        self.decision_ttl_secs = secs;
        self
    }

    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    pub fn with_replay_guard(mut self, guard: ReplayGuard) -> Self {
        self.replay = Some(guard);
        self
    }

    pub fn freshness(&self) -> FreshnessWindow {
        self.freshness
    }

    /// Evaluate a raw `{"tam": ...}` request body.
    pub async fn evaluate(&self, body: &[u8]) -> Result<DecisionRecord, Rejection> {
        self.evaluate_at(Utc::now(), body).await
    }

    /// Evaluate a raw request body against a fixed clock.
    pub async fn evaluate_at(
        &self,
        now: DateTime<Utc>,
        body: &[u8],
    ) -> Result<DecisionRecord, Rejection> {
        let envelope: JsonValue = serde_json::from_slice(body)
            .map_err(|_| received(malformed("invalid_json".to_string()), None))?;
        self.evaluate_envelope_at(now, &envelope).await
    }

    /// Evaluate an already-parsed envelope.
    pub async fn evaluate_envelope_at(
        &self,
        now: DateTime<Utc>,
        envelope: &JsonValue,
    ) -> Result<DecisionRecord, Rejection> {
        match envelope.get(ENVELOPE_FIELD) {
            None | Some(JsonValue::Null) => {
                Err(received(malformed("missing_tam".to_string()), None))
            }
            Some(tam_value) => self.evaluate_tam_value_at(now, tam_value).await,
        }
    }

    /// Run the pipeline over the TAM exactly as received.
    pub async fn evaluate_tam_value_at(
        &self,
        now: DateTime<Utc>,
        tam_value: &JsonValue,
    ) -> Result<DecisionRecord, Rejection> {
        let result = self.run(now, tam_value).await;
        match &result {
            Ok(record) => info!(
                message_id = record.message_id().unwrap_or_default(),
                decision = record.decision().as_str(),
                reason = record.reason(),
                expires_in = record.expires_in(),
                "tam decided"
            ),
            Err(rejection) => warn!(
                message_id = rejection.message_id.as_deref().unwrap_or_default(),
                stage = %rejection.stage,
                reason = %rejection.reason_code(),
                status = rejection.status_code(),
                error = %rejection.error,
                "tam rejected"
            ),
        }
        result
    }

    async fn run(
        &self,
        now: DateTime<Utc>,
        tam_value: &JsonValue,
    ) -> Result<DecisionRecord, Rejection> {
        // Received
        let message_id = tam_value
            .get("message_id")
            .and_then(JsonValue::as_str)
            .filter(|id| !id.is_empty())
            .map(String::from);

        let tam = decode_tam(tam_value).map_err(|e| received(e, message_id.clone()))?;
        let message_id = Some(tam.message_id.clone());
        let reject = |error: BrokerError, stage: BrokerStage| {
            Rejection::new(error, stage, message_id.clone())
        };

        let verified = self
            .bounded(tam::verify_tam_value(tam_value, self.verifier.as_ref()))
            .await
            .map_err(|_| BrokerError::VerificationUnavailable {
                reason: format!("timeout after {}ms", self.backend_timeout.as_millis()),
            })
            .and_then(|r| r.map_err(BrokerError::from));
        verified.map_err(|e| reject(e, BrokerStage::Received))?;
        debug!(
            message_id = %tam.message_id,
            stage = %BrokerStage::SignatureChecked,
            "signature verified"
        );

        self.freshness
            .check_at(tam.issued_at, now)
            .map_err(|e| reject(e.into(), BrokerStage::SignatureChecked))?;

        if let Some(guard) = &self.replay {
            if !guard.check_and_record(&tam.message_id) {
                return Err(reject(
                    BrokerError::TamReplayed {
                        message_id: tam.message_id.clone(),
                    },
                    BrokerStage::SignatureChecked,
                ));
            }
        }
        debug!(message_id = %tam.message_id, stage = %BrokerStage::FreshnessChecked, "tam fresh");

        let input = PolicyInput::from_tam(&tam);
        let outcome = self
            .bounded(self.evaluator.evaluate(&input))
            .await
            .map_err(|_| BrokerError::PolicyBackendUnavailable {
                reason: format!("timeout after {}ms", self.backend_timeout.as_millis()),
            })
            .and_then(|r| r.map_err(BrokerError::from));

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                // The caller may retry the same TAM once the backend is back.
                if let Some(guard) = &self.replay {
                    guard.release(&tam.message_id);
                }
                return Err(reject(e, BrokerStage::FreshnessChecked));
            }
        };
        debug!(
            message_id = %tam.message_id,
            stage = %BrokerStage::PolicyEvaluated,
            allowed = outcome.allowed,
            "policy evaluated"
        );

        Ok(if outcome.allowed {
            DecisionRecord::allow(outcome.reason, now, self.decision_ttl_secs, message_id)
        } else {
            DecisionRecord::deny(outcome.reason, now, message_id)
        })
    }

    async fn bounded<F: Future>(&self, fut: F) -> Result<F::Output, tokio::time::error::Elapsed> {
        tokio::time::timeout(self.backend_timeout, fut).await
    }
}

fn decode_tam(value: &JsonValue) -> Result<TrustAssertionMessage, BrokerError> {
    if !value.is_object() {
        return Err(malformed("malformed_tam:not_an_object".to_string()));
    }
    // The signature block is judged by the verifier, not the decoder.
    let mut unsigned = value.clone();
    if let Some(members) = unsigned.as_object_mut() {
        members.remove(SIGNATURE_FIELD);
    }
    let tam: TrustAssertionMessage = serde_json::from_value(unsigned)
        .map_err(|e| malformed(format!("malformed_tam:{}", e)))?;
    tam.validate_structure()
        .map_err(|e| malformed(format!("malformed_tam:{}", e)))?;
    Ok(tam)
}

fn malformed(reason: String) -> BrokerError {
    BrokerError::MalformedRequest { reason }
}

fn received(error: BrokerError, message_id: Option<String>) -> Rejection {
    Rejection::new(error, BrokerStage::Received, message_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{EmbeddedRules, PolicyError, PolicyOutcome};
    use crate::signing::{LocalKeySigner, LocalKeyVerifier};
    use crate::tam::{sign_tam, Action, Device, Posture, Resource, Subject, TamBuilder};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use ed25519_dalek::SigningKey;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn signer() -> LocalKeySigner {
        LocalKeySigner::new(SigningKey::from_bytes(&[3u8; 32]))
    }

    fn broker_with(evaluator: Arc<dyn PolicyEvaluator>) -> Broker {
        let verifier = LocalKeyVerifier::from_verifying_key(signer().verifying_key());
        Broker::new(Arc::new(verifier), evaluator)
    }

    fn broker() -> Broker {
        broker_with(Arc::new(EmbeddedRules::default()))
    }

    fn tam_at(issued_at: DateTime<Utc>, compliant: bool) -> TrustAssertionMessage {
        scored_tam(issued_at, compliant, 20.0)
    }

    fn scored_tam(issued_at: DateTime<Utc>, compliant: bool, risk: f64) -> TrustAssertionMessage {
        TamBuilder::new("ztxp://pep.test")
            .issued_at(issued_at)
            .subject(Subject {
                id: "user:alice".into(),
                role: "authenticated".into(),
                groups: vec![],
            })
            .device(Device {
                id: "device:abc".into(),
                posture: Posture::compliant(compliant),
            })
            .resource(Resource {
                id: "app://notes/n-1".into(),
                action: Action::read("notes"),
            })
            .risk_score(risk)
            .build()
    }

    async fn envelope(tam: TrustAssertionMessage) -> Vec<u8> {
        let signed = sign_tam(tam, &signer()).await.unwrap();
        serde_json::to_vec(&json!({ "tam": signed })).unwrap()
    }

    struct Unreachable;

    #[async_trait]
    impl PolicyEvaluator for Unreachable {
        async fn evaluate(&self, _: &PolicyInput) -> Result<PolicyOutcome, PolicyError> {
            Err(PolicyError::BackendUnavailable {
                reason: "connection refused".into(),
            })
        }
    }

    struct Slow;

    #[async_trait]
    impl PolicyEvaluator for Slow {
        async fn evaluate(&self, _: &PolicyInput) -> Result<PolicyOutcome, PolicyError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(PolicyOutcome::allow("too late"))
        }
    }

    struct Counting(AtomicUsize);

    #[async_trait]
    impl PolicyEvaluator for Counting {
        async fn evaluate(&self, _: &PolicyInput) -> Result<PolicyOutcome, PolicyError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(PolicyOutcome::allow("counted"))
        }
    }

    #[tokio::test]
    async fn test_allow_carries_ttl_and_message_id() {
        let tam = tam_at(fixed_now(), true);
        let id = tam.message_id.clone();

        let record = broker()
            .evaluate_at(fixed_now(), &envelope(tam).await)
            .await
            .unwrap();
        assert!(record.is_allow());
        assert_eq!(record.expires_in(), 300);
        assert_eq!(record.message_id(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn test_policy_deny_is_a_decision() {
        let record = broker()
            .evaluate_at(fixed_now(), &envelope(tam_at(fixed_now(), false)).await)
            .await
            .unwrap();
        assert_eq!(record.decision(), Decision::Deny);
        assert!(record.reason().contains("non-compliant"));
        assert_eq!(record.expires_in(), 0);
    }

    #[tokio::test]
    async fn test_fractional_risk_scores_reach_policy() {
        let b = broker();
        let cases = [(20.5, true), (49.9, true), (-1.0, true), (50.0, false)];
        for (risk, allowed) in cases {
            let body = envelope(scored_tam(fixed_now(), true, risk)).await;
            let record = b.evaluate_at(fixed_now(), &body).await.unwrap();
            assert_eq!(record.is_allow(), allowed, "risk {}", risk);
        }
    }

    #[tokio::test]
    async fn test_envelope_errors() {
        let b = broker();

        let err = b.evaluate_at(fixed_now(), b"not json").await.unwrap_err();
        assert_eq!(err.reason_code(), "invalid_json");
        assert_eq!(err.status_code(), 400);

        let err = b.evaluate_at(fixed_now(), b"{}").await.unwrap_err();
        assert_eq!(err.reason_code(), "missing_tam");

        let err = b
            .evaluate_at(fixed_now(), br#"{"tam": null}"#)
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), "missing_tam");

        let err = b
            .evaluate_at(fixed_now(), br#"{"tam": "abc"}"#)
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), "malformed_tam:not_an_object");
    }

    #[tokio::test]
    async fn test_undecodable_tam_keeps_message_id() {
        let body = json!({"tam": {"message_id": "m-42", "version": "0.2"}});
        let err = broker()
            .evaluate_envelope_at(fixed_now(), &body)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.reason_code().starts_with("malformed_tam:"));
        assert_eq!(err.message_id.as_deref(), Some("m-42"));
    }

    #[tokio::test]
    async fn test_empty_subject_is_malformed() {
        let mut tam = tam_at(fixed_now(), true);
        tam.subject.id = String::new();
        let err = broker()
            .evaluate_at(fixed_now(), &envelope(tam).await)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.reason_code().contains("subject.id"));
    }

    #[tokio::test]
    async fn test_signature_checked_before_freshness() {
        let tam = tam_at(fixed_now() - ChronoDuration::hours(2), true);
        let mut value = serde_json::from_slice::<JsonValue>(&envelope(tam).await).unwrap();
        value["tam"]["context"]["risk_score"] = json!(1);

        let err = broker()
            .evaluate_envelope_at(fixed_now(), &value)
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), "signature_rejected:invalid_signature");
        assert_eq!(err.stage, BrokerStage::Received);
    }

    #[tokio::test]
    async fn test_undecodable_signature_block_is_a_signature_rejection() {
        let tam = tam_at(fixed_now(), true);
        let mut value = serde_json::from_slice::<JsonValue>(&envelope(tam).await).unwrap();

        let blocks = [
            json!({"alg": "EdDSA"}),
            json!("abc"),
            json!({"alg": 7, "key_id": []}),
        ];
        for block in blocks {
            value["tam"]["signature"] = block.clone();
            let err = broker()
                .evaluate_envelope_at(fixed_now(), &value)
                .await
                .unwrap_err();
            assert_eq!(err.status_code(), 403, "block {}", block);
            assert_eq!(err.reason_code(), "signature_rejected:malformed_signature");
            assert_eq!(err.stage, BrokerStage::Received);
            assert!(err.message_id.is_some());
        }
    }

    #[tokio::test]
    async fn test_unsigned_tam_is_a_signature_rejection() {
        let tam = tam_at(fixed_now(), true);
        let body = serde_json::to_vec(&json!({ "tam": tam })).unwrap();
        let err = broker().evaluate_at(fixed_now(), &body).await.unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert_eq!(err.reason_code(), "signature_rejected:missing_signature");
    }

    #[tokio::test]
    async fn test_freshness_boundaries() {
        let b = broker();
        let now = fixed_now();

        for (offset, expected) in [
            (-600, None),
            (-601, Some("tam_expired")),
            (59, None),
            (61, Some("tam_from_future")),
        ] {
            let tam = tam_at(now + ChronoDuration::seconds(offset), true);
            let result = b.evaluate_at(now, &envelope(tam).await).await;
            match expected {
                None => assert!(result.is_ok(), "offset {} rejected", offset),
                Some(reason) => {
                    let err = result.unwrap_err();
                    assert_eq!(err.reason_code(), reason, "offset {}", offset);
                    assert_eq!(err.status_code(), 403);
                    assert_eq!(err.stage, BrokerStage::SignatureChecked);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_policy_backend_error_fails_closed() {
        let b = broker_with(Arc::new(Unreachable));
        let outcome = b
            .evaluate_at(fixed_now(), &envelope(tam_at(fixed_now(), true)).await)
            .await;

        let response = BrokerResponse::from_outcome(outcome, fixed_now());
        assert_eq!(response.status, 500);
        assert_eq!(response.body.decision(), Decision::Deny);
        assert_eq!(response.body.reason(), "policy_backend_unavailable");
        assert_eq!(response.body.expires_in(), 0);
    }

    #[tokio::test]
    async fn test_slow_policy_backend_times_out() {
        let b = broker_with(Arc::new(Slow)).with_backend_timeout(Duration::from_millis(50));
        let err = b
            .evaluate_at(fixed_now(), &envelope(tam_at(fixed_now(), true)).await)
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), "policy_backend_unavailable");
        assert!(err.error.is_retryable());
    }

    #[tokio::test]
    async fn test_replay_guard_rejects_duplicates_when_enabled() {
        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        let b = broker_with(counting.clone())
            .with_replay_guard(ReplayGuard::new(Duration::from_secs(660)));
        let body = envelope(tam_at(fixed_now(), true)).await;

        assert!(b.evaluate_at(fixed_now(), &body).await.is_ok());
        let err = b.evaluate_at(fixed_now(), &body).await.unwrap_err();
        assert_eq!(err.reason_code(), "tam_replayed");
        assert_eq!(err.status_code(), 403);
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_replay_allowed_by_default() {
        let b = broker();
        let body = envelope(tam_at(fixed_now(), true)).await;
        assert!(b.evaluate_at(fixed_now(), &body).await.is_ok());
        assert!(b.evaluate_at(fixed_now(), &body).await.is_ok());
    }

    #[tokio::test]
    async fn test_backend_failure_releases_replay_entry() {
        let b = broker_with(Arc::new(Unreachable))
            .with_replay_guard(ReplayGuard::new(Duration::from_secs(660)));
        let body = envelope(tam_at(fixed_now(), true)).await;

        for _ in 0..2 {
            let err = b.evaluate_at(fixed_now(), &body).await.unwrap_err();
            assert_eq!(err.reason_code(), "policy_backend_unavailable");
        }
    }
}
