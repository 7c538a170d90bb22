//! End-to-end flows: PEP mints and signs, broker verifies and decides.
//!
//! Everything runs in-process with a fixed Ed25519 key and embedded rules.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Duration, TimeZone, Utc};
use ed25519_dalek::SigningKey;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use ztxp_core::config::PepConfig;
use ztxp_core::pep::GatewayAttestedBearer;
use ztxp_core::{
    sign_tam, Broker, BrokerClient, BrokerResponse, BrokerStage, EmbeddedRules, InboundRequest,
    LocalKeySigner, LocalKeyVerifier, MissingDeviceSignal, Pep, ReplayGuard, TrustAssertionMessage,
};

fn key() -> SigningKey {
    SigningKey::from_bytes(&[11u8; 32])
}

fn broker() -> Broker {
    Broker::new(
        Arc::new(LocalKeyVerifier::from_verifying_key(key().verifying_key())),
        Arc::new(EmbeddedRules::default()),
    )
}

fn pep_with(config: PepConfig, broker: Arc<dyn BrokerClient>) -> Pep {
    Pep::new(
        config,
        Arc::new(GatewayAttestedBearer::new("api-gateway")),
        Arc::new(LocalKeySigner::new(key())),
        broker,
    )
}

fn pep(risk_score: f64) -> Pep {
    let config = PepConfig {
        risk_score,
        ..PepConfig::default()
    };
    pep_with(config, Arc::new(broker()))
}

fn bearer(sub: &str) -> String {
    let token = encode(
        &Header::default(),
        &json!({ "sub": sub, "cognito:groups": ["writer"] }),
        &EncodingKey::from_secret(b"gateway-secret"),
    )
    .unwrap();
    format!("Bearer {}", token)
}

fn request(compliant: Option<&str>) -> InboundRequest {
    let mut req = InboundRequest::new("GET", "/notes/n-1")
        .with_header("Authorization", bearer("alice"))
        .with_header("x-device-id", "laptop-7")
        .with_header("x-device-trust", "managed")
        .with_source_ip("10.0.0.5")
        .with_request_id("req-1");
    if let Some(value) = compliant {
        req = req.with_header("x-device-compliant", value);
    }
    req
}

fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

async fn signed_tam(
    pep: &Pep,
    req: &InboundRequest,
    issued_at: DateTime<Utc>,
) -> TrustAssertionMessage {
    let tam = pep.build_tam_at(issued_at, req);
    sign_tam(tam, &LocalKeySigner::new(key())).await.unwrap()
}

fn envelope(tam: &Value) -> Vec<u8> {
    serde_json::to_vec(&json!({ "tam": tam })).unwrap()
}

#[tokio::test]
async fn test_compliant_low_risk_is_allowed() {
    let pep = pep(20.0);
    let result = pep.authorize(&request(Some("true"))).await;

    assert!(result.is_authorized);
    assert_eq!(result.context.principal_id, "user:alice");
    assert_eq!(result.context.ztxp_decision, "allow");
    assert_eq!(result.context.ztxp_reason, "low risk and compliant");
    assert!(!result.context.ztxp_message_id.is_empty());

    // same TAM straight through the broker carries the decision ttl
    let tam = signed_tam(&pep, &request(Some("true")), fixed_now()).await;
    let record = broker()
        .evaluate_at(fixed_now(), &envelope(&tam.to_value().unwrap()))
        .await
        .unwrap();
    assert_eq!(record.expires_in(), 300);
    assert_eq!(record.message_id(), Some(tam.message_id.as_str()));
}

#[tokio::test]
async fn test_non_compliant_device_is_denied() {
    let result = pep(20.0).authorize(&request(Some("false"))).await;

    assert!(!result.is_authorized);
    assert_eq!(result.context.ztxp_decision, "deny");
    assert_eq!(result.context.ztxp_reason, "non-compliant device");
}

#[tokio::test]
async fn test_high_risk_and_non_compliant_lists_both() {
    let result = pep(80.0).authorize(&request(Some("false"))).await;

    assert!(!result.is_authorized);
    assert_eq!(result.context.ztxp_reason, "high risk, non-compliant device");
}

#[tokio::test]
async fn test_fractional_risk_scores_survive_the_wire() {
    for (risk, allowed) in [(20.5, true), (49.9, true), (50.0, false)] {
        let result = pep(risk).authorize(&request(Some("true"))).await;
        assert_eq!(result.is_authorized, allowed, "risk {}", risk);

        let tam = signed_tam(&pep(risk), &request(Some("true")), fixed_now()).await;
        let record = broker()
            .evaluate_at(fixed_now(), &envelope(&tam.to_value().unwrap()))
            .await
            .unwrap();
        assert_eq!(record.is_allow(), allowed, "risk {}", risk);
    }
}

#[tokio::test]
async fn test_tampered_signature_is_rejected() {
    let pep = pep(20.0);
    let tam = signed_tam(&pep, &request(Some("true")), fixed_now()).await;

    let mut value = tam.to_value().unwrap();
    let sig = value["signature"]["sig"].as_str().unwrap().to_string();
    let mut bytes = BASE64.decode(sig).unwrap();
    bytes[0] ^= 0x01;
    value["signature"]["sig"] = Value::String(BASE64.encode(&bytes));

    let rejection = broker()
        .evaluate_at(fixed_now(), &envelope(&value))
        .await
        .unwrap_err();

    assert_eq!(rejection.status_code(), 403);
    assert!(rejection.reason_code().starts_with("signature_rejected"));
    assert_eq!(rejection.stage, BrokerStage::Received);
}

#[tokio::test]
async fn test_tampered_claim_is_rejected() {
    let pep = pep(20.0);
    let tam = signed_tam(&pep, &request(Some("false")), fixed_now()).await;

    let mut value = tam.to_value().unwrap();
    value["device"]["posture"]["compliant"] = Value::Bool(true);

    let rejection = broker()
        .evaluate_at(fixed_now(), &envelope(&value))
        .await
        .unwrap_err();
    assert_eq!(rejection.reason_code(), "signature_rejected:invalid_signature");
}

#[tokio::test]
async fn test_missing_compliance_header_defaults_to_non_compliant() {
    let pep = pep(20.0);
    let req = request(None);

    let tam = pep.build_tam_at(fixed_now(), &req);
    assert!(!tam.device.posture.compliant);

    let result = pep.authorize(&req).await;
    assert!(!result.is_authorized);
    assert_eq!(result.context.ztxp_reason, "non-compliant device");
}

#[tokio::test]
async fn test_missing_compliance_header_can_be_assumed_compliant() {
    let config = PepConfig {
        risk_score: 20.0,
        missing_device_signal: MissingDeviceSignal::AssumeCompliant,
        ..PepConfig::default()
    };
    let result = pep_with(config, Arc::new(broker()))
        .authorize(&request(None))
        .await;
    assert!(result.is_authorized);
}

#[tokio::test]
async fn test_freshness_boundaries() {
    let pep = pep(20.0);
    let now = fixed_now();
    let cases = [
        (-600, None),
        (-601, Some("tam_expired")),
        (59, None),
        (60, None),
        (61, Some("tam_from_future")),
    ];

    for (offset, expected) in cases {
        let tam = signed_tam(&pep, &request(Some("true")), now + Duration::seconds(offset)).await;
        let outcome = broker()
            .evaluate_at(now, &envelope(&tam.to_value().unwrap()))
            .await;

        match expected {
            None => assert!(outcome.is_ok(), "offset {} rejected", offset),
            Some(reason) => {
                let rejection = outcome.unwrap_err();
                assert_eq!(rejection.reason_code(), reason, "offset {}", offset);
                assert_eq!(rejection.stage, BrokerStage::SignatureChecked);
            }
        }
    }
}

#[tokio::test]
async fn test_replay_is_rejected_when_enabled() {
    let pep = pep(20.0);
    let broker = broker().with_replay_guard(ReplayGuard::new(std::time::Duration::from_secs(660)));
    let tam = signed_tam(&pep, &request(Some("true")), fixed_now()).await;
    let body = envelope(&tam.to_value().unwrap());

    assert!(broker.evaluate_at(fixed_now(), &body).await.is_ok());

    let outcome = broker.evaluate_at(fixed_now(), &body).await;
    let response = BrokerResponse::from_outcome(outcome, fixed_now());
    assert_eq!(response.status, 403);
    assert_eq!(response.body.reason(), "tam_replayed");
}

#[tokio::test]
async fn test_replay_is_accepted_when_disabled() {
    let pep = pep(20.0);
    let broker = broker();
    let tam = signed_tam(&pep, &request(Some("true")), fixed_now()).await;
    let body = envelope(&tam.to_value().unwrap());

    assert!(broker.evaluate_at(fixed_now(), &body).await.is_ok());
    assert!(broker.evaluate_at(fixed_now(), &body).await.is_ok());
}

#[tokio::test]
async fn test_untrusted_signer_is_rejected() {
    let pep = pep(20.0);
    let tam = pep.build_tam_at(fixed_now(), &request(Some("true")));
    let foreign = SigningKey::from_bytes(&[12u8; 32]);
    let signed = sign_tam(tam, &LocalKeySigner::new(foreign)).await.unwrap();

    let rejection = broker()
        .evaluate_at(fixed_now(), &envelope(&signed.to_value().unwrap()))
        .await
        .unwrap_err();
    assert_eq!(rejection.status_code(), 403);
    assert!(rejection.reason_code().starts_with("signature_rejected"));
}
