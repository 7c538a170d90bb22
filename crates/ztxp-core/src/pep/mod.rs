//! Policy Enforcement Point.
//!
//! Turns an inbound request into a signed TAM, asks a broker for a decision
//! and reduces the answer to allow/deny plus an audit context. Every failure
//! along the way resolves to deny.

mod client;
mod headers;
mod identity;
mod request;

pub use client::{
    build_broker_client, BrokerClient, BrokerClientError, HttpBrokerClient, EVALUATE_PATH,
};
pub use headers::{
    is_sensitive, strip_sensitive_headers, DeviceSignals, DEVICE_COMPLIANT_HEADER,
    DEVICE_ID_HEADER, DEVICE_TRUST_HEADER, SENSITIVE_HEADER_NAMES,
};
pub use identity::{GatewayAttestedBearer, Identity, IdentitySource, ANONYMOUS_PRINCIPAL};
pub use request::InboundRequest;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::broker::{Decision, DecisionRecord};
use crate::config::{PepConfig, ZtxpConfig};
use crate::signing::Signer;
use crate::tam::{
    sign_tam, Action, ActionClass, AssertionContext, Device, Posture, Resource, Subject,
    TamBuilder, TrustAssertionMessage,
};

pub const REASON_SIGNING_FAILED: &str = "signing_failed";
pub const REASON_BROKER_UNREACHABLE: &str = "broker_unreachable";
pub const REASON_BROKER_RESPONSE_INVALID: &str = "broker_response_invalid";

const DEFAULT_SOURCE_IP: &str = "0.0.0.0";

/// Gateway-facing outcome: `{"isAuthorized", "context": {"principalId",
/// "ztxp_decision", "ztxp_reason", "ztxp_message_id"}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationResult {
    #[serde(rename = "isAuthorized")]
    pub is_authorized: bool,
    pub context: AuditContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    #[serde(rename = "principalId")]
    pub principal_id: String,
    pub ztxp_decision: String,
    pub ztxp_reason: String,
    pub ztxp_message_id: String,
}

impl AuthorizationResult {
    fn from_record(tam: &TrustAssertionMessage, record: &DecisionRecord) -> Self {
        Self {
            is_authorized: record.is_allow(),
            context: AuditContext {
                principal_id: tam.subject.id.clone(),
                ztxp_decision: record.decision().as_str().to_string(),
                ztxp_reason: record.reason().to_string(),
                ztxp_message_id: tam.message_id.clone(),
            },
        }
    }

    fn denied(tam: &TrustAssertionMessage, reason: &str) -> Self {
        Self {
            is_authorized: false,
            context: AuditContext {
                principal_id: tam.subject.id.clone(),
                ztxp_decision: Decision::Deny.as_str().to_string(),
                ztxp_reason: reason.to_string(),
                ztxp_message_id: tam.message_id.clone(),
            },
        }
    }
}

pub struct Pep {
    config: PepConfig,
    identity: Arc<dyn IdentitySource>,
    signer: Arc<dyn Signer>,
    broker: Arc<dyn BrokerClient>,
    signing_timeout: Duration,
    broker_timeout: Duration,
}

impl std::fmt::Debug for Pep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pep")
            .field("issuer", &self.config.issuer)
            .field("verified_by", &self.identity.verified_by())
            .field("key_id", &self.signer.key_id())
            .finish_non_exhaustive()
    }
}

impl Pep {
    pub fn new(
        config: PepConfig,
        identity: Arc<dyn IdentitySource>,
        signer: Arc<dyn Signer>,
        broker: Arc<dyn BrokerClient>,
    ) -> Self {
        let broker_timeout = Duration::from_millis(config.broker_timeout_ms);
        Self {
            config,
            identity,
            signer,
            broker,
            signing_timeout: Duration::from_secs(3),
            broker_timeout,
        }
    }

    /// PEP using the gateway-attested bearer identity source.
    pub fn from_config(
        config: &ZtxpConfig,
        signer: Arc<dyn Signer>,
        broker: Arc<dyn BrokerClient>,
    ) -> Self {
        let identity = Arc::new(GatewayAttestedBearer::new(
            config.pep.identity_verified_by.clone(),
        ));
        Self::new(config.pep.clone(), identity, signer, broker)
            .with_signing_timeout(Duration::from_millis(config.signing.timeout_ms))
    }

    pub fn with_signing_timeout(mut self, timeout: Duration) -> Self {
        self.signing_timeout = timeout;
        self
    }

    pub fn with_broker_timeout(mut self, timeout: Duration) -> Self {
        self.broker_timeout = timeout;
        self
    }

    /// Unsigned TAM describing `request`.
    pub fn build_tam(&self, request: &InboundRequest) -> TrustAssertionMessage {
        self.build_tam_at(Utc::now(), request)
    }

    pub fn build_tam_at(
        &self,
        now: DateTime<Utc>,
        request: &InboundRequest,
    ) -> TrustAssertionMessage {
        let identity = self.identity.identify(request);
        let device = DeviceSignals::from_request(request, self.config.missing_device_signal);

        let role = if identity.is_anonymous() {
            "anonymous"
        } else {
            "authenticated"
        };

        let source_ip = if request.source_ip.is_empty() {
            DEFAULT_SOURCE_IP.to_string()
        } else {
            request.source_ip.clone()
        };

        TamBuilder::new(self.config.issuer.clone())
            .issued_at(now)
            .subject(Subject {
                id: format!("user:{}", identity.principal),
                role: role.to_string(),
                groups: identity.groups,
            })
            .device(Device {
                id: format!("device:{}", device.id),
                posture: Posture::compliant(device.compliant),
            })
            .resource(Resource {
                id: format!("{}{}", self.config.resource_prefix, request.path),
                action: Action::new(
                    self.config.action_namespace.clone(),
                    ActionClass::from_http_method(&request.method),
                ),
            })
            .context(AssertionContext {
                risk_score: self.config.risk_score,
                device_trust: device.trust,
                source_ip,
                session_id: request.request_id.clone(),
            })
            .build()
    }

    /// Decide `request`. Never fails: every error path is a deny.
    pub async fn authorize(&self, request: &InboundRequest) -> AuthorizationResult {
        debug!(
            method = %request.method,
            path = %request.path,
            headers = ?strip_sensitive_headers(&request.headers),
            "pep invoked"
        );

        let tam = self.build_tam(request);

        let signing = sign_tam(tam.clone(), self.signer.as_ref());
        let signed = match tokio::time::timeout(self.signing_timeout, signing).await {
            Ok(Ok(signed)) => signed,
            Ok(Err(e)) => {
                error!(message_id = %tam.message_id, error = %e, "tam signing failed");
                return AuthorizationResult::denied(&tam, REASON_SIGNING_FAILED);
            }
            Err(_) => {
                error!(
                    message_id = %tam.message_id,
                    timeout_ms = self.signing_timeout.as_millis() as u64,
                    "tam signing timed out"
                );
                return AuthorizationResult::denied(&tam, REASON_SIGNING_FAILED);
            }
        };

        let deciding = self.broker.decide(&signed);
        let result = match tokio::time::timeout(self.broker_timeout, deciding).await {
            Ok(Ok(record)) => AuthorizationResult::from_record(&signed, &record),
            Ok(Err(BrokerClientError::Unreachable { reason })) => {
                error!(message_id = %signed.message_id, reason = %reason, "broker call failed");
                AuthorizationResult::denied(&signed, REASON_BROKER_UNREACHABLE)
            }
            Ok(Err(BrokerClientError::InvalidResponse { reason })) => {
                error!(
                    message_id = %signed.message_id,
                    reason = %reason,
                    "broker reply not a decision"
                );
                AuthorizationResult::denied(&signed, REASON_BROKER_RESPONSE_INVALID)
            }
            Err(_) => {
                warn!(
                    message_id = %signed.message_id,
                    timeout_ms = self.broker_timeout.as_millis() as u64,
                    "broker call timed out"
                );
                AuthorizationResult::denied(&signed, REASON_BROKER_UNREACHABLE)
            }
        };

        info!(
            principal = %result.context.principal_id,
            message_id = %result.context.ztxp_message_id,
            decision = %result.context.ztxp_decision,
            reason = %result.context.ztxp_reason,
            "pep decision"
        );
        result
    }
}
