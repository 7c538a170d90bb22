use chrono::{DateTime, Utc};

use super::timestamp;
use super::types::{
    Action, AssertionContext, Device, Posture, Resource, Subject, TrustAssertionMessage,
    DEFAULT_RISK_SCORE, PROTOCOL_VERSION, UNKNOWN_DEVICE_TRUST,
};

/// Builder for unsigned TAMs.
///
/// Defaults: current protocol version, fresh UUID v4 `message_id`,
/// `issued_at` = now (whole seconds), non-compliant unknown device, risk 100.
#[derive(Debug, Clone)]
pub struct TamBuilder {
    tam: TrustAssertionMessage,
}

impl TamBuilder {
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            tam: TrustAssertionMessage {
                version: PROTOCOL_VERSION.to_string(),
                message_id: uuid::Uuid::new_v4().to_string(),
                issued_at: timestamp::truncate(Utc::now()),
                issuer: issuer.into(),
                subject: Subject {
                    id: String::new(),
                    role: String::new(),
                    groups: Vec::new(),
                },
                device: Device {
                    id: String::new(),
                    posture: Posture::default(),
                },
                resource: Resource {
                    id: String::new(),
                    action: Action::read(""),
                },
                context: AssertionContext {
                    risk_score: DEFAULT_RISK_SCORE,
                    device_trust: UNKNOWN_DEVICE_TRUST.to_string(),
                    source_ip: String::new(),
                    session_id: String::new(),
                },
                signature: None,
            },
        }
    }

    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.tam.message_id = id.into();
        self
    }

    pub fn issued_at(mut self, at: DateTime<Utc>) -> Self {
        self.tam.issued_at = timestamp::truncate(at);
        self
    }

    pub fn subject(mut self, subject: Subject) -> Self {
        self.tam.subject = subject;
        self
    }

    pub fn device(mut self, device: Device) -> Self {
        self.tam.device = device;
        self
    }

    pub fn resource(mut self, resource: Resource) -> Self {
        self.tam.resource = resource;
        self
    }

    pub fn context(mut self, context: AssertionContext) -> Self {
        self.tam.context = context;
        self
    }

    pub fn risk_score(mut self, score: f64) -> Self {
        self.tam.context.risk_score = score;
        self
    }

    pub fn build(self) -> TrustAssertionMessage {
        self.tam
    }
}
