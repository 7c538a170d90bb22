//! Policy evaluation over a normalized attribute bag.
//!
//! The broker depends only on [`PolicyEvaluator`]; the embedded rules and the
//! delegated PDP client are interchangeable.

mod delegated;
mod embedded;

pub use delegated::{DelegatedEvaluator, DEFAULT_DECISION_PATH};
pub use embedded::{EmbeddedRules, DEFAULT_RISK_THRESHOLD};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{PolicyBackend, PolicyConfig};
use crate::error::ConfigError;
use crate::tam::TrustAssertionMessage;

/// Attribute bag handed to the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyInput {
    pub action: String,
    pub principal: Principal,
    pub resource: String,
    pub context: PolicyContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub role: String,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyContext {
    pub device_trust: String,
    #[serde(serialize_with = "crate::tam::serialize_risk_score")]
    pub risk_score: f64,
    pub compliant: bool,
}

impl PolicyInput {
    pub fn from_tam(tam: &TrustAssertionMessage) -> Self {
        Self {
            action: tam.resource.action.to_string(),
            principal: Principal {
                id: tam.subject.id.clone(),
                role: tam.subject.role.clone(),
                groups: tam.subject.groups.clone(),
            },
            resource: tam.resource.id.clone(),
            context: PolicyContext {
                device_trust: tam.context.device_trust.clone(),
                risk_score: tam.context.risk_score,
                compliant: tam.device.posture.compliant,
            },
        }
    }
}

/// Evaluator verdict. A deny here is a decision, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyOutcome {
    pub allowed: bool,
    pub reason: String,
}

impl PolicyOutcome {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PolicyError {
    /// Transport failure, timeout, or unreadable reply from the PDP.
    #[error("policy backend unavailable: {reason}")]
    BackendUnavailable { reason: String },
}

#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    async fn evaluate(&self, input: &PolicyInput) -> Result<PolicyOutcome, PolicyError>;
}

/// Build the configured evaluator.
pub fn build_evaluator(config: &PolicyConfig) -> Result<Arc<dyn PolicyEvaluator>, ConfigError> {
    match config.backend {
        PolicyBackend::Embedded => Ok(Arc::new(EmbeddedRules::new(config.risk_threshold))),
        PolicyBackend::Delegated => {
            let pdp_url = config
                .pdp_url
                .as_deref()
                .filter(|u| !u.is_empty())
                .ok_or_else(|| ConfigError::Invalid {
                    message: "policy.pdp_url (ZTXP_PDP_URL) is required for the delegated backend"
                        .to_string(),
                })?;
            let evaluator = DelegatedEvaluator::new(
                pdp_url,
                &config.decision_path,
                Duration::from_millis(config.timeout_ms),
            )?;
            Ok(Arc::new(evaluator))
        }
    }
}
