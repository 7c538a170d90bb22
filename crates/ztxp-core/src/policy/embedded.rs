use async_trait::async_trait;

use super::{PolicyError, PolicyEvaluator, PolicyInput, PolicyOutcome};

/// Default risk threshold: scores at or above it are denied.
pub const DEFAULT_RISK_THRESHOLD: f64 = 50.0;

/// In-process rules: allow iff `risk_score < threshold` and the device is
/// compliant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmbeddedRules {
    risk_threshold: f64,
}

impl EmbeddedRules {
    pub fn new(risk_threshold: f64) -> Self {
        Self { risk_threshold }
    }

    pub fn decide(&self, input: &PolicyInput) -> PolicyOutcome {
        let mut failed = Vec::new();
        if input.context.risk_score >= self.risk_threshold {
            failed.push("high risk");
        }
        if !input.context.compliant {
            failed.push("non-compliant device");
        }

        if failed.is_empty() {
            PolicyOutcome::allow("low risk and compliant")
        } else {
            PolicyOutcome::deny(failed.join(", "))
        }
    }
}

impl Default for EmbeddedRules {
    fn default() -> Self {
        Self::new(DEFAULT_RISK_THRESHOLD)
    }
}

#[async_trait]
impl PolicyEvaluator for EmbeddedRules {
    async fn evaluate(&self, input: &PolicyInput) -> Result<PolicyOutcome, PolicyError> {
        Ok(self.decide(input))
    }
}
