//! Client for an external policy decision point (OPA data API shape).

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use super::{PolicyError, PolicyEvaluator, PolicyInput, PolicyOutcome};
use crate::error::{transport_reason, ConfigError};

pub const DEFAULT_DECISION_PATH: &str = "/v1/data/authz/allow";

const REASON_ALLOW: &str = "policy_allow";
const REASON_DENY: &str = "policy_deny";

#[derive(Serialize)]
struct DecisionRequest<'a> {
    input: &'a PolicyInput,
}

/// Posts `{"input": <attributes>}` and reads `{"result": <bool>}`.
///
/// An absent or non-boolean `result` is a deny. Transport failures, non-2xx
/// replies and undecodable bodies are [`PolicyError::BackendUnavailable`].
#[derive(Debug, Clone)]
pub struct DelegatedEvaluator {
    client: reqwest::Client,
    decision_url: String,
}

impl DelegatedEvaluator {
    pub fn new(pdp_url: &str, decision_path: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let base = url::Url::parse(pdp_url).map_err(|e| ConfigError::Invalid {
            message: format!("invalid pdp url '{}': {}", pdp_url, e),
        })?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Invalid {
                message: format!("failed to build HTTP client: {}", e),
            })?;

        let path = if decision_path.starts_with('/') {
            decision_path.to_string()
        } else {
            format!("/{}", decision_path)
        };

        Ok(Self {
            client,
            decision_url: format!("{}{}", base.as_str().trim_end_matches('/'), path),
        })
    }

    pub fn decision_url(&self) -> &str {
        &self.decision_url
    }
}

#[async_trait]
impl PolicyEvaluator for DelegatedEvaluator {
    async fn evaluate(&self, input: &PolicyInput) -> Result<PolicyOutcome, PolicyError> {
        let response = self
            .client
            .post(&self.decision_url)
            .json(&DecisionRequest { input })
            .send()
            .await
            .map_err(|e| PolicyError::BackendUnavailable {
                reason: transport_reason(&e),
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, url = %self.decision_url, "pdp returned error status");
            return Err(PolicyError::BackendUnavailable {
                reason: format!("pdp returned HTTP {}", status.as_u16()),
            });
        }

        let body: JsonValue = response
            .json()
            .await
            .map_err(|e| PolicyError::BackendUnavailable {
                reason: format!("invalid pdp response: {}", transport_reason(&e)),
            })?;

        let allowed = body.get("result").and_then(JsonValue::as_bool);
        debug!(result = ?allowed, "pdp decision");

        Ok(match allowed {
            Some(true) => PolicyOutcome::allow(REASON_ALLOW),
            _ => PolicyOutcome::deny(REASON_DENY),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_url_joins_path() {
        let evaluator = DelegatedEvaluator::new(
            "http://opa:8181/",
            "v1/data/authz/allow",
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(evaluator.decision_url(), "http://opa:8181/v1/data/authz/allow");
    }

    #[test]
    fn test_invalid_url_is_config_error() {
        assert!(
            DelegatedEvaluator::new("::", DEFAULT_DECISION_PATH, Duration::from_secs(1)).is_err()
        );
    }
}
