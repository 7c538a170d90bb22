//! Transport from the enforcement point to a broker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::broker::{Broker, DecisionRecord};
use crate::config::PepConfig;
use crate::error::{transport_reason, ConfigError};
use crate::tam::TrustAssertionMessage;

pub const EVALUATE_PATH: &str = "/ztxp/evaluate";

#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerClientError {
    #[error("broker unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("broker response invalid: {reason}")]
    InvalidResponse { reason: String },
}

/// Obtains a decision for a signed TAM.
///
/// Rejections come back as deny records; only transport problems are errors.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn decide(
        &self,
        tam: &TrustAssertionMessage,
    ) -> Result<DecisionRecord, BrokerClientError>;
}

/// In-process broker.
#[async_trait]
impl BrokerClient for Broker {
    async fn decide(
        &self,
        tam: &TrustAssertionMessage,
    ) -> Result<DecisionRecord, BrokerClientError> {
        let value = tam
            .to_value()
            .map_err(|e| BrokerClientError::InvalidResponse {
                reason: format!("tam not serializable: {}", e),
            })?;

        let now = Utc::now();
        Ok(match self.evaluate_tam_value_at(now, &value).await {
            Ok(record) => record,
            Err(rejection) => rejection.to_record(now),
        })
    }
}

/// Broker reached over HTTP.
///
/// The broker reports rejections as deny bodies with 4xx/5xx statuses, so a
/// deny is accepted under any status. An allow counts only under 2xx.
#[derive(Debug, Clone)]
pub struct HttpBrokerClient {
    client: reqwest::Client,
    evaluate_url: String,
}

impl HttpBrokerClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let base = url::Url::parse(base_url).map_err(|e| ConfigError::Invalid {
            message: format!("invalid broker url '{}': {}", base_url, e),
        })?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Invalid {
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            evaluate_url: format!("{}{}", base.as_str().trim_end_matches('/'), EVALUATE_PATH),
        })
    }

    pub fn evaluate_url(&self) -> &str {
        &self.evaluate_url
    }
}

#[async_trait]
impl BrokerClient for HttpBrokerClient {
    async fn decide(
        &self,
        tam: &TrustAssertionMessage,
    ) -> Result<DecisionRecord, BrokerClientError> {
        let response = self
            .client
            .post(&self.evaluate_url)
            .json(&json!({ "tam": tam }))
            .send()
            .await
            .map_err(|e| BrokerClientError::Unreachable {
                reason: transport_reason(&e),
            })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| BrokerClientError::Unreachable {
                reason: transport_reason(&e),
            })?;

        let record: DecisionRecord =
            serde_json::from_slice(&body).map_err(|e| BrokerClientError::InvalidResponse {
                reason: format!("HTTP {}: {}", status.as_u16(), e),
            })?;

        if record.is_allow() && !status.is_success() {
            return Err(BrokerClientError::InvalidResponse {
                reason: format!("HTTP {}: allow on a non-success status", status.as_u16()),
            });
        }
        Ok(record)
    }
}

/// Remote client when `pep.broker_url` is set, otherwise `local`.
pub fn build_broker_client(
    config: &PepConfig,
    local: Arc<Broker>,
) -> Result<Arc<dyn BrokerClient>, ConfigError> {
    match config.broker_url.as_deref().filter(|u| !u.is_empty()) {
        Some(url) => Ok(Arc::new(HttpBrokerClient::new(
            url,
            Duration::from_millis(config.broker_timeout_ms),
        )?)),
        None => Ok(local),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate_url() {
        let client = HttpBrokerClient::new("http://broker:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.evaluate_url(), "http://broker:8080/ztxp/evaluate");
    }

    #[test]
    fn test_rejects_bad_url() {
        assert!(HttpBrokerClient::new("broker", Duration::from_secs(1)).is_err());
    }
}
