use std::fmt;

use chrono::{DateTime, Utc};

use super::decision::DecisionRecord;
use crate::error::BrokerError;

/// Pipeline state; see [`super::Broker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerStage {
    Received,
    SignatureChecked,
    FreshnessChecked,
    PolicyEvaluated,
    Decided,
}

impl BrokerStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::SignatureChecked => "signature_checked",
            Self::FreshnessChecked => "freshness_checked",
            Self::PolicyEvaluated => "policy_evaluated",
            Self::Decided => "decided",
        }
    }
}

impl fmt::Display for BrokerStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Early exit from the pipeline.
///
/// `stage` is the last state reached before the failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("rejected at {stage}: {error}")]
pub struct Rejection {
    pub error: BrokerError,
    pub stage: BrokerStage,
    pub message_id: Option<String>,
}

impl Rejection {
    pub fn new(error: BrokerError, stage: BrokerStage, message_id: Option<String>) -> Self {
        Self {
            error,
            stage,
            message_id,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.error.status_code()
    }

    pub fn reason_code(&self) -> String {
        self.error.reason_code()
    }

    /// Deny record carried in the body of every non-200 response.
    pub fn to_record(&self, now: DateTime<Utc>) -> DecisionRecord {
        DecisionRecord::deny(self.reason_code(), now, self.message_id.clone())
    }
}

/// Wire response: HTTP-equivalent status plus a decision body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerResponse {
    pub status: u16,
    pub body: DecisionRecord,
}

impl BrokerResponse {
    pub fn from_outcome(outcome: Result<DecisionRecord, Rejection>, now: DateTime<Utc>) -> Self {
        match outcome {
            Ok(record) => Self {
                status: 200,
                body: record,
            },
            Err(rejection) => Self {
                status: rejection.status_code(),
                body: rejection.to_record(now),
            },
        }
    }
}
