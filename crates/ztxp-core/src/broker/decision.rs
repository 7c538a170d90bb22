use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tam::timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

/// Broker output.
///
/// Not a credential: `expires_in` bounds how long a caller may cache the
/// decision. Allow records always carry `expires_in > 0`, deny records
/// always `0`; the constructors and the decoder both enforce this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireRecord")]
pub struct DecisionRecord {
    decision: Decision,
    reason: String,
    #[serde(with = "crate::tam::timestamp")]
    evaluated_at: DateTime<Utc>,
    expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
}

impl DecisionRecord {
    /// Allow record; a zero TTL is raised to one second.
    pub fn allow(
        reason: impl Into<String>,
        evaluated_at: DateTime<Utc>,
        ttl_secs: u64,
        message_id: Option<String>,
    ) -> Self {
        Self {
            decision: Decision::Allow,
            reason: reason.into(),
            evaluated_at: timestamp::truncate(evaluated_at),
            expires_in: ttl_secs.max(1),
            message_id,
        }
    }

    pub fn deny(
        reason: impl Into<String>,
        evaluated_at: DateTime<Utc>,
        message_id: Option<String>,
    ) -> Self {
        Self {
            decision: Decision::Deny,
            reason: reason.into(),
            evaluated_at: timestamp::truncate(evaluated_at),
            expires_in: 0,
            message_id,
        }
    }

    pub fn decision(&self) -> Decision {
        self.decision
    }

    pub fn is_allow(&self) -> bool {
        self.decision == Decision::Allow
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn evaluated_at(&self) -> DateTime<Utc> {
        self.evaluated_at
    }

    pub fn expires_in(&self) -> u64 {
        self.expires_in
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }
}

#[derive(Deserialize)]
struct WireRecord {
    decision: Decision,
    #[serde(default)]
    reason: String,
    #[serde(with = "crate::tam::timestamp")]
    evaluated_at: DateTime<Utc>,
    expires_in: u64,
    #[serde(default)]
    message_id: Option<String>,
}

impl TryFrom<WireRecord> for DecisionRecord {
    type Error = String;

    fn try_from(wire: WireRecord) -> Result<Self, Self::Error> {
        match (wire.decision, wire.expires_in) {
            (Decision::Allow, 0) => Err("allow decision with expires_in 0".to_string()),
            (Decision::Deny, n) if n != 0 => Err(format!("deny decision with expires_in {}", n)),
            _ => Ok(Self {
                decision: wire.decision,
                reason: wire.reason,
                evaluated_at: wire.evaluated_at,
                expires_in: wire.expires_in,
                message_id: wire.message_id,
            }),
        }
    }
}
