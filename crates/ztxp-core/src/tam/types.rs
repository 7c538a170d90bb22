//! Trust Assertion Message wire types.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::signing::SignatureBlock;

/// Protocol version minted by this implementation.
pub const PROTOCOL_VERSION: &str = "0.2";

/// Risk score assumed when a TAM omits one.
pub const DEFAULT_RISK_SCORE: f64 = 100.0;

/// Device trust label assumed when none is supplied.
pub const UNKNOWN_DEVICE_TRUST: &str = "unknown";

/// A signed, time-bounded claim about who is asking, from which device, for
/// what action on which resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustAssertionMessage {
    pub version: String,

    /// Correlation id echoed in decisions and audit records.
    pub message_id: String,

    #[serde(with = "super::timestamp")]
    pub issued_at: DateTime<Utc>,

    pub issuer: String,

    pub subject: Subject,

    pub device: Device,

    pub resource: Resource,

    pub context: AssertionContext,

    /// Attached last; never part of the signing payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureBlock>,
}

/// Authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,

    #[serde(default)]
    pub role: String,

    #[serde(default)]
    pub groups: Vec<String>,
}

/// Client device attestation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,

    #[serde(default)]
    pub posture: Posture,
}

/// Device posture. `compliant` is the only attribute the core interprets;
/// any others are carried (and signed) as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Posture {
    /// Missing on the wire means not compliant.
    #[serde(default)]
    pub compliant: bool,

    #[serde(flatten)]
    pub attributes: BTreeMap<String, JsonValue>,
}

impl Posture {
    pub fn compliant(compliant: bool) -> Self {
        Self {
            compliant,
            attributes: BTreeMap::new(),
        }
    }
}

/// Target resource and requested operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub action: Action,
}

/// Situational signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionContext {
    #[serde(
        default = "default_risk_score",
        serialize_with = "serialize_risk_score"
    )]
    pub risk_score: f64,

    #[serde(default = "default_device_trust")]
    pub device_trust: String,

    #[serde(default)]
    pub source_ip: String,

    #[serde(default)]
    pub session_id: String,
}

fn default_risk_score() -> f64 {
    DEFAULT_RISK_SCORE
}

/// Whole scores go out as JSON integers (`20`, not `20.0`).
pub(crate) fn serialize_risk_score<S: Serializer>(
    score: &f64,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;
    if score.fract() == 0.0 && score.abs() < MAX_EXACT {
        serializer.serialize_i64(*score as i64)
    } else {
        serializer.serialize_f64(*score)
    }
}

fn default_device_trust() -> String {
    UNKNOWN_DEVICE_TRUST.to_string()
}

/// Operation class of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActionClass {
    Read,
    Write,
}

impl ActionClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "Read",
            Self::Write => "Write",
        }
    }

    /// Classify an HTTP method: mutating verbs are writes.
    pub fn from_http_method(method: &str) -> Self {
        match method.to_ascii_uppercase().as_str() {
            "POST" | "PUT" | "PATCH" | "DELETE" => Self::Write,
            _ => Self::Read,
        }
    }
}

/// Requested action, `<namespace>:<Read|Write>` on the wire (e.g. `notes:Read`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Action {
    pub namespace: String,
    pub class: ActionClass,
}

impl Action {
    pub fn new(namespace: impl Into<String>, class: ActionClass) -> Self {
        Self {
            namespace: namespace.into(),
            class,
        }
    }

    pub fn read(namespace: impl Into<String>) -> Self {
        Self::new(namespace, ActionClass::Read)
    }

    pub fn write(namespace: impl Into<String>) -> Self {
        Self::new(namespace, ActionClass::Write)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.class.as_str())
    }
}

/// Action string outside the closed vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid action '{0}': expected <namespace>:Read or <namespace>:Write")]
pub struct ActionParseError(pub String);

impl FromStr for Action {
    type Err = ActionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, class) = s
            .rsplit_once(':')
            .ok_or_else(|| ActionParseError(s.to_string()))?;

        if namespace.is_empty() {
            return Err(ActionParseError(s.to_string()));
        }

        let class = match class {
            "Read" => ActionClass::Read,
            "Write" => ActionClass::Write,
            _ => return Err(ActionParseError(s.to_string())),
        };

        Ok(Self::new(namespace, class))
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
