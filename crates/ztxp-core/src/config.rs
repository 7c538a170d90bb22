//! Runtime configuration.
//!
//! Built once at startup (YAML file and/or environment) and shared read-only.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, SigningError};
use crate::policy::{DEFAULT_DECISION_PATH, DEFAULT_RISK_THRESHOLD};
use crate::signing::KeyStore;
use crate::tam::freshness::{DEFAULT_FUTURE_SKEW_SECS, DEFAULT_TTL_SECS};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ZtxpConfig {
    pub freshness: FreshnessConfig,
    pub signing: SigningConfig,
    pub verification: VerificationConfig,
    pub policy: PolicyConfig,
    pub broker: BrokerConfig,
    pub pep: PepConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FreshnessConfig {
    pub ttl_secs: u64,
    pub future_skew_secs: u64,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TTL_SECS,
            future_skew_secs: DEFAULT_FUTURE_SKEW_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningBackend {
    #[default]
    Local,
    Remote,
}

impl FromStr for SigningBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(ConfigError::Invalid {
                message: format!("unknown signing backend '{}' (expected local|remote)", other),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SigningConfig {
    pub backend: SigningBackend,

    /// Local key directory; `~/.ztxp` when unset.
    pub key_dir: Option<PathBuf>,

    pub authority_url: Option<String>,

    /// Key reference at the signing authority.
    pub key_id: Option<String>,

    #[serde(skip_serializing)]
    pub authority_token: Option<String>,

    pub timeout_ms: u64,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            backend: SigningBackend::Local,
            key_dir: None,
            authority_url: None,
            key_id: None,
            authority_token: None,
            timeout_ms: 3000,
        }
    }
}

impl SigningConfig {
    pub fn resolved_key_dir(&self) -> Result<PathBuf, SigningError> {
        self.key_dir
            .clone()
            .or_else(KeyStore::default_dir)
            .ok_or_else(|| SigningError::Unavailable {
                reason: "no key directory configured and no home directory found".to_string(),
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerificationConfig {
    /// Trusted key ids. Empty means only the configured signing key.
    pub accepted_key_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyBackend {
    #[default]
    Embedded,
    Delegated,
}

impl FromStr for PolicyBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "embedded" => Ok(Self::Embedded),
            "delegated" => Ok(Self::Delegated),
            other => Err(ConfigError::Invalid {
                message: format!(
                    "unknown policy backend '{}' (expected embedded|delegated)",
                    other
                ),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    pub backend: PolicyBackend,
    pub risk_threshold: f64,
    pub pdp_url: Option<String>,
    pub decision_path: String,
    pub timeout_ms: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            backend: PolicyBackend::Embedded,
            risk_threshold: DEFAULT_RISK_THRESHOLD,
            pdp_url: None,
            decision_path: DEFAULT_DECISION_PATH.to_string(),
            timeout_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    /// `expires_in` of allow decisions.
    pub decision_ttl_secs: u64,

    /// Reject a `message_id` seen earlier inside the freshness window.
    pub replay_protection: bool,

    /// Upper bound on each verifier / evaluator call.
    pub backend_timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            decision_ttl_secs: 300,
            replay_protection: false,
            backend_timeout_ms: 5000,
        }
    }
}

/// Policy for requests that carry no `x-device-compliant` header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingDeviceSignal {
    #[default]
    AssumeNonCompliant,
    /// Lenient mode; every use is logged at warn.
    AssumeCompliant,
}

impl FromStr for MissingDeviceSignal {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "assume_non_compliant" => Ok(Self::AssumeNonCompliant),
            "assume_compliant" => Ok(Self::AssumeCompliant),
            other => Err(ConfigError::Invalid {
                message: format!(
                    "unknown missing_device_signal '{}' (expected assume_non_compliant|assume_compliant)",
                    other
                ),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PepConfig {
    pub issuer: String,

    /// Prepended to the request path to form `resource.id`.
    pub resource_prefix: String,

    pub action_namespace: String,

    /// Remote broker base URL; the in-process broker is used when unset.
    pub broker_url: Option<String>,

    pub broker_timeout_ms: u64,

    pub missing_device_signal: MissingDeviceSignal,

    /// Upstream collaborator that validated the bearer token.
    pub identity_verified_by: String,

    /// `context.risk_score` placed in PEP-minted TAMs.
    pub risk_score: f64,
}

impl Default for PepConfig {
    fn default() -> Self {
        Self {
            issuer: "ztxp://pep.local".to_string(),
            resource_prefix: "app://notes".to_string(),
            action_namespace: "notes".to_string(),
            broker_url: None,
            broker_timeout_ms: 4000,
            missing_device_signal: MissingDeviceSignal::AssumeNonCompliant,
            identity_verified_by: "api-gateway".to_string(),
            risk_score: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl ZtxpConfig {
    /// Defaults overlaid with `ZTXP_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// YAML file overlaid with `ZTXP_*` environment variables.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_yaml_str(&raw)
            .map_err(|e| ConfigError::Read {
                path: path.display().to_string(),
                message: e.to_string(),
            })?
            .with_env_overrides()
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).map_err(|e| ConfigError::Invalid {
            message: e.to_string(),
        })
    }

    /// Apply environment overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(v) = env_parse::<u64>("ZTXP_TAM_TTL_SECONDS")? {
            self.freshness.ttl_secs = v;
        }
        if let Some(v) = env_parse::<u64>("ZTXP_FUTURE_SKEW_SECONDS")? {
            self.freshness.future_skew_secs = v;
        }

        if let Some(v) = env_string("ZTXP_SIGNING_BACKEND") {
            self.signing.backend = v.parse()?;
        }
        if let Some(v) = env_string("ZTXP_KEY_DIR") {
            self.signing.key_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = env_string("ZTXP_SIGNING_AUTHORITY_URL") {
            self.signing.authority_url = Some(v);
        }
        if let Some(v) = env_string("ZTXP_SIGNING_KEY_ID") {
            self.signing.key_id = Some(v);
        }
        if let Some(v) = env_string("ZTXP_SIGNING_AUTHORITY_TOKEN") {
            self.signing.authority_token = Some(v);
        }
        if let Some(v) = env_string("ZTXP_ACCEPTED_KEY_IDS") {
            self.verification.accepted_key_ids = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(v) = env_string("ZTXP_POLICY_BACKEND") {
            self.policy.backend = v.parse()?;
        }
        if let Some(v) = env_string("ZTXP_PDP_URL") {
            self.policy.pdp_url = Some(v);
        }
        if let Some(v) = env_parse::<f64>("ZTXP_RISK_THRESHOLD")? {
            self.policy.risk_threshold = v;
        }

        if let Some(v) = env_string("ZTXP_REPLAY_PROTECTION") {
            self.broker.replay_protection = v == "1" || v.eq_ignore_ascii_case("true");
        }

        if let Some(v) = env_string("ZTXP_BROKER_URL") {
            self.pep.broker_url = Some(v);
        }
        if let Some(v) = env_string("ZTXP_MISSING_DEVICE_SIGNAL") {
            self.pep.missing_device_signal = v.parse()?;
        }

        if let Some(v) = env_string("ZTXP_BIND_ADDR") {
            self.server.bind = v;
        }

        Ok(self)
    }

    /// Reject configurations that cannot produce a working pipeline.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.freshness.ttl_secs == 0 {
            return Err(invalid("freshness.ttl_secs must be greater than 0"));
        }
        if !self.policy.risk_threshold.is_finite() {
            return Err(invalid("policy.risk_threshold must be a finite number"));
        }
        if !self.pep.risk_score.is_finite() {
            return Err(invalid("pep.risk_score must be a finite number"));
        }
        if self.broker.decision_ttl_secs == 0 {
            return Err(invalid("broker.decision_ttl_secs must be greater than 0"));
        }
        if self.signing.backend == SigningBackend::Remote {
            if is_blank(&self.signing.authority_url) {
                return Err(invalid(
                    "signing.authority_url is required for the remote signing backend",
                ));
            }
            if is_blank(&self.signing.key_id) {
                return Err(invalid(
                    "signing.key_id is required for the remote signing backend",
                ));
            }
        }
        if self.policy.backend == PolicyBackend::Delegated && is_blank(&self.policy.pdp_url) {
            return Err(invalid(
                "policy.pdp_url is required for the delegated policy backend",
            ));
        }
        if self.server.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(invalid(&format!(
                "server.bind '{}' is not a socket address",
                self.server.bind
            )));
        }
        Ok(())
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env_string(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                message: format!("{}='{}': {}", name, raw, e),
            }),
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid {
        message: message.to_string(),
    }
}
