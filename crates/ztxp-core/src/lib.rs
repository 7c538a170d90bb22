//! Zero-trust exchange protocol (ZTXP) core.
//!
//! A Trust Assertion Message (TAM) is a short-lived signed claim about who is
//! asking, from which device, for which action on which resource. This crate
//! provides:
//!
//! - Canonical encoding (RFC 8785 JCS) shared by signer and verifier
//! - The TAM model, builder and freshness window
//! - Signing backends: local Ed25519 key store, remote signing authority
//! - Policy evaluators: embedded rules, delegated PDP
//! - The Trust Broker state machine
//! - The Policy Enforcement Point (PEP)
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use ztxp_core::{build_signer, sign_tam, Broker, TamBuilder, ZtxpConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ZtxpConfig::from_env()?;
//! let signer = build_signer(&config.signing)?;
//! let broker = Broker::from_config(&config)?;
//!
//! let tam = TamBuilder::new("ztxp://pep.local").build();
//! let signed = sign_tam(tam, signer.as_ref()).await?;
//! let body = serde_json::to_vec(&serde_json::json!({ "tam": signed }))?;
//!
//! match broker.evaluate(&body).await {
//!     Ok(record) => println!("{} ({})", record.decision().as_str(), record.reason()),
//!     Err(rejection) => println!("rejected: {}", rejection.reason_code()),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `ZTXP_TAM_TTL_SECONDS` | Maximum TAM age (default: 600) |
//! | `ZTXP_FUTURE_SKEW_SECONDS` | Tolerance for future `issued_at` (default: 60) |
//! | `ZTXP_SIGNING_BACKEND` | `local` or `remote` (default: `local`) |
//! | `ZTXP_KEY_DIR` | Local key directory (default: `~/.ztxp`) |
//! | `ZTXP_SIGNING_AUTHORITY_URL` | Remote signing authority base URL |
//! | `ZTXP_SIGNING_KEY_ID` | Key reference at the signing authority |
//! | `ZTXP_SIGNING_AUTHORITY_TOKEN` | Bearer token for the signing authority |
//! | `ZTXP_ACCEPTED_KEY_IDS` | Comma-separated trusted key ids |
//! | `ZTXP_POLICY_BACKEND` | `embedded` or `delegated` (default: `embedded`) |
//! | `ZTXP_PDP_URL` | Delegated policy decision point base URL |
//! | `ZTXP_RISK_THRESHOLD` | Embedded rules risk threshold (default: 50) |
//! | `ZTXP_REPLAY_PROTECTION` | Reject repeated `message_id`s (default: off) |
//! | `ZTXP_BROKER_URL` | Remote broker for the PEP (default: in-process) |
//! | `ZTXP_MISSING_DEVICE_SIGNAL` | `assume_non_compliant` (default) or `assume_compliant` |
//! | `ZTXP_BIND_ADDR` | HTTP bind address (default: `127.0.0.1:8080`) |

pub mod broker;
pub mod canonical;
pub mod config;
pub mod error;
pub mod pep;
pub mod policy;
pub mod replay;
pub mod signing;
pub mod tam;

pub use broker::{Broker, BrokerResponse, BrokerStage, Decision, DecisionRecord, Rejection};
pub use config::{MissingDeviceSignal, PolicyBackend, SigningBackend, ZtxpConfig};
pub use error::{BrokerError, CanonicalError, ConfigError, SigningError, VerifyError};
pub use pep::{AuthorizationResult, BrokerClient, HttpBrokerClient, InboundRequest, Pep};
pub use policy::{
    build_evaluator, DelegatedEvaluator, EmbeddedRules, PolicyError, PolicyEvaluator,
    PolicyInput, PolicyOutcome,
};
pub use replay::ReplayGuard;
pub use signing::{
    build_signer, build_verifier, AcceptPolicy, Algorithm, KeyStore, LocalKeySigner,
    LocalKeyVerifier, RemoteAuthority, RemoteAuthoritySigner, RemoteAuthorityVerifier,
    SignatureBlock, Signer, Verifier,
};
pub use tam::{
    sign_tam, verify_tam_value, Action, ActionClass, FreshnessWindow, TamBuilder,
    TrustAssertionMessage,
};
