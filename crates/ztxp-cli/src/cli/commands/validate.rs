//! `ztxp validate` - check a signed TAM the way the broker would, minus policy.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use serde_json::Value as JsonValue;
use std::fs;
use std::path::{Path, PathBuf};

use ztxp_core::tam::{FreshnessError, FreshnessWindow, TamError};
use ztxp_core::{
    build_verifier, verify_tam_value, ConfigError, TrustAssertionMessage, VerifyError,
};

use super::load_config;
use crate::exit_codes::{CONFIG_ERROR, FAILED, SIGNATURE_INVALID, SUCCESS, TAM_INVALID};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Signed TAM (JSON)
    pub input: PathBuf,

    /// Local key directory, overrides `signing.key_dir`
    #[arg(long)]
    pub key_dir: Option<PathBuf>,

    /// Skip the freshness window check
    #[arg(long)]
    pub skip_freshness: bool,
}

pub async fn cmd_validate(args: ValidateArgs, config: Option<&Path>) -> i32 {
    match run_validate(&args, config).await {
        Ok(()) => SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_code(&e)
        }
    }
}

fn exit_code(e: &anyhow::Error) -> i32 {
    if e.downcast_ref::<ConfigError>().is_some() {
        return CONFIG_ERROR;
    }
    if let Some(verify) = e.downcast_ref::<VerifyError>() {
        return match verify {
            VerifyError::Invalid { .. } | VerifyError::Malformed { .. } => SIGNATURE_INVALID,
            VerifyError::Unavailable { .. } => FAILED,
        };
    }
    if e.downcast_ref::<TamError>().is_some()
        || e.downcast_ref::<FreshnessError>().is_some()
        || e.downcast_ref::<serde_json::Error>().is_some()
    {
        return TAM_INVALID;
    }
    FAILED
}

async fn run_validate(args: &ValidateArgs, config: Option<&Path>) -> Result<()> {
    let mut config = load_config(config)?;
    if let Some(dir) = &args.key_dir {
        config.signing.key_dir = Some(dir.clone());
    }

    let raw = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let value: JsonValue = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", args.input.display()))?;

    // The signature block is left to the verifier.
    let mut unsigned = value.clone();
    if let Some(members) = unsigned.as_object_mut() {
        members.remove("signature");
    }
    let tam: TrustAssertionMessage = serde_json::from_value(unsigned)
        .with_context(|| format!("{} is not a TAM", args.input.display()))?;
    tam.validate_structure()?;
    println!("structure: ok (message_id {})", tam.message_id);

    let verifier = build_verifier(&config.signing, &config.verification).map_err(|e| {
        ConfigError::Invalid {
            message: format!("cannot build verifier: {}", e),
        }
    })?;
    verify_tam_value(&value, verifier.as_ref())
        .await
        .context("signature rejected")?;
    let key_id = value["signature"]["key_id"].as_str().unwrap_or_default();
    println!("signature: ok (key_id {})", key_id);

    if args.skip_freshness {
        println!("freshness: skipped");
        return Ok(());
    }

    let window = FreshnessWindow::new(config.freshness.ttl_secs, config.freshness.future_skew_secs);
    let now = Utc::now();
    window.check_at(tam.issued_at, now)?;
    println!(
        "freshness: ok (age {}s, ttl {}s)",
        (now - tam.issued_at).num_seconds(),
        window.ttl_secs()
    );
    Ok(())
}
