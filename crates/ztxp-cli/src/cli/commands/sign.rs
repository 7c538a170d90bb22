//! `ztxp sign` - sign a TAM document.
//!
//! Missing `version`, `message_id` and `issued_at` are filled in before
//! signing, so a hand-written YAML file only needs the claims.

use anyhow::{Context, Result};
use clap::Args;
use serde_json::{Map, Value as JsonValue};
use std::fs;
use std::path::{Path, PathBuf};

use ztxp_core::tam::timestamp;
use ztxp_core::{build_signer, sign_tam, ConfigError, TamBuilder, TrustAssertionMessage};

use super::load_config;
use crate::exit_codes::{CONFIG_ERROR, FAILED, SUCCESS, TAM_INVALID};

#[derive(Args, Debug)]
pub struct SignArgs {
    /// Unsigned TAM (`.json`, otherwise read as YAML)
    pub input: PathBuf,

    /// Signed TAM output (JSON)
    pub output: PathBuf,

    /// Local key directory, overrides `signing.key_dir`
    #[arg(long)]
    pub key_dir: Option<PathBuf>,
}

pub async fn cmd_sign(args: SignArgs, config: Option<&Path>) -> i32 {
    match run_sign(&args, config).await {
        Ok(()) => SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            if e.downcast_ref::<ConfigError>().is_some() {
                CONFIG_ERROR
            } else if e.downcast_ref::<ztxp_core::tam::TamError>().is_some()
                || e.downcast_ref::<serde_json::Error>().is_some()
                || e.downcast_ref::<serde_yaml::Error>().is_some()
            {
                TAM_INVALID
            } else {
                FAILED
            }
        }
    }
}

async fn run_sign(args: &SignArgs, config: Option<&Path>) -> Result<()> {
    let mut config = load_config(config)?;
    if let Some(dir) = &args.key_dir {
        config.signing.key_dir = Some(dir.clone());
    }

    let raw = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let mut value = parse_document(&args.input, &raw)?;
    let fields = value
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("{} is not a mapping", args.input.display()))?;
    fill_defaults(fields);

    let tam: TrustAssertionMessage = serde_json::from_value(value)
        .with_context(|| format!("{} is not a TAM", args.input.display()))?;
    tam.validate_structure()?;

    let signer = build_signer(&config.signing).context("failed to build signer")?;
    let signed = sign_tam(tam, signer.as_ref())
        .await
        .context("signing failed")?;

    let mut out = serde_json::to_string_pretty(&signed)?;
    out.push('\n');
    fs::write(&args.output, out)
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    println!("Signed {} -> {}", args.input.display(), args.output.display());
    println!("  message_id: {}", signed.message_id);
    println!("  key_id:     {}", signer.key_id());
    Ok(())
}

fn parse_document(path: &Path, raw: &str) -> Result<JsonValue> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        Ok(serde_json::from_str(raw)
            .with_context(|| format!("failed to parse {}", path.display()))?)
    } else {
        Ok(serde_yaml::from_str(raw)
            .with_context(|| format!("failed to parse {}", path.display()))?)
    }
}

fn fill_defaults(fields: &mut Map<String, JsonValue>) {
    let defaults = TamBuilder::new("").build();
    fields
        .entry("version")
        .or_insert_with(|| JsonValue::String(defaults.version.clone()));
    fields
        .entry("message_id")
        .or_insert_with(|| JsonValue::String(defaults.message_id.clone()));
    fields
        .entry("issued_at")
        .or_insert_with(|| JsonValue::String(timestamp::format(&defaults.issued_at)));
}
