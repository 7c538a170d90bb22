//! `ztxp keygen` - generate the local Ed25519 key pair.

use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};

use ztxp_core::{ConfigError, KeyStore, SigningError};

use super::load_config;
use crate::exit_codes::{CONFIG_ERROR, FAILED, SUCCESS};

#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Key directory (default: `signing.key_dir`, then `~/.ztxp`)
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Overwrite an existing key pair
    #[arg(long, short)]
    pub force: bool,
}

pub fn cmd_keygen(args: KeygenArgs, config: Option<&Path>) -> i32 {
    match run_keygen(args, config) {
        Ok(()) => SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            if e.downcast_ref::<ConfigError>().is_some() {
                CONFIG_ERROR
            } else {
                FAILED
            }
        }
    }
}

fn run_keygen(args: KeygenArgs, config: Option<&Path>) -> Result<()> {
    let dir = match args.dir {
        Some(dir) => dir,
        None => load_config(config)?.signing.resolved_key_dir()?,
    };

    let store = KeyStore::new(&dir);
    let signing_key = match store.generate(args.force) {
        Ok(key) => key,
        Err(SigningError::KeyExists { path }) => {
            anyhow::bail!("key already exists: {} (use --force to overwrite)", path)
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to generate key in {}", dir.display()))
        }
    };

    let key_id = KeyStore::compute_key_id(&signing_key.verifying_key())?;

    println!("Generated ed25519 keypair:");
    println!(
        "  Private key: {} (PKCS#8 PEM, mode 0600)",
        store.private_key_path().display()
    );
    println!("  Public key:  {} (SPKI PEM)", store.public_key_path().display());
    println!();
    println!("key_id: {key_id}");
    println!();
    println!("Add this key_id to verification.accepted_key_ids to trust TAMs signed with it.");

    Ok(())
}
