use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::commands::{keygen::KeygenArgs, serve::ServeArgs, sign::SignArgs, validate::ValidateArgs};

#[derive(Parser)]
#[command(
    name = "ztxp",
    version,
    about = "Zero-trust exchange protocol: sign, validate and broker Trust Assertion Messages"
)]
pub struct Cli {
    /// YAML configuration file; `ZTXP_*` environment variables override it
    #[arg(long, global = true, env = "ZTXP_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate the local Ed25519 signing key pair
    Keygen(KeygenArgs),
    /// Sign a TAM document with the configured signer
    Sign(SignArgs),
    /// Check signature, structure and freshness of a signed TAM
    Validate(ValidateArgs),
    /// Run the broker and PEP HTTP service
    Serve(ServeArgs),
    Version,
}
