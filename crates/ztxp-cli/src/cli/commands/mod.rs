use std::path::Path;

use super::args::*;
use crate::exit_codes::SUCCESS;
use ztxp_core::{ConfigError, ZtxpConfig};

pub mod keygen;
pub mod serve;
pub mod sign;
pub mod validate;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let config = cli.config.as_deref();
    match cli.cmd {
        Command::Keygen(args) => Ok(keygen::cmd_keygen(args, config)),
        Command::Sign(args) => Ok(sign::cmd_sign(args, config).await),
        Command::Validate(args) => Ok(validate::cmd_validate(args, config).await),
        Command::Serve(args) => serve::run(args, config).await,
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(SUCCESS)
        }
    }
}

/// `--config` file when given, otherwise defaults; `ZTXP_*` variables on top.
pub(crate) fn load_config(path: Option<&Path>) -> Result<ZtxpConfig, ConfigError> {
    match path {
        Some(path) => ZtxpConfig::from_yaml_file(path),
        None => ZtxpConfig::from_env(),
    }
}
