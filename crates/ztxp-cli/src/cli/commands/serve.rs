//! `ztxp serve` - run the broker and PEP over HTTP.

use clap::Args;
use std::path::Path;

use super::load_config;
use crate::exit_codes::{CONFIG_ERROR, SUCCESS};

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Bind address, overrides `server.bind`
    #[arg(long)]
    pub bind: Option<String>,
}

pub async fn run(args: ServeArgs, config: Option<&Path>) -> anyhow::Result<i32> {
    let mut config = match load_config(config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(CONFIG_ERROR);
        }
    };
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        return Ok(CONFIG_ERROR);
    }

    ztxp_server::serve(&config).await?;
    Ok(SUCCESS)
}
