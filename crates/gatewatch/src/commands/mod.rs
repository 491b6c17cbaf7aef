//! Subcommand handlers.

pub mod run;
pub mod scan;
pub mod validate;

use gatewatch_config::Config;
use tokio_util::sync::CancellationToken;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

pub async fn dispatch(
    command: Command,
    global: &GlobalOpts,
    shutdown: &CancellationToken,
) -> Result<(), CliError> {
    match command {
        Command::Validate => validate::handle(global),
        Command::Run => run::handle(global, shutdown).await,
        Command::Scan(args) => scan::handle(&args, global, shutdown).await,
    }
}

/// Load the layered configuration for `--config` or the default path.
pub fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    gatewatch_config::load(global.config.as_deref())
        .map_err(|e| CliError::config(config_display_path(global), e))
}

pub fn config_display_path(global: &GlobalOpts) -> String {
    global
        .config
        .clone()
        .unwrap_or_else(gatewatch_config::config_path)
        .display()
        .to_string()
}
