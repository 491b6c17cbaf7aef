use std::fmt::Write as _;

use gatewatch_config::Config;

use crate::cli::GlobalOpts;
use crate::commands::{config_display_path, load_config};
use crate::error::CliError;

const REDACTED: &str = "********";

pub fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let config = load_config(global)?;
    let path = config_display_path(global);
    let resolved = config
        .resolve()
        .map_err(|e| CliError::config(path.clone(), e))?;

    tracing::info!(path = %path, gates = resolved.gates.len(), "configuration is valid");
    print!("{}", render(&config, &path, &resolved.gates)?);
    Ok(())
}

/// Effective config as TOML, followed by the resolved gate list as
/// comments so the output can be saved and loaded again.
fn render(
    config: &Config,
    path: &str,
    gates: &[gatewatch_core::Gate],
) -> Result<String, CliError> {
    let mut shown = config.clone();
    if shown.broker.password.is_some() {
        shown.broker.password = Some(REDACTED.into());
    }
    let body = shown
        .to_toml()
        .map_err(|e| CliError::config(path.to_owned(), e))?;

    let mut out = format!("# effective configuration (file: {path})\n{body}");
    let noun = if gates.len() == 1 { "gate" } else { "gates" };
    let _ = writeln!(out, "\n# {} static {noun}", gates.len());
    for gate in gates {
        let _ = writeln!(out, "#   {gate} -> {}", gate.topic());
    }
    Ok(out)
}
