//! Clap derive structures for the `gatewatch` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// gatewatch -- BLE proximity gates on an MQTT bus
#[derive(Debug, Parser)]
#[command(
    name = "gatewatch",
    version,
    about = "Bridge BLE proximity gates to an MQTT broker",
    long_about = "Keeps a connection to every configured proximity gate, republishes\n\
        its sensor transitions on the gate's MQTT topic and accepts new gates\n\
        at runtime over the control topic.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Configuration file [default: platform config directory]
    #[arg(long, short = 'c', global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the bridge until interrupted
    Run,

    /// Load and validate the configuration, then print the effective values
    #[command(alias = "check")]
    Validate,

    /// List nearby BLE devices seen during one discovery window
    Scan(ScanArgs),
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Discovery window in seconds
    #[arg(long, short = 'w', default_value_t = 10, value_name = "SECS")]
    pub window: u64,
}
