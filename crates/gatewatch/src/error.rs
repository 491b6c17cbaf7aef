//! CLI error types with miette diagnostics.
//!
//! Maps config, bus, transport and core failures into user-facing errors
//! with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use gatewatch_api::{BusError, TransportError};
use gatewatch_config::ConfigError;
use gatewatch_core::CoreError;

/// Process exit codes.
#[allow(dead_code)]
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    /// Emitted by clap itself on argument errors.
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const RADIO: i32 = 4;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
#[allow(dead_code)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────

    #[error("Configuration at {path} is invalid")]
    #[diagnostic(
        code(gatewatch::config),
        help(
            "Fix the file or the GATEWATCH_* / MQTT_* environment overrides.\n\
             Run: gatewatch validate"
        )
    )]
    Config {
        path: String,
        #[source]
        source: ConfigError,
    },

    // ── Broker ───────────────────────────────────────────────────────

    #[error("Message broker {host}:{port} unreachable after {attempts} attempts")]
    #[diagnostic(
        code(gatewatch::broker_unreachable),
        help(
            "Check that the broker is running and reachable.\n\
             Override the address with MQTT_BROKER / MQTT_PORT or [broker] in the config."
        )
    )]
    BrokerUnreachable {
        host: String,
        port: u16,
        attempts: u32,
    },

    #[error("Message bus failure")]
    #[diagnostic(code(gatewatch::bus))]
    Bus(#[source] BusError),

    // ── Radio ────────────────────────────────────────────────────────

    #[error("Bluetooth adapter failure")]
    #[diagnostic(
        code(gatewatch::radio),
        help(
            "Make sure a Bluetooth adapter is present and powered, and that the\n\
             platform Bluetooth service (bluetoothd on Linux) is running."
        )
    )]
    Radio(#[source] TransportError),

    #[error("'{command}' needs Bluetooth support, which this build does not include")]
    #[diagnostic(
        code(gatewatch::ble_unavailable),
        help("Rebuild with: cargo install gatewatch --features ble")
    )]
    BleUnavailable { command: String },

    // ── Runtime ──────────────────────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(code(gatewatch::runtime))]
    Core(#[from] CoreError),
}

impl CliError {
    pub fn config(path: impl Into<String>, source: ConfigError) -> Self {
        Self::Config {
            path: path.into(),
            source,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => exit_code::CONFIG,
            Self::BrokerUnreachable { .. }
            | Self::Bus(_)
            | Self::Core(CoreError::Bus(_) | CoreError::ControlPlaneClosed) => {
                exit_code::CONNECTION
            }
            Self::Radio(_) | Self::BleUnavailable { .. } => exit_code::RADIO,
            Self::Core(_) => exit_code::GENERAL,
        }
    }
}

impl From<BusError> for CliError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Unreachable {
                host,
                port,
                attempts,
            } => Self::BrokerUnreachable {
                host,
                port,
                attempts,
            },
            other => Self::Bus(other),
        }
    }
}

impl From<TransportError> for CliError {
    fn from(err: TransportError) -> Self {
        Self::Radio(err)
    }
}
