//! Configuration for the gatewatch bridge.
//!
//! TOML file + environment layering via `figment`, validation, and
//! translation to `gatewatch_core::MonitorConfig`,
//! `gatewatch_api::MqttConfig` and the static gate list.
//!
//! Precedence, lowest first: built-in defaults, the TOML file,
//! `GATEWATCH_`-prefixed variables (`__` separates sections, e.g.
//! `GATEWATCH_BROKER__PORT`), then the bare `MQTT_BROKER` / `MQTT_PORT`
//! variables used by existing container deployments.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use gatewatch_api::{MqttConfig, ProbeConfig};
use gatewatch_core::{
    DiscoveryConfig, Gate, GateSpec, GattProfile, MonitorConfig, ReconnectPolicy, Topics,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub broker: BrokerSection,
    pub topics: TopicsSection,
    pub gatt: GattSection,
    pub discovery: DiscoverySection,
    pub reconnect: ReconnectSection,
    pub sessions: SessionsSection,
    pub gates: Vec<GateSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerSection {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    /// Plaintext; prefer `GATEWATCH_BROKER__PASSWORD`.
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    /// TCP reachability probes before giving up at startup.
    pub probe_attempts: u32,
    pub probe_interval_secs: u64,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "gatewatch".into(),
            username: None,
            password: None,
            keep_alive_secs: 30,
            probe_attempts: 30,
            probe_interval_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TopicsSection {
    pub control: String,
    pub ack: String,
}

impl Default for TopicsSection {
    fn default() -> Self {
        let topics = Topics::default();
        Self {
            control: topics.control,
            ack: topics.ack,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GattSection {
    pub sensor_uuid: String,
    pub indicator_uuid: String,
    pub armed: Vec<u8>,
    pub triggered: Vec<u8>,
    pub clear: Vec<u8>,
}

impl Default for GattSection {
    fn default() -> Self {
        let gatt = GattProfile::default();
        Self {
            sensor_uuid: gatt.sensor.to_string(),
            indicator_uuid: gatt.indicator.to_string(),
            armed: gatt.armed,
            triggered: gatt.triggered,
            clear: gatt.clear,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoverySection {
    pub scan_window_secs: u64,
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            scan_window_secs: 5,
            poll_interval_secs: 2,
            timeout_secs: 60,
            connect_timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconnectSection {
    pub settle_secs: u64,
    pub retry_backoff_secs: u64,
    pub busy_backoff_secs: u64,
    /// Unset means retry forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            settle_secs: 2,
            retry_backoff_secs: 5,
            busy_backoff_secs: 10,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionsSection {
    /// Delay between starting consecutive gate sessions.
    pub start_stagger_secs: u64,
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            start_stagger_secs: 3,
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "gatewatch", "gatewatch").map_or_else(
        || PathBuf::from("gatewatch.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// The provider chain for `path`, exposed so callers can add layers.
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("GATEWATCH_").split("__"))
        .merge(
            Env::raw()
                .only(&["MQTT_BROKER", "MQTT_PORT"])
                .map(|key| {
                    if key.as_str().eq_ignore_ascii_case("mqtt_broker") {
                        "broker.host".into()
                    } else if key.as_str().eq_ignore_ascii_case("mqtt_port") {
                        "broker.port".into()
                    } else {
                        key.as_str().to_owned().into()
                    }
                }),
        )
}

/// Load from `path`, or from [`config_path`] when `None`. A missing file
/// is not an error; defaults and the environment still apply.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    let config: Config = figment(&path).extract()?;
    Ok(config)
}

impl Config {
    /// Pretty TOML, as written on disk.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate and translate into runtime types.
    pub fn resolve(&self) -> Result<Resolved, ConfigError> {
        Ok(Resolved {
            monitor: self.monitor_config()?,
            mqtt: self.mqtt_config()?,
            gates: self.static_gates()?,
        })
    }

    pub fn mqtt_config(&self) -> Result<MqttConfig, ConfigError> {
        let broker = &self.broker;
        if broker.host.trim().is_empty() {
            return Err(invalid("broker.host", "must not be empty"));
        }
        if broker.port == 0 {
            return Err(invalid("broker.port", "must be between 1 and 65535"));
        }
        if broker.probe_attempts == 0 {
            return Err(invalid("broker.probe_attempts", "must be at least 1"));
        }

        Ok(MqttConfig {
            host: broker.host.trim().to_owned(),
            port: broker.port,
            client_id: broker.client_id.clone(),
            username: broker.username.clone(),
            password: broker.password.clone().map(SecretString::from),
            keep_alive: secs(broker.keep_alive_secs),
            probe: ProbeConfig {
                attempts: broker.probe_attempts,
                interval: secs(broker.probe_interval_secs),
            },
        })
    }

    pub fn monitor_config(&self) -> Result<MonitorConfig, ConfigError> {
        let topics = Topics {
            control: non_empty("topics.control", &self.topics.control)?,
            ack: non_empty("topics.ack", &self.topics.ack)?,
        };
        if topics.control == topics.ack {
            return Err(invalid("topics.ack", "must differ from topics.control"));
        }

        let gatt = GattProfile {
            sensor: parse_uuid("gatt.sensor_uuid", &self.gatt.sensor_uuid)?,
            indicator: parse_uuid("gatt.indicator_uuid", &self.gatt.indicator_uuid)?,
            armed: non_empty_bytes("gatt.armed", &self.gatt.armed)?,
            triggered: non_empty_bytes("gatt.triggered", &self.gatt.triggered)?,
            clear: non_empty_bytes("gatt.clear", &self.gatt.clear)?,
        };

        let discovery = &self.discovery;
        if discovery.scan_window_secs == 0 {
            return Err(invalid("discovery.scan_window_secs", "must be at least 1"));
        }
        if discovery.connect_timeout_secs == 0 {
            return Err(invalid("discovery.connect_timeout_secs", "must be at least 1"));
        }
        if self.reconnect.max_attempts == Some(0) {
            return Err(invalid(
                "reconnect.max_attempts",
                "must be at least 1 (omit it to retry forever)",
            ));
        }

        Ok(MonitorConfig {
            topics,
            gatt,
            discovery: DiscoveryConfig {
                scan_window: secs(discovery.scan_window_secs),
                poll_interval: secs(discovery.poll_interval_secs),
                timeout: secs(discovery.timeout_secs),
            },
            connect_timeout: secs(discovery.connect_timeout_secs),
            reconnect: ReconnectPolicy {
                settle: secs(self.reconnect.settle_secs),
                retry_backoff: secs(self.reconnect.retry_backoff_secs),
                busy_backoff: secs(self.reconnect.busy_backoff_secs),
                max_attempts: self.reconnect.max_attempts,
            },
            start_stagger: secs(self.sessions.start_stagger_secs),
        })
    }

    /// The `[[gates]]` array, validated. Two entries for one address are
    /// rejected rather than silently merged.
    pub fn static_gates(&self) -> Result<Vec<Gate>, ConfigError> {
        let mut seen = HashSet::new();
        let mut gates = Vec::with_capacity(self.gates.len());
        for (index, spec) in self.gates.iter().enumerate() {
            let field = format!("gates[{index}]");
            let gate = Gate::try_from(spec.clone()).map_err(|e| invalid(&field, e.to_string()))?;
            if !seen.insert(gate.address().clone()) {
                return Err(invalid(
                    field,
                    format!("duplicate address {}", gate.address()),
                ));
            }
            gates.push(gate);
        }
        Ok(gates)
    }
}

/// Everything the binary needs to start the bridge.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub monitor: MonitorConfig,
    pub mqtt: MqttConfig,
    pub gates: Vec<Gate>,
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

fn non_empty(field: &str, value: &str) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(invalid(field, "must not be empty"));
    }
    Ok(trimmed.to_owned())
}

fn non_empty_bytes(field: &str, value: &[u8]) -> Result<Vec<u8>, ConfigError> {
    if value.is_empty() {
        return Err(invalid(field, "must contain at least one byte"));
    }
    Ok(value.to_vec())
}

fn parse_uuid(field: &str, value: &str) -> Result<Uuid, ConfigError> {
    Uuid::parse_str(value.trim()).map_err(|e| invalid(field, e.to_string()))
}
