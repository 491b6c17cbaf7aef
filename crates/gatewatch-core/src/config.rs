// ── Runtime monitor configuration ──
//
// These types describe *how* gates are monitored: topics, GATT layout,
// discovery and reconnect timing. Core never reads config files; the
// binary builds a `MonitorConfig` through `gatewatch-config` and hands it in.

use std::time::Duration;

use uuid::Uuid;

use crate::model::Detection;

/// Control-plane topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub control: String,
    pub ack: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            control: "gate/mac_config".into(),
            ack: "gate/mac_config/ack".into(),
        }
    }
}

/// GATT characteristics and LED payloads of the gate firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattProfile {
    /// Break-beam sensor, notifies on every change.
    pub sensor: Uuid,
    /// RGB indicator, written without response.
    pub indicator: Uuid,
    /// Written once per connection (green blink).
    pub armed: Vec<u8>,
    pub triggered: Vec<u8>,
    pub clear: Vec<u8>,
}

impl Default for GattProfile {
    fn default() -> Self {
        Self {
            sensor: Uuid::from_u128(0x794f_1fe3_9be8_4875_83ba_731e_1037_a883),
            indicator: Uuid::from_u128(0x794f_1fe3_9be8_4875_83ba_731e_1037_a882),
            armed: vec![0x03, 0x00, 0xFF, 0x00, 0xFF, 0x32],
            triggered: vec![0xFF, 0x00, 0x00],
            clear: vec![0x00, 0x00, 0xFF],
        }
    }
}

impl GattProfile {
    pub fn indicator_for(&self, detection: Detection) -> &[u8] {
        match detection {
            Detection::Triggered => &self.triggered,
            Detection::Clear => &self.clear,
        }
    }
}

/// Initial discovery of a gate before its first connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Length of one scan. Default: 5s.
    pub scan_window: Duration,
    /// Pause between scans. Default: 2s.
    pub poll_interval: Duration,
    /// Give up on the gate after this long. Default: 60s.
    pub timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            scan_window: Duration::from_secs(5),
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Reconnection supervisor timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Wait before the first attempt, letting the radio stack settle. Default: 2s.
    pub settle: Duration,
    /// Backoff after an ordinary failure. Default: 5s.
    pub retry_backoff: Duration,
    /// Backoff after the stack reported an operation in progress. Default: 10s.
    pub busy_backoff: Duration,
    /// Give up after this many attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(2),
            retry_backoff: Duration::from_secs(5),
            busy_backoff: Duration::from_secs(10),
            max_attempts: None,
        }
    }
}

/// Everything the monitor needs apart from its collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub topics: Topics,
    pub gatt: GattProfile,
    pub discovery: DiscoveryConfig,
    /// Per connect attempt. Default: 20s.
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    /// Delay between starting consecutive sessions. Default: 3s.
    pub start_stagger: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            topics: Topics::default(),
            gatt: GattProfile::default(),
            discovery: DiscoveryConfig::default(),
            connect_timeout: Duration::from_secs(20),
            reconnect: ReconnectPolicy::default(),
            start_stagger: Duration::from_secs(3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_uuids_match_firmware() {
        let gatt = GattProfile::default();
        assert_eq!(
            gatt.sensor.to_string(),
            "794f1fe3-9be8-4875-83ba-731e1037a883"
        );
        assert_eq!(
            gatt.indicator.to_string(),
            "794f1fe3-9be8-4875-83ba-731e1037a882"
        );
    }

    #[test]
    fn indicator_payloads() {
        let gatt = GattProfile::default();
        assert_eq!(gatt.indicator_for(Detection::Triggered), [0xFF, 0x00, 0x00]);
        assert_eq!(gatt.indicator_for(Detection::Clear), [0x00, 0x00, 0xFF]);
    }

    #[test]
    fn default_policy_retries_forever() {
        let policy = ReconnectPolicy::default();
        assert!(policy.max_attempts.is_none());
        assert!(policy.busy_backoff > policy.retry_backoff);
    }
}
