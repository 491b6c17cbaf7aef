use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::address::MacAddress;

/// A string that could not be parsed as a hardware address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid hardware address '{raw}': expected six hex octets")]
pub struct AddressError {
    pub raw: String,
}

/// Failures reported by a [`Transport`](crate::Transport) implementation.
///
/// `gatewatch-core` only cares about the class of a failure: stack
/// contention is retried with a longer backoff than everything else.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    // ── Radio stack ─────────────────────────────────────────────────
    /// No usable radio adapter on this host.
    #[error("no Bluetooth adapter available")]
    AdapterUnavailable,

    /// The radio stack rejected the operation because another one is in
    /// flight (BlueZ `org.bluez.Error.InProgress` and friends).
    #[error("radio stack busy: {reason}")]
    StackBusy { reason: String },

    // ── Device ──────────────────────────────────────────────────────
    #[error("device {address} not found")]
    DeviceNotFound { address: MacAddress },

    #[error("connect to {address} failed: {reason}")]
    ConnectFailed { address: MacAddress, reason: String },

    #[error("device not connected")]
    NotConnected,

    #[error("characteristic {uuid} not found on device")]
    CharacteristicNotFound { uuid: Uuid },

    #[error("operation timed out after {after:?}")]
    Timeout { after: Duration },

    // ── Generic ─────────────────────────────────────────────────────
    #[error("transport I/O error: {reason}")]
    Io { reason: String },
}

impl TransportError {
    /// `true` for radio-stack contention, which warrants the longer backoff.
    pub fn is_stack_busy(&self) -> bool {
        matches!(self, Self::StackBusy { .. })
    }

    /// Classify a raw platform error message.
    ///
    /// Platform stacks report contention only through their message text,
    /// so adapters funnel unknown errors through here.
    pub fn from_platform_message(message: impl Into<String>) -> Self {
        let reason = message.into();
        if is_busy_message(&reason) {
            Self::StackBusy { reason }
        } else {
            Self::Io { reason }
        }
    }
}

fn is_busy_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["inprogress", "in progress", "busy", "resource temporarily unavailable"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Failures reported by a [`BusClient`](crate::BusClient) implementation.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    #[error("message broker {host}:{port} unreachable after {attempts} attempts")]
    Unreachable {
        host: String,
        port: u16,
        attempts: u32,
    },

    #[error("publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("subscribe to '{topic}' failed: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("broker probe cancelled")]
    Cancelled,
}
