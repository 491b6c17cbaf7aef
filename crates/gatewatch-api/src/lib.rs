//! Capability layer between the gate lifecycle manager and the outside world.
//!
//! `gatewatch-core` never talks to a radio or a broker directly. It is generic
//! over the two traits defined here:
//!
//! - **[`Transport`]**: wireless discovery, connect/disconnect, GATT
//!   notifications and attribute writes. Link loss is reported by sending a
//!   [`DisconnectToken`] through the [`DisconnectNotifier`] handed to
//!   [`Transport::connect`], so the owning session consumes it on its own task.
//!
//! - **[`BusClient`]**: publish/subscribe on the message bus.
//!
//! Concrete adapters:
//!
//! - [`mqtt::MqttBus`]: `rumqttc` client with a supervised event loop,
//!   broker reachability probing and topic resubscription after reconnects.
//! - `ble::BleTransport` (feature `ble`): `btleplug` central.

pub mod address;
#[cfg(feature = "ble")]
pub mod ble;
pub mod bus;
pub mod error;
pub mod mqtt;
pub mod transport;

pub use address::MacAddress;
pub use bus::{BusClient, BusMessage};
pub use error::{AddressError, BusError, TransportError};
pub use mqtt::{MqttBus, MqttConfig, ProbeConfig, wait_for_broker};
pub use transport::{DiscoveredDevice, DisconnectNotifier, DisconnectToken, Transport};

#[cfg(feature = "ble")]
pub use ble::{BleHandle, BleTransport};
