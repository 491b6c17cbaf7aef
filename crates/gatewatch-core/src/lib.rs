//! Gate-connection lifecycle manager.
//!
//! This crate owns everything between "a gate address is known" and "a
//! status string lands on the bus":
//!
//! - **[`GateRegistry`]**: the device directory. Ordered, append-only,
//!   keyed by normalized hardware address, updatable from control-plane
//!   messages. Also owns the per-gate reconnect locks.
//!
//! - **[`GateSession`]**: one task per gate. Discovers the device,
//!   connects, arms the indicator, subscribes to sensor notifications and
//!   republishes every transition. Disconnects arrive as generation-tagged
//!   tokens on a channel the session owns.
//!
//! - **[`ReconnectSupervisor`]**: serialized retry loop entered through the
//!   gate's reconnect lock. Transport connect/disconnect always go through
//!   the process-wide radio lock.
//!
//! - **[`GateMonitor`]**: root: registers static gates, reacts to
//!   control-plane updates, starts sessions and shuts them all down.
//!
//! Everything is generic over the [`Transport`](gatewatch_api::Transport)
//! and [`BusClient`](gatewatch_api::BusClient) capabilities.

pub mod config;
pub mod control;
pub mod directory;
pub mod error;
pub mod model;
pub mod monitor;
pub mod session;
pub mod supervisor;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{DiscoveryConfig, GattProfile, MonitorConfig, ReconnectPolicy, Topics};
pub use control::{ControlAck, ControlMessage};
pub use directory::{GateRegistry, Registration};
pub use error::{CoreError, SessionError};
pub use model::{Detection, Gate, GateSpec, GateStatus, SessionState};
pub use monitor::GateMonitor;
pub use session::{GateSession, SessionContext};
pub use supervisor::ReconnectSupervisor;
