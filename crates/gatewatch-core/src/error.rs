// ── Core error types ──
//
// Transport failures stay inside the session that hit them; callers of the
// lifecycle manager only see bus failures and which gate stopped for good.

use std::time::Duration;

use gatewatch_api::{BusError, MacAddress};
use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid gate definition: {message}")]
    InvalidGate { message: String },

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("control-plane stream closed")]
    ControlPlaneClosed,
}

/// Terminal outcome of one gate session.
///
/// These never propagate beyond the session task: the monitor logs them and
/// every other gate keeps running.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("gate {name} ({address}) not found within {timeout:?}")]
    DeviceNotFound {
        name: String,
        address: MacAddress,
        timeout: Duration,
    },

    #[error("gave up reconnecting after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("session cancelled")]
    Cancelled,
}
