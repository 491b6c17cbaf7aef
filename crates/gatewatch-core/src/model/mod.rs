// ── Domain model ──

mod gate;
mod status;

pub use gate::{Gate, GateSpec};
pub use status::{Detection, GateStatus, SessionState};
