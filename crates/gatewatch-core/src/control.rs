// ── Control plane ──
//
// Runtime gate registration arrives as JSON on the control topic: either a
// single `{name, address, topic}` object or an array of them. The payload
// is parsed and every gate validated up front, so a message is either
// applied completely or not at all.

use std::fmt::Write as _;

use serde_json::Value;

use crate::model::{Gate, GateSpec};

/// A control-plane message after boundary validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    SingleGate(Gate),
    GateList(Vec<Gate>),
    /// Anything that failed validation, with the reason.
    Invalid(String),
}

impl ControlMessage {
    pub fn parse(payload: &[u8]) -> Self {
        let value: Value = match serde_json::from_slice(payload) {
            Ok(value) => value,
            Err(e) => return Self::Invalid(format!("not valid JSON: {e}")),
        };

        match value {
            Value::Object(_) => match gate_from_value(value) {
                Ok(gate) => Self::SingleGate(gate),
                Err(reason) => Self::Invalid(reason),
            },
            Value::Array(items) => {
                if items.is_empty() {
                    return Self::Invalid("empty gate list".into());
                }
                let mut gates = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    if !item.is_object() {
                        return Self::Invalid(format!("entry {index} is not an object"));
                    }
                    match gate_from_value(item) {
                        Ok(gate) => gates.push(gate),
                        Err(reason) => return Self::Invalid(format!("entry {index}: {reason}")),
                    }
                }
                Self::GateList(gates)
            }
            other => Self::Invalid(format!(
                "expected an object or a list of objects, got {}",
                json_kind(&other)
            )),
        }
    }

    /// The validated gates, in message order. Empty for `Invalid`.
    pub fn into_gates(self) -> Vec<Gate> {
        match self {
            Self::SingleGate(gate) => vec![gate],
            Self::GateList(gates) => gates,
            Self::Invalid(_) => Vec::new(),
        }
    }
}

fn gate_from_value(value: Value) -> Result<Gate, String> {
    let spec: GateSpec = serde_json::from_value(value).map_err(|e| e.to_string())?;
    Gate::try_from(spec).map_err(|e| e.to_string())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Outcome of applying one control-plane message to the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAck {
    Accepted {
        added: Vec<Gate>,
        duplicates: Vec<Gate>,
    },
    Rejected {
        reason: String,
    },
}

impl ControlAck {
    /// Human-readable acknowledgment published on the ack topic.
    pub fn summary(&self) -> String {
        match self {
            Self::Rejected { reason } => {
                format!("rejected: malformed control message: {reason}")
            }
            Self::Accepted { added, duplicates } => {
                let mut out = format!(
                    "accepted: {} added, {} already registered",
                    added.len(),
                    duplicates.len()
                );
                if !added.is_empty() {
                    let _ = write!(out, "; added: {}", join_gates(added));
                }
                if !duplicates.is_empty() {
                    let _ = write!(out, "; already registered: {}", join_gates(duplicates));
                }
                out
            }
        }
    }

    /// Gates that are new to the directory and need a session.
    pub fn added(&self) -> &[Gate] {
        match self {
            Self::Accepted { added, .. } => added,
            Self::Rejected { .. } => &[],
        }
    }
}

fn join_gates(gates: &[Gate]) -> String {
    gates
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
