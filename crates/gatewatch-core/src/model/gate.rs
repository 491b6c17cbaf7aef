use std::fmt;

use gatewatch_api::MacAddress;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A monitored gate. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Gate {
    name: String,
    address: MacAddress,
    topic: String,
}

impl Gate {
    /// Validate and build a gate. Name and topic must be non-empty after
    /// trimming; the address must be six hex octets.
    pub fn new(
        name: impl Into<String>,
        address: &str,
        topic: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let name = name.into().trim().to_owned();
        let topic = topic.into().trim().to_owned();

        if name.is_empty() {
            return Err(CoreError::InvalidGate {
                message: "name must not be empty".into(),
            });
        }
        if topic.is_empty() {
            return Err(CoreError::InvalidGate {
                message: format!("topic for gate '{name}' must not be empty"),
            });
        }
        let address = MacAddress::parse(address).map_err(|e| CoreError::InvalidGate {
            message: format!("gate '{name}': {e}"),
        })?;

        Ok(Self {
            name,
            address,
            topic,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &MacAddress {
        &self.address
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

/// Unvalidated gate as it appears in config files and control messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateSpec {
    pub name: String,
    pub address: String,
    pub topic: String,
}

impl TryFrom<GateSpec> for Gate {
    type Error = CoreError;

    fn try_from(spec: GateSpec) -> Result<Self, Self::Error> {
        Self::new(spec.name, &spec.address, spec.topic)
    }
}

impl From<&Gate> for GateSpec {
    fn from(gate: &Gate) -> Self {
        Self {
            name: gate.name.clone(),
            address: gate.address.to_string(),
            topic: gate.topic.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn builds_normalized_gate() {
        let gate = Gate::new(" gate1 ", "aa:bb:cc:dd:ee:ff", "gate1/ir").unwrap();
        assert_eq!(gate.name(), "gate1");
        assert_eq!(gate.address().as_str(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(gate.topic(), "gate1/ir");
        assert_eq!(gate.to_string(), "gate1 (AA:BB:CC:DD:EE:FF)");
    }

    #[test]
    fn rejects_empty_name() {
        let err = Gate::new("  ", "AA:BB:CC:DD:EE:FF", "t").unwrap_err();
        assert!(err.to_string().contains("name must not be empty"));
    }

    #[test]
    fn rejects_empty_topic() {
        assert!(Gate::new("g", "AA:BB:CC:DD:EE:FF", "").is_err());
    }

    #[test]
    fn rejects_bad_address() {
        let err = Gate::new("g", "AA:BB", "t").unwrap_err();
        assert!(err.to_string().contains("gate 'g'"));
    }

    #[test]
    fn spec_round_trip() {
        let gate = Gate::new("g", "aa-bb-cc-dd-ee-ff", "g/ir").unwrap();
        let spec = GateSpec::from(&gate);
        assert_eq!(spec.address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(Gate::try_from(spec).unwrap(), gate);
    }
}
