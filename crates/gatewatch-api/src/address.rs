// ── Hardware address ──
//
// Every gate is keyed by its BLE hardware address. Scanners report the
// same device in different spellings depending on the platform, so all
// comparisons go through the normalized form.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AddressError;

/// BLE hardware address, normalized to upper-case colon-separated form
/// (`AA:BB:CC:DD:EE:FF`).
///
/// Accepts colon-separated, dash-separated, or bare 12-digit hex input in
/// any case. Anything that is not six hex octets is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress(String);

impl MacAddress {
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, AddressError> {
        let trimmed = raw.as_ref().trim();
        let upper = trimmed.to_ascii_uppercase().replace('-', ":");

        let octets: Vec<String> = if upper.contains(':') {
            upper.split(':').map(str::to_owned).collect()
        } else if upper.len() == 12 && upper.is_ascii() {
            (0..6).map(|i| upper[i * 2..i * 2 + 2].to_owned()).collect()
        } else {
            Vec::new()
        };

        let well_formed = octets.len() == 6
            && octets
                .iter()
                .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));
        if !well_formed {
            return Err(AddressError {
                raw: trimmed.to_owned(),
            });
        }

        Ok(Self(octets.join(":")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case- and separator-insensitive comparison against a raw scanner string.
    pub fn matches(&self, raw: &str) -> bool {
        Self::parse(raw).is_ok_and(|other| other == *self)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MacAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MacAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<MacAddress> for String {
    fn from(value: MacAddress) -> Self {
        value.0
    }
}
