//! Hardware (MAC) addresses.

use crate::error::NetError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 48-bit hardware address, displayed as lowercase `aa:bb:cc:dd:ee:ff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct HardwareAddress([u8; 6]);

impl HardwareAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Lowercase hex without separators, used as the device identity.
    pub fn key(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xff; 6]
    }
}

impl fmt::Display for HardwareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for HardwareAddress {
    type Err = NetError;

    /// Accepts `:` or `-` separated octets (macOS prints single-digit octets
    /// like `0:1a:2b:3:4:5`), Cisco style `aabb.ccdd.eeff` and bare hex.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || NetError::invalid_format(format!("not a MAC address: {s:?}"));
        let trimmed = s.trim();
        let mut octets = [0u8; 6];

        if trimmed.contains([':', '-']) {
            let mut parts = trimmed.split([':', '-']);
            for slot in octets.iter_mut() {
                let part = parts.next().ok_or_else(invalid)?;
                if part.is_empty() || part.len() > 2 {
                    return Err(invalid());
                }
                *slot = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
            }
            if parts.next().is_some() {
                return Err(invalid());
            }
        } else {
            let hex: String = trimmed.chars().filter(|c| *c != '.').collect();
            if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            for (i, slot) in octets.iter_mut().enumerate() {
                *slot = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
            }
        }

        Ok(Self(octets))
    }
}

impl From<HardwareAddress> for String {
    fn from(mac: HardwareAddress) -> Self {
        mac.to_string()
    }
}

impl TryFrom<String> for HardwareAddress {
    type Error = NetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
