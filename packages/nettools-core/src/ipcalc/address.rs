//! Dotted-decimal <-> 32-bit integer IPv4 codec.

use crate::error::{NetError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// An IPv4 host address held as its 32-bit integer value.
///
/// The canonical string form is four dot-separated octets without leading
/// zeros, so `Address::parse(&a.to_string()) == Ok(a)` and
/// `Address::parse(s)?.to_string() == s` for every accepted `s`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(into = "String", try_from = "String")]
pub struct Address(u32);

impl Address {
    pub const MIN: Address = Address(0);
    pub const MAX: Address = Address(u32::MAX);
    pub const LOCALHOST: Address = Address(0x7F00_0001);

    pub const fn from_u32(value: u32) -> Self {
        Address(value)
    }

    pub const fn to_u32(self) -> u32 {
        self.0
    }

    /// Parse a dotted-decimal string, rejecting anything but four octets 0..255.
    pub fn parse(s: &str) -> Result<Self> {
        let mut octets = [0u8; 4];
        let mut parts = s.split('.');

        for slot in octets.iter_mut() {
            *slot = parts
                .next()
                .and_then(parse_octet)
                .ok_or_else(|| NetError::invalid_format(format!("not an IP address: {s:?}")))?;
        }

        if parts.next().is_some() {
            return Err(NetError::invalid_format(format!(
                "not an IP address: {s:?}"
            )));
        }

        Ok(Address(u32::from_be_bytes(octets)))
    }

    pub fn octets(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// The following address, or `None` at the top of the address space.
    pub fn checked_next(self) -> Option<Address> {
        self.0.checked_add(1).map(Address)
    }

    pub fn is_loopback(self) -> bool {
        self.octets()[0] == 127
    }

    pub fn is_unspecified(self) -> bool {
        self.0 == 0
    }
}

fn parse_octet(part: &str) -> Option<u8> {
    if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // "01" would not survive a format round trip
    if part.len() > 1 && part.starts_with('0') {
        return None;
    }
    part.parse::<u8>().ok()
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.octets();
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

impl FromStr for Address {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self> {
        Address::parse(s)
    }
}

impl From<u32> for Address {
    fn from(value: u32) -> Self {
        Address(value)
    }
}

impl From<Address> for u32 {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl From<Ipv4Addr> for Address {
    fn from(ip: Ipv4Addr) -> Self {
        Address(u32::from(ip))
    }
}

impl From<Address> for Ipv4Addr {
    fn from(address: Address) -> Self {
        Ipv4Addr::from(address.0)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

impl TryFrom<String> for Address {
    type Error = NetError;

    fn try_from(value: String) -> Result<Self> {
        Address::parse(&value)
    }
}

/// Anything that can be turned into an [`Address`].
///
/// Values that already are addresses (or their integer form) pass through
/// unchanged; only strings can fail.
pub trait ToAddress {
    fn to_address(&self) -> Result<Address>;
}

impl ToAddress for Address {
    fn to_address(&self) -> Result<Address> {
        Ok(*self)
    }
}

impl ToAddress for u32 {
    fn to_address(&self) -> Result<Address> {
        Ok(Address(*self))
    }
}

impl ToAddress for Ipv4Addr {
    fn to_address(&self) -> Result<Address> {
        Ok(Address::from(*self))
    }
}

impl ToAddress for str {
    fn to_address(&self) -> Result<Address> {
        Address::parse(self)
    }
}

impl ToAddress for String {
    fn to_address(&self) -> Result<Address> {
        Address::parse(self)
    }
}

impl<T: ToAddress + ?Sized> ToAddress for &T {
    fn to_address(&self) -> Result<Address> {
        (**self).to_address()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_format_round_trip() {
        for s in [
            "0.0.0.0",
            "1.2.3.4",
            "10.0.0.255",
            "192.168.1.1",
            "255.255.255.255",
            "172.16.254.3",
        ] {
            let address = Address::parse(s).unwrap();
            assert_eq!(address.to_string(), s);
            assert_eq!(Address::parse(&address.to_string()).unwrap(), address);
        }
    }

    #[test]
    fn test_integer_values() {
        assert_eq!(Address::parse("0.0.0.1").unwrap().to_u32(), 1);
        assert_eq!(Address::parse("1.0.0.0").unwrap().to_u32(), 1 << 24);
        assert_eq!(
            Address::parse("192.168.1.5").unwrap().to_u32(),
            0xC0A8_0105
        );
        assert_eq!(Address::from_u32(u32::MAX).to_string(), "255.255.255.255");
    }

    #[test]
    fn test_rejects_malformed_strings() {
        for s in [
            "",
            "1.2.3",
            "1.2.3.4.5",
            "256.1.1.1",
            "1.2.3.-4",
            "a.b.c.d",
            "01.2.3.4",
            " 1.2.3.4",
            "1.2.3.4 ",
            "1..3.4",
            "1000.1.1.1",
            "1.2.3.4/24",
        ] {
            let err = Address::parse(s).unwrap_err();
            assert!(matches!(err, NetError::InvalidFormat(_)), "{s:?}");
        }
    }

    #[test]
    fn test_to_address_is_identity_on_canonical_input() {
        let address = Address::from_u32(0x0A00_0001);
        assert_eq!(address.to_address().unwrap(), address);
        assert_eq!(0x0A00_0001u32.to_address().unwrap(), address);
        assert_eq!("10.0.0.1".to_address().unwrap(), address);
        assert_eq!(
            Ipv4Addr::new(10, 0, 0, 1).to_address().unwrap(),
            address
        );
    }

    #[test]
    fn test_serde_uses_dotted_form() {
        let address = Address::parse("10.1.2.3").unwrap();
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, "\"10.1.2.3\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
        assert!(serde_json::from_str::<Address>("\"10.1.2\"").is_err());
    }

    #[test]
    fn test_checked_next_stops_at_top() {
        assert_eq!(
            Address::parse("10.0.0.255").unwrap().checked_next(),
            Some(Address::parse("10.0.1.0").unwrap())
        );
        assert_eq!(Address::MAX.checked_next(), None);
    }
}
