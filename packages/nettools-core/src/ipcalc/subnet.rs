//! Subnet calculator: prefix lengths, masks and covering blocks.

use super::address::{Address, ToAddress};
use super::range::AddressRange;
use crate::error::{NetError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const IPV4_BITS: u8 = 32;

/// A power-of-two aligned block of addresses.
///
/// Always satisfies `low = address & mask`, `high = low | inverted_mask`,
/// `mask | inverted_mask = 0xFFFFFFFF` and `mask & inverted_mask = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetBlock {
    pub low: Address,
    pub high: Address,
    pub prefix_length: u8,
    pub mask: Address,
    pub inverted_mask: Address,
}

impl SubnetBlock {
    /// Build the block for an address; `prefix_length` must already be <= 32.
    pub(crate) fn covering(address: u32, prefix_length: u8) -> Self {
        let mask = prefix_mask(prefix_length);
        let inverted = !mask;
        let low = address & mask;
        Self {
            low: Address::from_u32(low),
            high: Address::from_u32(low | inverted),
            prefix_length,
            mask: Address::from_u32(mask),
            inverted_mask: Address::from_u32(inverted),
        }
    }

    pub fn contains(&self, address: Address) -> bool {
        self.low <= address && address <= self.high
    }

    /// Number of addresses in the block (2^32 for a /0).
    pub fn size(&self) -> u64 {
        u64::from(self.inverted_mask.to_u32()) + 1
    }

    pub fn addresses(&self) -> AddressRange {
        AddressRange::from(*self)
    }
}

impl fmt::Display for SubnetBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.low, self.prefix_length)
    }
}

impl FromStr for SubnetBlock {
    type Err = NetError;

    /// Parse `a.b.c.d/n`; the address does not need to be the network address.
    fn from_str(s: &str) -> Result<Self> {
        let (address, prefix) = s
            .split_once('/')
            .ok_or_else(|| NetError::invalid_format(format!("not a CIDR block: {s:?}")))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| NetError::invalid_format(format!("bad prefix length in {s:?}")))?;
        block_for(address, prefix)
    }
}

fn prefix_mask(prefix_length: u8) -> u32 {
    match prefix_length {
        0 => 0,
        n => u32::MAX << (IPV4_BITS - n),
    }
}

fn check_prefix(prefix_length: u8) -> Result<u8> {
    if prefix_length > IPV4_BITS {
        return Err(NetError::invalid_format(format!(
            "prefix length {prefix_length} is larger than {IPV4_BITS}"
        )));
    }
    Ok(prefix_length)
}

/// The mask with the top `prefix_length` bits set.
pub fn mask_for_prefix(prefix_length: u8) -> Result<Address> {
    let prefix_length = check_prefix(prefix_length)?;
    Ok(Address::from_u32(prefix_mask(prefix_length)))
}

/// The mask with the bottom `32 - prefix_length` bits set.
pub fn inverted_mask(prefix_length: u8) -> Result<Address> {
    let prefix_length = check_prefix(prefix_length)?;
    Ok(Address::from_u32(!prefix_mask(prefix_length)))
}

/// The block of the given prefix length that contains `address`.
pub fn block_for(address: impl ToAddress, prefix_length: u8) -> Result<SubnetBlock> {
    let address = address.to_address()?;
    let prefix_length = check_prefix(prefix_length)?;
    Ok(SubnetBlock::covering(address.to_u32(), prefix_length))
}

/// Derive the prefix length from a subnet mask and return the covering block.
///
/// Bits are accepted from the top while the accumulated prefix stays a subset
/// of `subnet_mask`; the first rejected bit ends the prefix. A non-contiguous
/// mask such as `255.0.255.0` therefore yields a /8.
pub fn prefix_from_mask(
    address: impl ToAddress,
    subnet_mask: impl ToAddress,
) -> Result<SubnetBlock> {
    let address = address.to_address()?;
    let subnet_mask = subnet_mask.to_address()?.to_u32();

    let mut accepted: u8 = 0;
    let mut prefix: u32 = 0;
    for bit in 0..IPV4_BITS {
        let candidate = prefix | (1u32 << (IPV4_BITS - (bit + 1)));
        if subnet_mask & candidate != candidate {
            break;
        }
        prefix = candidate;
        accepted = bit + 1;
    }

    Ok(SubnetBlock::covering(address.to_u32(), accepted))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    #[test]
    fn test_masks() {
        assert_eq!(mask_for_prefix(0).unwrap(), addr("0.0.0.0"));
        assert_eq!(mask_for_prefix(8).unwrap(), addr("255.0.0.0"));
        assert_eq!(mask_for_prefix(24).unwrap(), addr("255.255.255.0"));
        assert_eq!(mask_for_prefix(32).unwrap(), addr("255.255.255.255"));
        assert_eq!(inverted_mask(0).unwrap(), addr("255.255.255.255"));
        assert_eq!(inverted_mask(24).unwrap(), addr("0.0.0.255"));
        assert_eq!(inverted_mask(32).unwrap(), addr("0.0.0.0"));
        assert!(mask_for_prefix(33).is_err());
        assert!(inverted_mask(40).is_err());
    }

    #[test]
    fn test_block_invariants_hold_for_every_prefix() {
        let address = addr("172.20.99.201");
        for prefix in 0..=32 {
            let block = block_for(address, prefix).unwrap();
            let mask = block.mask.to_u32();
            let inverted = block.inverted_mask.to_u32();
            assert_eq!(mask | inverted, u32::MAX);
            assert_eq!(mask & inverted, 0);
            assert_eq!(block.low.to_u32(), address.to_u32() & mask);
            assert_eq!(block.high.to_u32(), block.low.to_u32() | inverted);
            assert!(block.contains(address));
        }
    }

    #[test]
    fn test_block_for_slash_24() {
        let block = block_for("192.168.1.77", 24).unwrap();
        assert_eq!(block.low, addr("192.168.1.0"));
        assert_eq!(block.high, addr("192.168.1.255"));
        assert_eq!(block.size(), 256);
        assert_eq!(block.to_string(), "192.168.1.0/24");
    }

    #[test]
    fn test_prefix_from_mask() {
        let block = prefix_from_mask("192.168.1.5", "255.255.255.0").unwrap();
        assert_eq!(block.prefix_length, 24);
        assert_eq!(block.low, addr("192.168.1.0"));
        assert_eq!(block.high, addr("192.168.1.255"));

        let block = prefix_from_mask("10.11.12.13", "255.255.240.0").unwrap();
        assert_eq!(block.prefix_length, 20);
        assert_eq!(block.low, addr("10.11.0.0"));

        assert_eq!(
            prefix_from_mask("10.0.0.1", "0.0.0.0").unwrap().prefix_length,
            0
        );
        assert_eq!(
            prefix_from_mask("10.0.0.1", "255.255.255.255")
                .unwrap()
                .prefix_length,
            32
        );
    }

    #[test]
    fn test_prefix_from_non_contiguous_mask_stops_at_first_gap() {
        let block = prefix_from_mask("10.1.2.3", "255.0.255.0").unwrap();
        assert_eq!(block.prefix_length, 8);
        assert_eq!(block.low, addr("10.0.0.0"));
    }

    #[test]
    fn test_prefix_from_mask_rejects_garbage() {
        assert!(matches!(
            prefix_from_mask("10.0.0", "255.255.255.0"),
            Err(NetError::InvalidFormat(_))
        ));
        assert!(matches!(
            prefix_from_mask("10.0.0.1", "255.255.255"),
            Err(NetError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_parse_cidr() {
        let block: SubnetBlock = "10.0.5.9/16".parse().unwrap();
        assert_eq!(block.low, addr("10.0.0.0"));
        assert_eq!(block.high, addr("10.0.255.255"));
        assert!("10.0.5.9".parse::<SubnetBlock>().is_err());
        assert!("10.0.5.9/33".parse::<SubnetBlock>().is_err());
    }
}
