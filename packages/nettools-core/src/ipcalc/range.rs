//! Address ranges: enumeration and decomposition into CIDR blocks.

use super::address::{Address, ToAddress};
use super::subnet::{IPV4_BITS, SubnetBlock};
use crate::error::{NetError, Result};
use std::fmt;

/// An inclusive, non-empty range of addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressRange {
    start: Address,
    end: Address,
}

impl AddressRange {
    pub fn new(start: impl ToAddress, end: impl ToAddress) -> Result<Self> {
        let start = start.to_address()?;
        let end = end.to_address()?;
        if end < start {
            return Err(NetError::InvalidRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn end(&self) -> Address {
        self.end
    }

    pub fn len(&self) -> u64 {
        u64::from(self.end.to_u32()) - u64::from(self.start.to_u32()) + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, address: Address) -> bool {
        self.start <= address && address <= self.end
    }

    /// Every address from start to end, ascending. Each call starts over.
    pub fn iter(&self) -> impl Iterator<Item = Address> + Send + use<> {
        (self.start.to_u32()..=self.end.to_u32()).map(Address::from_u32)
    }

    /// The minimal list of maximal CIDR blocks covering exactly this range.
    pub fn blocks(&self) -> Vec<SubnetBlock> {
        decompose(self.start.to_u32(), self.end.to_u32())
    }
}

impl From<SubnetBlock> for AddressRange {
    fn from(block: SubnetBlock) -> Self {
        Self {
            start: block.low,
            end: block.high,
        }
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Enumerate every address between `start` and `end` inclusive.
pub fn enumerate(
    start: impl ToAddress,
    end: impl ToAddress,
) -> Result<impl Iterator<Item = Address>> {
    Ok(AddressRange::new(start, end)?.iter())
}

/// Split `[start, end]` into the ordered sequence of maximal CIDR blocks.
///
/// Fails with [`NetError::InvalidRange`] when `end < start`.
pub fn partition(start: impl ToAddress, end: impl ToAddress) -> Result<Vec<SubnetBlock>> {
    Ok(AddressRange::new(start, end)?.blocks())
}

fn decompose(start: u32, end: u32) -> Vec<SubnetBlock> {
    let mut blocks = Vec::new();
    let mut cursor = start;

    loop {
        let block = largest_block_at(cursor, end);
        blocks.push(block);

        match block.high.to_u32().checked_add(1) {
            Some(next) if next <= end => cursor = next,
            _ => break,
        }
    }

    blocks
}

/// Grow the block starting at `cursor` while it stays aligned and below `end`.
fn largest_block_at(cursor: u32, end: u32) -> SubnetBlock {
    let mut best = SubnetBlock::covering(cursor, IPV4_BITS);
    for prefix in (0..IPV4_BITS).rev() {
        let candidate = SubnetBlock::covering(cursor, prefix);
        if candidate.low.to_u32() != cursor || candidate.high.to_u32() > end {
            break;
        }
        best = candidate;
    }
    best
}
