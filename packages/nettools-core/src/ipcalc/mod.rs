//! IPv4 arithmetic.
//!
//! - [`Address`] codec between dotted-decimal and integer form
//! - subnet calculator ([`block_for`], [`prefix_from_mask`])
//! - range partitioner ([`partition`]) and enumerator ([`AddressRange`])

mod address;
mod range;
mod subnet;

pub use address::{Address, ToAddress};
pub use range::{AddressRange, enumerate, partition};
pub use subnet::{SubnetBlock, block_for, inverted_mask, mask_for_prefix, prefix_from_mask};
