//! Network primitives shared by the topology store and the reconciler.
//!
//! - [`MacAddress`]: 48-bit Ethernet hardware addresses
//! - [`VlanTag`]: IEEE 802.1Q VLAN identifiers, including the untagged VLAN 0
//! - [`IpPrefix`]: an address together with its prefix length (CIDR notation)
//!
//! Every type parses from and displays as its canonical text form, and
//! serializes the same way, so persisted state stays human readable.

mod ip;
mod mac;
mod vlan;

pub use ip::{parse_prefix_len, IpPrefix};
pub use mac::MacAddress;
pub use vlan::VlanTag;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IP prefix format: {0}")]
    InvalidIpPrefix(String),

    #[error("invalid netmask: {0}")]
    InvalidNetmask(String),

    #[error("invalid VLAN tag: {0} (must be 0-4094)")]
    InvalidVlanTag(String),
}
