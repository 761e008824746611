//! IP prefix type with CIDR arithmetic.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// An IP address together with a prefix length (e.g. `10.0.0.5/24`).
///
/// The host bits are preserved: an observed link `10.0.0.5/24` keeps its
/// address, and [`IpPrefix::network`] yields the subnet `10.0.0.0/24`.
///
/// # Examples
///
/// ```
/// use topo_types::IpPrefix;
///
/// let link: IpPrefix = "10.0.0.5/24".parse().unwrap();
/// assert_eq!(link.network().to_string(), "10.0.0.0/24");
/// assert!(link.contains(&"10.0.0.1".parse().unwrap()));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IpPrefix {
    address: IpAddr,
    prefix_len: u8,
}

impl IpPrefix {
    /// Creates a new IP prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix length is invalid for the address type
    /// (>32 for IPv4, >128 for IPv6).
    pub fn new(address: IpAddr, prefix_len: u8) -> Result<Self, ParseError> {
        let max_len = max_prefix_len(&address);
        if prefix_len > max_len {
            return Err(ParseError::InvalidIpPrefix(format!(
                "prefix length {} exceeds maximum {} for {}",
                prefix_len, max_len, address
            )));
        }

        Ok(IpPrefix {
            address,
            prefix_len,
        })
    }

    /// Builds a prefix from an address and a netmask given either as a
    /// prefix length (`"24"`) or, for IPv4, a dotted mask (`"255.255.255.0"`).
    pub fn with_netmask(address: IpAddr, netmask: &str) -> Result<Self, ParseError> {
        let prefix_len = parse_prefix_len(&address, netmask)?;
        IpPrefix::new(address, prefix_len)
    }

    pub const fn address(&self) -> IpAddr {
        self.address
    }

    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub const fn is_ipv4(&self) -> bool {
        self.address.is_ipv4()
    }

    /// Returns true for /32 (IPv4) and /128 (IPv6) prefixes.
    pub fn is_host_route(&self) -> bool {
        self.prefix_len == max_prefix_len(&self.address)
    }

    /// Returns the same prefix with all host bits cleared.
    pub fn network(&self) -> IpPrefix {
        let address = match self.address {
            IpAddr::V4(v4) => {
                let mask = mask_v4(self.prefix_len);
                IpAddr::V4(Ipv4Addr::from(u32::from(v4) & mask))
            }
            IpAddr::V6(v6) => {
                let mask = mask_v6(self.prefix_len);
                IpAddr::V6(Ipv6Addr::from(u128::from(v6) & mask))
            }
        };
        IpPrefix {
            address,
            prefix_len: self.prefix_len,
        }
    }

    /// Returns true if `ip` falls inside this prefix's network.
    ///
    /// Addresses of the other family are never contained.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.address, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = mask_v4(self.prefix_len);
                u32::from(net) & mask == u32::from(*ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = mask_v6(self.prefix_len);
                u128::from(net) & mask == u128::from(*ip) & mask
            }
            _ => false,
        }
    }
}

/// Parses a netmask into a prefix length for `address`'s family.
///
/// Accepts a decimal prefix length or, for IPv4, a contiguous dotted mask.
pub fn parse_prefix_len(address: &IpAddr, netmask: &str) -> Result<u8, ParseError> {
    let netmask = netmask.trim();
    let invalid = || ParseError::InvalidNetmask(netmask.to_string());

    if let Ok(len) = netmask.parse::<u8>() {
        return if len <= max_prefix_len(address) {
            Ok(len)
        } else {
            Err(invalid())
        };
    }

    match (address, netmask.parse::<Ipv4Addr>()) {
        (IpAddr::V4(_), Ok(mask)) => {
            let bits = u32::from(mask);
            let ones = bits.leading_ones();
            if ones + bits.trailing_zeros() == 32 {
                u8::try_from(ones).map_err(|_| invalid())
            } else {
                Err(invalid())
            }
        }
        _ => Err(invalid()),
    }
}

fn max_prefix_len(address: &IpAddr) -> u8 {
    match address {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn mask_v4(prefix_len: u8) -> u32 {
    u32::MAX
        .checked_shl(32 - u32::from(prefix_len))
        .unwrap_or(0)
}

fn mask_v6(prefix_len: u8) -> u128 {
    u128::MAX
        .checked_shl(128 - u32::from(prefix_len))
        .unwrap_or(0)
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for IpPrefix {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_str, len_str) = s
            .trim()
            .rsplit_once('/')
            .ok_or_else(|| ParseError::InvalidIpPrefix(s.to_string()))?;

        let address: IpAddr = addr_str
            .parse()
            .map_err(|_| ParseError::InvalidIpAddress(addr_str.to_string()))?;
        let prefix_len: u8 = len_str
            .parse()
            .map_err(|_| ParseError::InvalidIpPrefix(s.to_string()))?;

        IpPrefix::new(address, prefix_len)
    }
}

impl TryFrom<String> for IpPrefix {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<IpPrefix> for String {
    fn from(prefix: IpPrefix) -> String {
        prefix.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_ip_prefix_parse() {
        let prefix: IpPrefix = "10.0.0.5/24".parse().unwrap();
        assert!(prefix.is_ipv4());
        assert_eq!(prefix.prefix_len(), 24);
        assert_eq!(prefix.address(), ip("10.0.0.5"));

        let v6: IpPrefix = "2001:db8::1/64".parse().unwrap();
        assert!(!v6.is_ipv4());
        assert_eq!(v6.network().to_string(), "2001:db8::/64");
    }

    #[test]
    fn test_network_masks_host_bits() {
        let prefix: IpPrefix = "192.168.17.200/20".parse().unwrap();
        assert_eq!(prefix.network().to_string(), "192.168.16.0/20");

        let all: IpPrefix = "10.1.2.3/0".parse().unwrap();
        assert_eq!(all.network().to_string(), "0.0.0.0/0");

        let host: IpPrefix = "10.1.2.3/32".parse().unwrap();
        assert_eq!(host.network(), host);
        assert!(host.is_host_route());
    }

    #[test]
    fn test_contains() {
        let subnet: IpPrefix = "10.0.0.0/24".parse().unwrap();
        assert!(subnet.contains(&ip("10.0.0.1")));
        assert!(subnet.contains(&ip("10.0.0.255")));
        assert!(!subnet.contains(&ip("10.0.1.1")));
        assert!(!subnet.contains(&ip("::1")));

        let v6: IpPrefix = "fd00::/8".parse().unwrap();
        assert!(v6.contains(&ip("fd12::1")));
        assert!(!v6.contains(&ip("fe80::1")));
    }

    #[test]
    fn test_netmask_forms() {
        let addr = ip("10.0.0.5");
        assert_eq!(parse_prefix_len(&addr, "24"), Ok(24));
        assert_eq!(parse_prefix_len(&addr, "255.255.255.0"), Ok(24));
        assert_eq!(parse_prefix_len(&addr, "255.255.255.255"), Ok(32));
        assert_eq!(parse_prefix_len(&addr, "0.0.0.0"), Ok(0));
        assert!(parse_prefix_len(&addr, "255.0.255.0").is_err());
        assert!(parse_prefix_len(&addr, "33").is_err());
        assert!(parse_prefix_len(&ip("::1"), "255.255.255.0").is_err());
        assert_eq!(parse_prefix_len(&ip("::1"), "128"), Ok(128));

        let prefix = IpPrefix::with_netmask(addr, "255.255.0.0").unwrap();
        assert_eq!(prefix.to_string(), "10.0.0.5/16");
    }

    #[test]
    fn test_invalid_prefix() {
        assert!("10.0.0.0/33".parse::<IpPrefix>().is_err());
        assert!("2001:db8::/129".parse::<IpPrefix>().is_err());
        assert!("10.0.0.0".parse::<IpPrefix>().is_err());
        assert!("ten/8".parse::<IpPrefix>().is_err());
    }

    #[test]
    fn test_ordering_is_stable() {
        let mut prefixes: Vec<IpPrefix> = ["10.0.1.0/24", "10.0.0.0/24", "10.0.0.0/16"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        prefixes.sort();
        let rendered: Vec<String> = prefixes.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["10.0.0.0/16", "10.0.0.0/24", "10.0.1.0/24"]);
    }
}
