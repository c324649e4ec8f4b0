//! Subnet model

use crate::{Error, Result};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// RFC 1918 private ranges
pub const PRIVATE_RANGES: [Ipv4Net; 3] = [
    Ipv4Net::new_assert(Ipv4Addr::new(10, 0, 0, 0), 8),
    Ipv4Net::new_assert(Ipv4Addr::new(172, 16, 0, 0), 12),
    Ipv4Net::new_assert(Ipv4Addr::new(192, 168, 0, 0), 16),
];

/// The VPN's routable IPv4 subnet
///
/// Layout:
/// - `network + 1` is the server
/// - `[network + 2, broadcast - 1]` is assignable to peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subnet(Ipv4Net);

impl Subnet {
    /// Wrap a network, clearing host bits
    pub fn new(cidr: Ipv4Net) -> Self {
        Self(cidr.trunc())
    }

    /// Parse CIDR notation, failing with `InvalidSubnet`
    pub fn parse(s: &str) -> Result<Self> {
        let cidr: Ipv4Net = s
            .trim()
            .parse()
            .map_err(|_| Error::InvalidSubnet(format!("'{}' is not valid CIDR notation", s)))?;
        Ok(Self::new(cidr))
    }

    pub fn cidr(&self) -> Ipv4Net {
        self.0
    }

    pub fn prefix_len(&self) -> u8 {
        self.0.prefix_len()
    }

    pub fn network(&self) -> Ipv4Addr {
        self.0.network()
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        self.0.broadcast()
    }

    /// Address occupied by the server (`network + 1`)
    pub fn server_ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network()).wrapping_add(1))
    }

    /// First address assignable to a peer (`network + 2`)
    pub fn first_host(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network()).wrapping_add(2))
    }

    /// Last address assignable to a peer (`broadcast - 1`)
    pub fn last_host(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.broadcast()).wrapping_sub(1))
    }

    /// Total addresses in the block
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix_len()))
    }

    /// Host addresses, excluding network and broadcast (server included)
    pub fn usable_hosts(&self) -> u64 {
        self.size().saturating_sub(2)
    }

    /// Addresses assignable to peers (usable hosts minus the server)
    pub fn peer_capacity(&self) -> u64 {
        self.usable_hosts().saturating_sub(1)
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.0.contains(&ip)
    }

    /// Whether `ip` lies in the peer-assignable range
    pub fn is_assignable(&self, ip: Ipv4Addr) -> bool {
        let ip = u32::from(ip) as u64;
        self.peer_capacity() > 0
            && ip >= u32::from(self.first_host()) as u64
            && ip <= u32::from(self.last_host()) as u64
    }

    /// Peer-assignable addresses in ascending order
    pub fn assignable_hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        let first = u32::from(self.first_host());
        let count = self.peer_capacity();
        (0..count).map(move |offset| Ipv4Addr::from(first + offset as u32))
    }

    /// Whether the subnet lies entirely inside an RFC 1918 range
    pub fn is_private(&self) -> bool {
        PRIVATE_RANGES.iter().any(|range| range.contains(&self.0))
    }

    /// Whether two subnets share any address
    pub fn overlaps(&self, other: &Ipv4Net) -> bool {
        self.0.contains(other) || other.contains(&self.0)
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Subnet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<Ipv4Net> for Subnet {
    fn from(cidr: Ipv4Net) -> Self {
        Self::new(cidr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_24() {
        let subnet = Subnet::parse("10.8.0.0/24").unwrap();
        assert_eq!(subnet.server_ip(), Ipv4Addr::new(10, 8, 0, 1));
        assert_eq!(subnet.first_host(), Ipv4Addr::new(10, 8, 0, 2));
        assert_eq!(subnet.last_host(), Ipv4Addr::new(10, 8, 0, 254));
        assert_eq!(subnet.usable_hosts(), 254);
        assert_eq!(subnet.peer_capacity(), 253);
    }

    #[test]
    fn test_layout_30() {
        let subnet = Subnet::parse("10.8.0.0/30").unwrap();
        assert_eq!(subnet.peer_capacity(), 1);
        let hosts: Vec<_> = subnet.assignable_hosts().collect();
        assert_eq!(hosts, vec![Ipv4Addr::new(10, 8, 0, 2)]);
        assert!(subnet.is_assignable(Ipv4Addr::new(10, 8, 0, 2)));
        assert!(!subnet.is_assignable(Ipv4Addr::new(10, 8, 0, 1)));
        assert!(!subnet.is_assignable(Ipv4Addr::new(10, 8, 0, 3)));
    }

    #[test]
    fn test_tiny_subnets_have_no_peers() {
        for cidr in ["10.8.0.0/31", "10.8.0.0/32"] {
            let subnet = Subnet::parse(cidr).unwrap();
            assert_eq!(subnet.peer_capacity(), 0);
            assert_eq!(subnet.assignable_hosts().count(), 0);
            assert!(!subnet.is_assignable(subnet.network()));
        }
    }

    #[test]
    fn test_host_bits_cleared() {
        let subnet = Subnet::parse("10.8.0.77/24").unwrap();
        assert_eq!(subnet.to_string(), "10.8.0.0/24");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(matches!(Subnet::parse("10.8.0.0"), Err(Error::InvalidSubnet(_))));
        assert!(matches!(Subnet::parse("10.8.0.0/33"), Err(Error::InvalidSubnet(_))));
        assert!(matches!(Subnet::parse("garbage"), Err(Error::InvalidSubnet(_))));
    }

    #[test]
    fn test_private_ranges() {
        assert!(Subnet::parse("10.8.0.0/24").unwrap().is_private());
        assert!(Subnet::parse("172.20.0.0/16").unwrap().is_private());
        assert!(Subnet::parse("192.168.100.0/24").unwrap().is_private());
        assert!(!Subnet::parse("8.8.8.0/24").unwrap().is_private());
        assert!(!Subnet::parse("172.32.0.0/16").unwrap().is_private());
        assert!(!Subnet::parse("10.0.0.0/7").unwrap().is_private());
    }

    #[test]
    fn test_overlaps() {
        let subnet = Subnet::parse("192.168.1.0/24").unwrap();
        assert!(subnet.overlaps(&"192.168.0.0/16".parse().unwrap()));
        assert!(subnet.overlaps(&"192.168.1.128/25".parse().unwrap()));
        assert!(!subnet.overlaps(&"192.168.2.0/24".parse().unwrap()));
    }
}
