//! Subnet change planning
//!
//! Pure checks and the address mapping. Nothing here touches the host.

use crate::defaults;
use crate::models::{Peer, Subnet};
use crate::system::{MainInterface, NetworkConflict};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Overlay and connection state that blocks or warns about a change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Blockers {
    pub ghost_mode_active: bool,
    pub multihop_active: bool,
    pub active_connections: bool,
}

impl Blockers {
    /// Errors for the blocking overlays
    pub fn errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.ghost_mode_active {
            errors.push("Ghost Mode is active. Disable it before changing subnet.".to_string());
        }
        if self.multihop_active {
            errors.push("Multihop is active. Disable it before changing subnet.".to_string());
        }
        errors
    }
}

/// A peer's place in the current subnet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerAddress {
    pub name: String,
    pub ip: Ipv4Addr,
    pub created: DateTime<Utc>,
}

/// Current addressing as reported by `analyze`
#[derive(Debug, Clone, Serialize)]
pub struct SubnetAnalysis {
    pub current_subnet: Subnet,
    pub subnet_size: u64,
    pub usable_hosts: u64,
    pub server_ip: Ipv4Addr,
    pub total_peers: usize,
    pub active_peers: usize,
    pub main_interface: Option<MainInterface>,
    pub blockers: Blockers,
    pub warnings: Vec<String>,
    pub peers: Vec<PeerAddress>,
}

/// Outcome of a single validation check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResult {
    pub fn pass() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
        }
    }
}

/// Every check run by `validate`, reported independently
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationChecks {
    pub subnet_size: CheckResult,
    pub private_subnet: CheckResult,
    pub capacity: CheckResult,
    /// `None` when blocker checks were skipped
    pub blockers: Option<CheckResult>,
    pub network_conflicts: CheckResult,
}

/// Verdict on a proposed subnet
#[derive(Debug, Clone, Serialize)]
pub struct SubnetValidation {
    pub new_subnet: Subnet,
    pub current_subnet: Subnet,
    pub valid: bool,
    pub checks: ValidationChecks,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub network_conflicts: Vec<NetworkConflict>,
    /// Preview of the address moves, present only when valid
    pub ip_mapping: Option<IpMapping>,
}

/// One peer's move to the new subnet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerMove {
    pub name: String,
    pub old_ip: Ipv4Addr,
    pub new_ip: Ipv4Addr,
}

/// Address mapping for a subnet change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpMapping {
    pub old_server_ip: Ipv4Addr,
    pub new_server_ip: Ipv4Addr,
    /// Ordered by old address
    pub peers: Vec<PeerMove>,
}

impl IpMapping {
    /// Pack peers into `new`, in ascending order of their current address,
    /// starting at `new.network + 2`
    pub fn compute(old: &Subnet, new: &Subnet, peers: &[Peer]) -> Result<Self> {
        let mut ordered: Vec<&Peer> = peers.iter().collect();
        ordered.sort_by_key(|peer| u32::from(peer.ip));

        let mut hosts = new.assignable_hosts();
        let mut moves = Vec::with_capacity(ordered.len());
        for peer in ordered {
            let new_ip = hosts.next().ok_or_else(|| {
                Error::CapacityExceeded(format!(
                    "{} cannot hold {} peers ({} assignable addresses)",
                    new,
                    peers.len(),
                    new.peer_capacity()
                ))
            })?;
            moves.push(PeerMove {
                name: peer.name.clone(),
                old_ip: peer.ip,
                new_ip,
            });
        }

        Ok(Self {
            old_server_ip: old.server_ip(),
            new_server_ip: new.server_ip(),
            peers: moves,
        })
    }

    /// New address per peer name, as taken by the peer store
    pub fn by_name(&self) -> HashMap<String, Ipv4Addr> {
        self.peers
            .iter()
            .map(|m| (m.name.clone(), m.new_ip))
            .collect()
    }

    /// New address per old address, server included
    pub fn by_address(&self) -> HashMap<Ipv4Addr, Ipv4Addr> {
        let mut map: HashMap<Ipv4Addr, Ipv4Addr> =
            self.peers.iter().map(|m| (m.old_ip, m.new_ip)).collect();
        map.insert(self.old_server_ip, self.new_server_ip);
        map
    }
}

/// Prefix no longer than /30 and room for every peer, the server and one more
pub fn check_size(new: &Subnet, peer_count: usize) -> CheckResult {
    if new.prefix_len() > defaults::MAX_PREFIX_LEN {
        return CheckResult::fail(format!(
            "Subnet /{} is too small. Use a prefix of /{} or shorter.",
            new.prefix_len(),
            defaults::MAX_PREFIX_LEN
        ));
    }
    let required = peer_count as u64 + 2;
    if new.usable_hosts() < required {
        return CheckResult::fail(format!(
            "Subnet {} has {} usable addresses but {} are required for {} peers.",
            new,
            new.usable_hosts(),
            required,
            peer_count
        ));
    }
    CheckResult::pass()
}

/// Inside 10.0.0.0/8, 172.16.0.0/12 or 192.168.0.0/16
pub fn check_private(new: &Subnet) -> CheckResult {
    if new.is_private() {
        CheckResult::pass()
    } else {
        CheckResult::fail(format!(
            "Subnet {} is not an RFC 1918 private range. Use 10.0.0.0/8, 172.16.0.0/12 or 192.168.0.0/16.",
            new
        ))
    }
}

/// Usable hosts cover the current peer count plus headroom
pub fn check_capacity(new: &Subnet, peer_count: usize) -> CheckResult {
    let required = (peer_count as u64 * defaults::CAPACITY_HEADROOM_PERCENT).div_ceil(100);
    if new.usable_hosts() < required {
        CheckResult::fail(format!(
            "Subnet {} has {} usable addresses; at least {} are needed for {} peers plus growth.",
            new,
            new.usable_hosts(),
            required,
            peer_count
        ))
    } else {
        CheckResult::pass()
    }
}

pub fn check_conflicts(new: &Subnet, conflicts: &[NetworkConflict]) -> CheckResult {
    if conflicts.is_empty() {
        return CheckResult::pass();
    }
    let listed: Vec<String> = conflicts
        .iter()
        .map(|c| format!("{} on {}", c.network, c.interface))
        .collect();
    CheckResult::fail(format!(
        "Subnet {} conflicts with host networks: {}",
        new,
        listed.join(", ")
    ))
}

pub fn check_blockers(blockers: &Blockers) -> CheckResult {
    let errors = blockers.errors();
    if errors.is_empty() {
        CheckResult::pass()
    } else {
        CheckResult::fail(errors.join(" "))
    }
}

/// Warnings raised by `analyze`
pub fn analysis_warnings(blockers: &Blockers, active_peers: usize) -> Vec<String> {
    let mut warnings = blockers.errors();
    if blockers.active_connections {
        warnings.push(format!(
            "{} active connections will be interrupted by a subnet change.",
            active_peers
        ));
    }
    warnings
}

/// Warnings raised by `validate`
pub fn validation_warnings(current: &Subnet, new: &Subnet, active_peers: usize) -> Vec<String> {
    let mut warnings = Vec::new();
    if active_peers > 0 {
        warnings.push(format!(
            "There are {} active connections that will be disconnected.",
            active_peers
        ));
    }
    if new.prefix_len() > current.prefix_len() {
        warnings.push(
            "New subnet is smaller than current subnet. Ensure all peers can be accommodated."
                .to_string(),
        );
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subnet(cidr: &str) -> Subnet {
        Subnet::parse(cidr).unwrap()
    }

    fn peer(name: &str, ip: &str) -> Peer {
        Peer::new(
            name,
            ip.parse().unwrap(),
            "priv".repeat(11),
            "pub_".repeat(11),
            "psk_".repeat(11),
        )
    }

    #[test]
    fn test_size_rejects_31_and_32() {
        assert!(!check_size(&subnet("10.0.0.0/31"), 0).valid);
        assert!(!check_size(&subnet("10.0.0.0/32"), 0).valid);
        assert!(check_size(&subnet("10.0.0.0/30"), 0).valid);
    }

    #[test]
    fn test_size_requires_room_for_growth() {
        // /29 has 6 usable addresses
        assert!(check_size(&subnet("10.0.0.0/29"), 4).valid);
        assert!(!check_size(&subnet("10.0.0.0/29"), 5).valid);
    }

    #[test]
    fn test_private_check_cites_rfc_1918() {
        let result = check_private(&subnet("8.8.8.0/24"));
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("RFC 1918"));
        assert!(check_private(&subnet("172.16.5.0/24")).valid);
    }

    #[test]
    fn test_capacity_headroom() {
        // 5 peers need ceil(6.0) = 6 usable hosts; /29 has exactly 6
        assert!(check_capacity(&subnet("10.0.0.0/29"), 5).valid);
        // 6 peers need ceil(7.2) = 8
        assert!(!check_capacity(&subnet("10.0.0.0/29"), 6).valid);
        assert!(check_capacity(&subnet("10.0.0.0/28"), 6).valid);
        assert!(check_capacity(&subnet("10.0.0.0/30"), 0).valid);
    }

    #[test]
    fn test_blockers() {
        let none = Blockers::default();
        assert!(check_blockers(&none).valid);

        let ghost = Blockers {
            ghost_mode_active: true,
            ..Default::default()
        };
        let result = check_blockers(&ghost);
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("Ghost Mode is active"));

        // Live connections only warn
        let busy = Blockers {
            active_connections: true,
            ..Default::default()
        };
        assert!(check_blockers(&busy).valid);
        assert_eq!(analysis_warnings(&busy, 3).len(), 1);
    }

    #[test]
    fn test_validation_warnings() {
        let warnings = validation_warnings(&subnet("10.8.0.0/24"), &subnet("10.9.0.0/26"), 2);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("2 active connections"));
        assert!(validation_warnings(&subnet("10.8.0.0/24"), &subnet("10.9.0.0/16"), 0).is_empty());
    }

    #[test]
    fn test_mapping_sorted_by_current_ip() {
        let peers = vec![
            peer("c", "10.8.0.9"),
            peer("a", "10.8.0.2"),
            peer("b", "10.8.0.30"),
        ];
        let mapping =
            IpMapping::compute(&subnet("10.8.0.0/24"), &subnet("192.168.100.0/24"), &peers)
                .unwrap();

        assert_eq!(mapping.old_server_ip, Ipv4Addr::new(10, 8, 0, 1));
        assert_eq!(mapping.new_server_ip, Ipv4Addr::new(192, 168, 100, 1));
        let moved: Vec<(&str, Ipv4Addr)> = mapping
            .peers
            .iter()
            .map(|m| (m.name.as_str(), m.new_ip))
            .collect();
        assert_eq!(
            moved,
            vec![
                ("a", Ipv4Addr::new(192, 168, 100, 2)),
                ("c", Ipv4Addr::new(192, 168, 100, 3)),
                ("b", Ipv4Addr::new(192, 168, 100, 4)),
            ]
        );

        let by_address = mapping.by_address();
        assert_eq!(by_address.len(), 4);
        assert_eq!(
            by_address[&Ipv4Addr::new(10, 8, 0, 1)],
            Ipv4Addr::new(192, 168, 100, 1)
        );
        assert_eq!(mapping.by_name()["b"], Ipv4Addr::new(192, 168, 100, 4));
    }

    #[test]
    fn test_mapping_is_a_bijection() {
        let cases = [
            ("10.8.0.0/24", "10.9.0.0/24", 50),
            ("10.8.0.0/24", "172.16.0.0/28", 13),
            ("10.8.0.0/16", "192.168.0.0/30", 1),
            ("10.8.0.0/24", "10.8.0.0/24", 0),
        ];
        for (old, new, count) in cases {
            let old = subnet(old);
            let new = subnet(new);
            let peers: Vec<Peer> = old
                .assignable_hosts()
                .step_by(3)
                .take(count)
                .enumerate()
                .map(|(i, ip)| peer(&format!("p{}", i), &ip.to_string()))
                .collect();
            assert_eq!(peers.len(), count);

            let mapping = IpMapping::compute(&old, &new, &peers).unwrap();
            let mut targets: Vec<u32> = mapping.peers.iter().map(|m| u32::from(m.new_ip)).collect();
            let expected: Vec<u32> = new.assignable_hosts().take(count).map(u32::from).collect();
            targets.sort_unstable();
            assert_eq!(targets, expected);
            assert!(mapping.peers.iter().all(|m| new.is_assignable(m.new_ip)));
        }
    }

    #[test]
    fn test_mapping_capacity_exceeded() {
        let peers = vec![peer("a", "10.8.0.2"), peer("b", "10.8.0.3")];
        let err = IpMapping::compute(&subnet("10.8.0.0/24"), &subnet("10.9.0.0/30"), &peers)
            .unwrap_err();
        assert_eq!(err.code(), "CAPACITY_EXCEEDED");
    }
}
