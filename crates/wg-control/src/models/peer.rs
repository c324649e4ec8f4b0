//! Peer records and their address allocations

use crate::defaults::{MAX_NAME_LENGTH, RESERVED_NAMES};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::OnceLock;

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static pattern compiles"))
}

/// Check a peer name against the format and the reserved set
///
/// Names are 1 to 50 characters of ASCII letters, digits, `_` and `-`.
/// Reserved names are rejected regardless of case.
pub fn validate_peer_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidName("name cannot be empty".to_string()));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(Error::InvalidName(format!(
            "'{}' exceeds {} characters",
            name, MAX_NAME_LENGTH
        )));
    }
    if !name_pattern().is_match(name) {
        return Err(Error::InvalidName(format!(
            "'{}' may only contain letters, digits, '_' and '-'",
            name
        )));
    }
    let lowered = name.to_ascii_lowercase();
    if RESERVED_NAMES.contains(&lowered.as_str()) {
        return Err(Error::InvalidName(format!("'{}' is a reserved name", name)));
    }
    Ok(())
}

/// A participant authorized to establish a tunnel with the server
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub name: String,
    pub ip: Ipv4Addr,
    pub private_key: String,
    pub public_key: String,
    pub preshared_key: String,
    pub created: DateTime<Utc>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Peer {
    /// Build an enabled peer created now
    pub fn new(
        name: impl Into<String>,
        ip: Ipv4Addr,
        private_key: impl Into<String>,
        public_key: impl Into<String>,
        preshared_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            ip,
            private_key: private_key.into(),
            public_key: public_key.into(),
            preshared_key: preshared_key.into(),
            created: Utc::now(),
            enabled: true,
        }
    }

    /// Allocation record matching this peer
    pub fn allocation(&self) -> IpAllocation {
        IpAllocation {
            ip: self.ip,
            name: self.name.clone(),
            assigned_at: self.created,
        }
    }
}

// Key material stays out of logs
impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("name", &self.name)
            .field("ip", &self.ip)
            .field("public_key", &self.public_key)
            .field("private_key", &"[REDACTED]")
            .field("preshared_key", &"[REDACTED]")
            .field("created", &self.created)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Mapping from an address to the peer holding it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAllocation {
    pub ip: Ipv4Addr,
    pub name: String,
    pub assigned_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        for name in ["alice", "Bob_2", "laptop-home", "a", &"x".repeat(50)] {
            assert!(validate_peer_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_invalid_names() {
        for name in ["", "has space", "dot.ted", "émile", &"x".repeat(51)] {
            assert!(
                matches!(validate_peer_name(name), Err(Error::InvalidName(_))),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_reserved_names_any_case() {
        for name in ["server", "Server", "ADMIN", "root", "System", "ghost", "MultiHop"] {
            assert!(matches!(
                validate_peer_name(name),
                Err(Error::InvalidName(_))
            ));
        }
    }

    #[test]
    fn test_debug_redacts_keys() {
        let peer = Peer::new(
            "alice",
            Ipv4Addr::new(10, 8, 0, 2),
            "PRIVATE_KEY_MATERIAL",
            "public",
            "PRESHARED_KEY_MATERIAL",
        );
        let rendered = format!("{:?}", peer);
        assert!(!rendered.contains("PRIVATE_KEY_MATERIAL"));
        assert!(!rendered.contains("PRESHARED_KEY_MATERIAL"));
        assert!(rendered.contains("alice"));
    }

    #[test]
    fn test_allocation_matches_peer() {
        let peer = Peer::new("alice", Ipv4Addr::new(10, 8, 0, 2), "k", "p", "s");
        let allocation = peer.allocation();
        assert_eq!(allocation.ip, peer.ip);
        assert_eq!(allocation.name, "alice");
    }

    #[test]
    fn test_enabled_defaults_when_missing() {
        let json = r#"{"name":"a","ip":"10.8.0.2","private_key":"k","public_key":"p",
            "preshared_key":"s","created":"2024-01-01T00:00:00Z"}"#;
        let peer: Peer = serde_json::from_str(json).unwrap();
        assert!(peer.enabled);
    }
}
