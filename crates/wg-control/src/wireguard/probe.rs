//! Connection probe
//!
//! Parses `wg show <iface>` into a structured view and decides which peers
//! are currently connected from their latest handshake.

use super::tool::WgTool;
use crate::models::Peer;
use crate::Result;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, instrument};

fn transfer_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d+(?:\.\d+)?)\s+(\w+)\s+received,\s+(\d+(?:\.\d+)?)\s+(\w+)\s+sent")
            .expect("static pattern compiles")
    })
}

fn handshake_field_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\d+)\s+(year|day|hour|minute|second)s?\b").expect("static pattern compiles")
    })
}

/// Byte count for `value` in `unit`
///
/// Binary units (KiB..TiB) are powers of 1024, decimal units (KB..TB) powers
/// of 1000. Unknown units leave the value unchanged. Fractions are truncated.
pub fn bytes_from_unit(value: f64, unit: &str) -> u64 {
    let multiplier: f64 = match unit.to_ascii_uppercase().as_str() {
        "B" => 1.0,
        "KIB" => 1024.0,
        "MIB" => 1024.0 * 1024.0,
        "GIB" => 1024.0 * 1024.0 * 1024.0,
        "TIB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        _ => 1.0,
    };
    (value * multiplier) as u64
}

/// Traffic counters of one peer
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Transfer {
    /// As printed, e.g. `38.02 MiB`
    pub received: String,
    pub sent: String,
    pub received_bytes: u64,
    pub sent_bytes: u64,
}

impl Transfer {
    /// Parse `"38.02 MiB received, 6.41 MiB sent"`
    pub fn parse(line: &str) -> Option<Self> {
        let caps = transfer_pattern().captures(line.trim())?;
        let rx_value: f64 = caps[1].parse().ok()?;
        let tx_value: f64 = caps[3].parse().ok()?;
        Some(Self {
            received: format!("{} {}", &caps[1], &caps[2]),
            sent: format!("{} {}", &caps[3], &caps[4]),
            received_bytes: bytes_from_unit(rx_value, &caps[2]),
            sent_bytes: bytes_from_unit(tx_value, &caps[4]),
        })
    }
}

/// Seconds since the handshake described by WireGuard's human format
///
/// `"Now"` is zero. Returns `None` when no year/day/hour/minute/second field
/// can be found.
pub fn handshake_age_secs(handshake: &str) -> Option<u64> {
    let handshake = handshake.trim();
    if handshake.eq_ignore_ascii_case("now") {
        return Some(0);
    }
    let mut total: u64 = 0;
    let mut matched = false;
    for caps in handshake_field_pattern().captures_iter(handshake) {
        let amount: u64 = caps[1].parse().ok()?;
        let unit: u64 = match &caps[2] {
            "year" => 365 * 24 * 60 * 60,
            "day" => 24 * 60 * 60,
            "hour" => 60 * 60,
            "minute" => 60,
            _ => 1,
        };
        total = total.saturating_add(amount.saturating_mul(unit));
        matched = true;
    }
    matched.then_some(total)
}

/// Whether a handshake string denotes a live connection
pub fn is_recent_handshake(handshake: &str, threshold: Duration) -> bool {
    handshake_age_secs(handshake).is_some_and(|age| age < threshold.as_secs())
}

/// Interface block of `wg show`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WgInterface {
    pub name: String,
    pub public_key: Option<String>,
    pub listening_port: Option<u16>,
    /// Sum over peers
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Peer block of `wg show`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WgPeer {
    pub public_key: String,
    pub endpoint: Option<String>,
    pub allowed_ips: Vec<String>,
    pub latest_handshake: Option<String>,
    pub transfer: Option<Transfer>,
}

/// Parsed `wg show <iface>` output
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WgShow {
    pub interface: WgInterface,
    pub peers: Vec<WgPeer>,
}

impl WgShow {
    pub fn parse(output: &str) -> Self {
        let mut show = WgShow::default();
        let mut current: Option<WgPeer> = None;

        for raw in output.lines() {
            let line = raw.trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();

            match key.trim() {
                "interface" => show.interface.name = value.to_string(),
                "peer" => {
                    if let Some(peer) = current.take() {
                        show.peers.push(peer);
                    }
                    current = Some(WgPeer {
                        public_key: value.to_string(),
                        ..Default::default()
                    });
                }
                key => match current.as_mut() {
                    Some(peer) => match key {
                        "endpoint" => peer.endpoint = Some(value.to_string()),
                        "allowed ips" => {
                            peer.allowed_ips = value
                                .split(',')
                                .map(|s| s.trim().to_string())
                                .filter(|s| !s.is_empty() && s != "(none)")
                                .collect()
                        }
                        "latest handshake" => peer.latest_handshake = Some(value.to_string()),
                        "transfer" => peer.transfer = Transfer::parse(value),
                        _ => {}
                    },
                    None => match key {
                        "public key" => show.interface.public_key = Some(value.to_string()),
                        "listening port" => show.interface.listening_port = value.parse().ok(),
                        _ => {}
                    },
                },
            }
        }
        if let Some(peer) = current {
            show.peers.push(peer);
        }

        for peer in &show.peers {
            if let Some(transfer) = &peer.transfer {
                show.interface.rx_bytes += transfer.received_bytes;
                show.interface.tx_bytes += transfer.sent_bytes;
            }
        }
        show
    }

    /// Peer block belonging to `peer`, by public key or by `{ip}/32`
    pub fn find(&self, peer: &Peer) -> Option<&WgPeer> {
        let host = format!("{}/32", peer.ip);
        self.peers
            .iter()
            .find(|p| p.public_key == peer.public_key)
            .or_else(|| self.peers.iter().find(|p| p.allowed_ips.contains(&host)))
    }
}

/// Live connection details of a peer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Connection {
    pub public_key: String,
    pub endpoint: Option<String>,
    pub latest_handshake: String,
    pub transfer: Transfer,
}

/// Reads connection state from the running interface
#[derive(Clone)]
pub struct ConnectionProbe {
    tool: WgTool,
    threshold: Duration,
}

impl ConnectionProbe {
    pub fn new(tool: WgTool, threshold: Duration) -> Self {
        Self { tool, threshold }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Current `wg show` view of the interface
    pub async fn snapshot(&self) -> Result<WgShow> {
        let output = self.tool.show().await?;
        Ok(WgShow::parse(&output))
    }

    /// Connected peers keyed by name, computed against a parsed view
    pub fn connections_in(&self, show: &WgShow, peers: &[Peer]) -> HashMap<String, Connection> {
        peers
            .iter()
            .filter_map(|peer| {
                let live = show.find(peer)?;
                let handshake = live.latest_handshake.as_deref()?;
                if !is_recent_handshake(handshake, self.threshold) {
                    return None;
                }
                Some((
                    peer.name.clone(),
                    Connection {
                        public_key: live.public_key.clone(),
                        endpoint: live.endpoint.clone(),
                        latest_handshake: handshake.to_string(),
                        transfer: live.transfer.clone().unwrap_or_default(),
                    },
                ))
            })
            .collect()
    }

    /// Connected peers keyed by name
    ///
    /// An interface that cannot be queried has no connections.
    #[instrument(skip(self, peers))]
    pub async fn active_connections(&self, peers: &[Peer]) -> HashMap<String, Connection> {
        match self.snapshot().await {
            Ok(show) => self.connections_in(&show, peers),
            Err(e) => {
                debug!(error = %e, "Interface not queryable, reporting no connections");
                HashMap::new()
            }
        }
    }
}
