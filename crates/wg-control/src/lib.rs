//! WireGuard Peer & Subnet Control Plane
//!
//! Owns the authoritative peer database of a single-host WireGuard server and
//! keeps the running system in step with it:
//! - Peer lifecycle (add, remove, list, export) with IP allocation
//! - Live kernel reconciliation with service-restart fallback
//! - Server interface config file maintenance
//! - Connection status from `wg show`
//! - Atomic subnet migration with snapshot and rollback
//! - Runtime behavior tweaks
//! - Service logs, restart and firewall status
//!
//! External tools (`wg`, `wg-quick`, `systemctl`, `journalctl`, `ip`, `ufw`,
//! `iptables`, `ss`, `sysctl`, `lsmod`) are reached through the
//! [`system::CommandRunner`] seam.

pub mod config;
pub mod control;
pub mod error;
pub mod fsutil;
pub mod migration;
pub mod models;
pub mod service;
pub mod store;
pub mod system;
pub mod tweaks;
pub mod wireguard;

// Re-export core types
pub use config::{ServerDocument, Settings};
pub use control::ControlPlane;
pub use error::{Error, Result};
pub use migration::{
    IpMapping, MigrationOutcome, SubnetAnalysis, SubnetMigrator, SubnetValidation,
};
pub use models::{validate_peer_name, IpAllocation, Peer, Subnet};
pub use service::{
    AddedPeer, ExportedPeer, FirewallReport, PeerListing, PeerManager, PeerSummary, RemovedPeer,
    RestartResult, ServerStatus, ServiceLogs, ServiceMonitor,
};
pub use store::PeerStore;
pub use system::{CommandOutput, CommandRunner, CommandSpec, SystemRunner};
pub use tweaks::{TweakChange, TweakInfo, TweakRegistry};
pub use wireguard::{
    ClientSettings, ConfigRenderer, Connection, ConnectionProbe, InterfaceSync, KeyGenerator,
    SyncStrategy, WgShow, WgTool,
};

/// Built-in defaults for the control plane
pub mod defaults {
    use ipnet::Ipv4Net;
    use std::net::Ipv4Addr;

    /// Subnet used when the main configuration document records none
    pub const WG_NETWORK: Ipv4Net = Ipv4Net::new_assert(Ipv4Addr::new(10, 8, 0, 0), 24);

    /// Server listen port
    pub const WG_PORT: u16 = 51820;

    /// Kernel interface name
    pub const WG_INTERFACE: &str = "wg_main";

    pub const DNS_PRIMARY: &str = "8.8.8.8";
    pub const DNS_SECONDARY: &str = "1.1.1.1";

    /// Endpoint written into client configs when the server address is unknown
    pub const ENDPOINT_PLACEHOLDER: &str = "YOUR_SERVER_IP";

    pub const CLIENT_MTU: u16 = 1420;
    pub const PERSISTENT_KEEPALIVE: u16 = 25;

    /// Length of a base64-encoded WireGuard key
    pub const KEY_LENGTH: usize = 44;

    pub const MAX_NAME_LENGTH: usize = 50;

    /// Names no peer may take, compared case-insensitively
    pub const RESERVED_NAMES: [&str; 6] = ["server", "admin", "root", "system", "ghost", "multihop"];

    /// Handshakes younger than this mark a peer as connected
    pub const ACTIVE_CONNECTION_THRESHOLD_SECS: u64 = 180;

    /// Journal lines returned when the caller does not ask for a count
    pub const LOG_LINES: usize = 50;
    pub const MAX_LOG_LINES: usize = 1000;

    pub const PAGE_SIZE: usize = 20;
    pub const RECENT_COUNT: usize = 5;

    /// Smallest accepted subnet (largest prefix length)
    pub const MAX_PREFIX_LEN: u8 = 30;

    /// Usable hosts a new subnet needs, as a percentage of current peers
    pub const CAPACITY_HEADROOM_PERCENT: u64 = 120;
}
