//! Control-plane settings
//!
//! Loaded from a TOML file. Every field has a default so a missing file or
//! a partial file both work.

use crate::defaults;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Control-plane settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// WireGuard interface name
    pub interface: String,

    /// Main configuration document (JSON)
    pub config_document: PathBuf,

    /// Peer store file
    pub peer_store: PathBuf,

    /// Server interface config; `/etc/wireguard/<interface>.conf` when unset
    pub interface_config: Option<PathBuf>,

    /// Directory holding migration snapshots
    pub backup_dir: PathBuf,

    /// Ghost mode state file
    pub ghost_state_file: PathBuf,

    /// Handshakes younger than this many seconds count as connected
    pub active_threshold_secs: u64,

    /// Default page size for peer listings
    pub page_size: usize,

    /// Default number of peers returned by `recent`
    pub recent_count: usize,

    pub timeouts: TimeoutSettings,

    pub delays: DelaySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            interface: defaults::WG_INTERFACE.to_string(),
            config_document: PathBuf::from("/etc/wg-control/config.json"),
            peer_store: PathBuf::from("/var/lib/wg-control/peers.json"),
            interface_config: None,
            backup_dir: PathBuf::from("/var/lib/wg-control/backups"),
            ghost_state_file: PathBuf::from("/etc/wg-control/ghost-state.json"),
            active_threshold_secs: defaults::ACTIVE_CONNECTION_THRESHOLD_SECS,
            page_size: defaults::PAGE_SIZE,
            recent_count: defaults::RECENT_COUNT,
            timeouts: TimeoutSettings::default(),
            delays: DelaySettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Load settings, falling back to defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Settings with every path under `root` and no settle delays.
    ///
    /// Used for self-contained installs and for tests.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            config_document: root.join("config").join("config.json"),
            peer_store: root.join("data").join("peers.json"),
            interface_config: Some(root.join("wireguard").join("wg_main.conf")),
            backup_dir: root.join("backups"),
            ghost_state_file: root.join("config").join("ghost-state.json"),
            delays: DelaySettings::none(),
            ..Self::default()
        }
    }

    /// Path of the server's interface configuration file
    pub fn interface_config_path(&self) -> PathBuf {
        self.interface_config
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("/etc/wireguard/{}.conf", self.interface)))
    }

    /// systemd unit managing the interface
    pub fn service_unit(&self) -> String {
        format!("wg-quick@{}", self.interface)
    }
}

/// Soft wall-clock limits for external commands
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub wg_tool_secs: u64,
    pub service_secs: u64,
    pub firewall_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            wg_tool_secs: 10,
            service_secs: 30,
            firewall_secs: 30,
        }
    }
}

impl TimeoutSettings {
    pub fn wg_tool(&self) -> Duration {
        Duration::from_secs(self.wg_tool_secs)
    }

    pub fn service(&self) -> Duration {
        Duration::from_secs(self.service_secs)
    }

    pub fn firewall(&self) -> Duration {
        Duration::from_secs(self.firewall_secs)
    }
}

/// Mandatory waits around service stop/start
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DelaySettings {
    /// Between stopping the service and deleting the link
    pub settle_ms: u64,
    /// Between `wg-quick down` and `wg-quick up` on restart fallback
    pub restart_ms: u64,
    /// After a successful start
    pub post_start_ms: u64,
}

impl Default for DelaySettings {
    fn default() -> Self {
        Self {
            settle_ms: 1000,
            restart_ms: 1000,
            post_start_ms: 2000,
        }
    }
}

impl DelaySettings {
    pub fn none() -> Self {
        Self {
            settle_ms: 0,
            restart_ms: 0,
            post_start_ms: 0,
        }
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn restart(&self) -> Duration {
        Duration::from_millis(self.restart_ms)
    }

    pub fn post_start(&self) -> Duration {
        Duration::from_millis(self.post_start_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.interface, "wg_main");
        assert_eq!(settings.service_unit(), "wg-quick@wg_main");
        assert_eq!(
            settings.interface_config_path(),
            PathBuf::from("/etc/wireguard/wg_main.conf")
        );
        assert_eq!(settings.active_threshold_secs, 180);
        assert_eq!(settings.timeouts.wg_tool(), Duration::from_secs(10));
        assert_eq!(settings.timeouts.service(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_toml() {
        let settings: Settings = toml::from_str(
            r#"
            interface = "wg1"

            [delays]
            settle_ms = 5
            "#,
        )
        .unwrap();
        assert_eq!(settings.interface, "wg1");
        assert_eq!(settings.delays.settle_ms, 5);
        assert_eq!(settings.delays.post_start_ms, 2000);
        assert_eq!(settings.page_size, 20);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.interface, "wg_main");
    }

    #[test]
    fn test_load_from_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "interface = [").unwrap();
        assert!(matches!(Settings::load_from(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_rooted_at() {
        let settings = Settings::rooted_at(Path::new("/srv/wg"));
        assert_eq!(
            settings.peer_store,
            PathBuf::from("/srv/wg/data/peers.json")
        );
        assert_eq!(settings.delays.settle(), Duration::ZERO);
    }
}
