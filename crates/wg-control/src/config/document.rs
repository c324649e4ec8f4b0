//! Main configuration document
//!
//! A single JSON document shared with the rest of the server. Only the keys
//! below are interpreted; everything else round-trips untouched.
//!
//! - `wireguard.network`, `wireguard.port`, `wireguard.server_ip`, `wireguard.endpoint`
//! - `server.ip`, `server.public_key`, `server.private_key`
//! - `dns.primary`, `dns.secondary`
//! - `tweaks.<name>`
//! - `multihop.enabled`

use crate::defaults;
use crate::fsutil;
use crate::{Error, Result};
use ipnet::Ipv4Net;
use serde_json::{Map, Value};
use std::path::Path;

/// The server's main configuration document
#[derive(Debug, Clone, PartialEq)]
pub struct ServerDocument {
    root: Map<String, Value>,
}

impl Default for ServerDocument {
    fn default() -> Self {
        Self { root: Map::new() }
    }
}

impl ServerDocument {
    /// Wrap an already-parsed JSON value
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(root) => Ok(Self { root }),
            other => Err(Error::Config(format!(
                "Configuration document must be a JSON object, got {}",
                other
            ))),
        }
    }

    /// Read the document from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let value: Value = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        Self::from_value(value)
    }

    /// Read the document, or start from an empty one when the file is absent
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Persist by atomic write-and-rename
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.root)?;
        fsutil::write_atomic(path, content.as_bytes(), None)
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.root.clone())
    }

    fn get(&self, section: &str, key: &str) -> Option<&Value> {
        self.root.get(section).and_then(|s| s.get(key))
    }

    fn get_str(&self, section: &str, key: &str) -> Option<&str> {
        self.get(section, key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Set `section.key`, creating (or replacing a non-object) section
    pub fn set(&mut self, section: &str, key: &str, value: Value) {
        let entry = self
            .root
            .entry(section.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = entry {
            map.insert(key.to_string(), value);
        } else {
            let mut map = Map::new();
            map.insert(key.to_string(), value);
            *entry = Value::Object(map);
        }
    }

    /// Active subnet (`wireguard.network`)
    pub fn network(&self) -> Result<Ipv4Net> {
        let Some(raw) = self.get_str("wireguard", "network") else {
            return Ok(defaults::WG_NETWORK);
        };
        raw.parse::<Ipv4Net>()
            .map(|net| net.trunc())
            .map_err(|e| Error::Config(format!("Invalid wireguard.network '{}': {}", raw, e)))
    }

    /// Raw `wireguard.network` string, if recorded
    pub fn network_raw(&self) -> Option<&str> {
        self.get_str("wireguard", "network")
    }

    pub fn set_network(&mut self, network: Ipv4Net) {
        self.set("wireguard", "network", Value::String(network.to_string()));
    }

    /// Server listen port (`wireguard.port`)
    pub fn port(&self) -> u16 {
        self.get("wireguard", "port")
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(defaults::WG_PORT)
    }

    /// Public endpoint host for client configs
    pub fn endpoint_host(&self) -> Option<&str> {
        self.get_str("wireguard", "server_ip")
            .or_else(|| self.get_str("server", "ip"))
            .or_else(|| self.get_str("wireguard", "endpoint"))
    }

    pub fn server_public_key(&self) -> Option<&str> {
        self.get_str("server", "public_key")
    }

    pub fn server_private_key(&self) -> Option<&str> {
        self.get_str("server", "private_key")
    }

    /// Primary and secondary DNS servers pushed to clients
    pub fn dns(&self) -> (String, String) {
        (
            self.get_str("dns", "primary")
                .unwrap_or(defaults::DNS_PRIMARY)
                .to_string(),
            self.get_str("dns", "secondary")
                .unwrap_or(defaults::DNS_SECONDARY)
                .to_string(),
        )
    }

    /// Stored value of a tweak, if any
    pub fn tweak(&self, name: &str) -> Option<bool> {
        self.get("tweaks", name).and_then(Value::as_bool)
    }

    pub fn set_tweak(&mut self, name: &str, value: bool) {
        self.set("tweaks", name, Value::Bool(value));
    }

    /// Multihop overlay flag (`multihop.enabled`)
    pub fn multihop_enabled(&self) -> bool {
        self.get("multihop", "enabled")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}
