//! Client config and server stanza rendering
//!
//! Pure text generation. Nothing here touches the filesystem or the key
//! generator; the same peer and settings always give byte-identical output.

use crate::config::ServerDocument;
use crate::defaults;
use crate::models::{Peer, Subnet};
use crate::Result;

/// Global settings that go into every client config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub subnet: Subnet,
    /// Public host clients connect to
    pub endpoint_host: Option<String>,
    pub port: u16,
    /// Empty field in the output when unknown
    pub server_public_key: Option<String>,
    pub dns_primary: String,
    pub dns_secondary: String,
}

impl ClientSettings {
    /// Read the settings recorded in the main configuration document
    pub fn from_document(document: &ServerDocument) -> Result<Self> {
        let (dns_primary, dns_secondary) = document.dns();
        Ok(Self {
            subnet: Subnet::new(document.network()?),
            endpoint_host: document.endpoint_host().map(str::to_string),
            port: document.port(),
            server_public_key: document.server_public_key().map(str::to_string),
            dns_primary,
            dns_secondary,
        })
    }
}

/// Renders WireGuard configuration text
pub struct ConfigRenderer;

impl ConfigRenderer {
    /// Complete client configuration for `peer`
    pub fn client_config(peer: &Peer, settings: &ClientSettings) -> String {
        let endpoint = settings
            .endpoint_host
            .as_deref()
            .unwrap_or(defaults::ENDPOINT_PLACEHOLDER);
        let server_public_key = settings.server_public_key.as_deref().unwrap_or("");

        format!(
            "[Interface]\n\
             PrivateKey = {private_key}\n\
             Address = {ip}/{prefix}\n\
             DNS = {dns_primary}, {dns_secondary}\n\
             MTU = {mtu}\n\
             \n\
             [Peer]\n\
             PublicKey = {server_public_key}\n\
             PresharedKey = {preshared_key}\n\
             Endpoint = {endpoint}:{port}\n\
             AllowedIPs = 0.0.0.0/0, {subnet}\n\
             PersistentKeepalive = {keepalive}\n",
            private_key = peer.private_key,
            ip = peer.ip,
            prefix = settings.subnet.prefix_len(),
            dns_primary = settings.dns_primary,
            dns_secondary = settings.dns_secondary,
            mtu = defaults::CLIENT_MTU,
            server_public_key = server_public_key,
            preshared_key = peer.preshared_key,
            endpoint = endpoint,
            port = settings.port,
            subnet = settings.subnet,
            keepalive = defaults::PERSISTENT_KEEPALIVE,
        )
    }

    /// `[Peer]` stanza for the server's interface config
    pub fn server_stanza(peer: &Peer) -> String {
        format!(
            "[Peer] # {}\nPublicKey = {}\nPresharedKey = {}\nAllowedIPs = {}/32\n",
            peer.name, peer.public_key, peer.preshared_key, peer.ip
        )
    }
}
