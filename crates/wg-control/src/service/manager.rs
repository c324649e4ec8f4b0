//! Peer Manager
//!
//! Orchestrates the peer lifecycle over the store, the key generator, the
//! renderer, interface sync, the connection probe and the service monitor:
//! - add / remove with rollback on failure
//! - paginated listing with live connection state
//! - client config export
//! - reconciliation and server status

use super::monitor::{ServiceMonitor, ServiceState, SystemInfo};
use crate::config::{ServerDocument, Settings};
use crate::models::{validate_peer_name, Peer};
use crate::store::PeerStore;
use crate::tweaks::{tweak_value, RESTART_SERVICE_AFTER_PEER_CHANGE};
use crate::wireguard::{
    ClientSettings, ConfigRenderer, Connection, ConnectionProbe, InterfaceSync, KeyGenerator,
    ReconcileReport, SyncStrategy, WgInterface,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use ipnet::Ipv4Net;
use serde::Serialize;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Result of adding a peer
#[derive(Debug, Clone, Serialize)]
pub struct AddedPeer {
    pub peer: Peer,
    pub sync: SyncStrategy,
}

/// Result of removing a peer
#[derive(Debug, Clone, Serialize)]
pub struct RemovedPeer {
    pub name: String,
    pub ip: Ipv4Addr,
    pub sync: SyncStrategy,
}

/// A peer as shown in listings
#[derive(Debug, Clone, Serialize)]
pub struct PeerSummary {
    pub name: String,
    pub ip: Ipv4Addr,
    pub enabled: bool,
    pub created: DateTime<Utc>,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<Connection>,
}

impl PeerSummary {
    fn new(peer: &Peer, connections: &HashMap<String, Connection>) -> Self {
        let connection = connections.get(&peer.name).cloned();
        Self {
            name: peer.name.clone(),
            ip: peer.ip,
            enabled: peer.enabled,
            created: peer.created,
            connected: connection.is_some(),
            connection,
        }
    }
}

/// Page descriptor of a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub total_pages: usize,
    pub has_next: bool,
    pub has_prev: bool,
    /// 1-indexed, inclusive; 0 when empty
    pub showing_from: usize,
    /// Inclusive; 0 when empty
    pub showing_to: usize,
}

/// Compute the page window over `total` items
///
/// `page` is clamped to `[1, max(1, total_pages)]`. Returns the descriptor
/// and the index range to slice.
pub fn paginate(total: usize, page: usize, per_page: usize) -> (Pagination, std::ops::Range<usize>) {
    let per_page = per_page.max(1);
    let total_pages = total.div_ceil(per_page);
    let page = page.clamp(1, total_pages.max(1));
    let start = ((page - 1) * per_page).min(total);
    let end = (start + per_page).min(total);
    let pagination = Pagination {
        page,
        per_page,
        total,
        total_pages,
        has_next: page < total_pages,
        has_prev: page > 1,
        showing_from: if end > start { start + 1 } else { 0 },
        showing_to: if end > start { end } else { 0 },
    };
    (pagination, start..end)
}

/// One page of peers
#[derive(Debug, Clone, Serialize)]
pub struct PeerListing {
    pub peers: Vec<PeerSummary>,
    pub pagination: Pagination,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

/// A peer's client configuration
#[derive(Debug, Clone, Serialize)]
pub struct ExportedPeer {
    pub name: String,
    pub ip: Ipv4Addr,
    pub created: DateTime<Utc>,
    pub config: String,
}

/// Peer counts for the status view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeerTotals {
    pub configured: usize,
    pub enabled: usize,
    pub disabled: usize,
    pub active_connections: usize,
}

/// Server settings echoed in the status view
#[derive(Debug, Clone, Serialize)]
pub struct ServerSettingsView {
    pub interface: String,
    pub config_file: PathBuf,
    pub port: u16,
    pub network: Ipv4Net,
    pub dns: [String; 2],
}

/// Read-only server status
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub service: ServiceState,
    /// `None` when the interface is down
    pub interface: Option<WgInterface>,
    pub peers: PeerTotals,
    pub server: ServerSettingsView,
    pub system: SystemInfo,
}

/// Orchestrates peer operations
pub struct PeerManager {
    settings: Arc<Settings>,
    store: Arc<PeerStore>,
    keys: KeyGenerator,
    sync: InterfaceSync,
    probe: ConnectionProbe,
    monitor: ServiceMonitor,
}

impl PeerManager {
    pub fn new(
        settings: Arc<Settings>,
        store: Arc<PeerStore>,
        keys: KeyGenerator,
        sync: InterfaceSync,
        probe: ConnectionProbe,
        monitor: ServiceMonitor,
    ) -> Self {
        Self {
            settings,
            store,
            keys,
            sync,
            probe,
            monitor,
        }
    }

    fn document(&self) -> Result<ServerDocument> {
        ServerDocument::load_or_default(&self.settings.config_document)
    }

    fn restart_on_change(&self, document: &ServerDocument) -> Result<bool> {
        tweak_value(document, RESTART_SERVICE_AFTER_PEER_CHANGE)
    }

    /// Create a peer and bring it onto the interface
    #[instrument(skip(self))]
    pub async fn add(&self, name: &str) -> Result<AddedPeer> {
        validate_peer_name(name)?;
        if self.store.find_by_name(name).is_some() {
            return Err(Error::DuplicateName(name.to_string()));
        }
        let restart = self.restart_on_change(&self.document()?)?;

        let keys = self.keys.peer_keys().await?;
        let ip = self.store.allocate_next_ip()?;
        let peer = Peer::new(name, ip, keys.private_key, keys.public_key, keys.preshared_key);
        self.store.insert(peer.clone())?;
        debug!(ip = %ip, "Peer stored");

        match self.project_added(&peer, restart).await {
            Ok(sync) => {
                info!(ip = %ip, sync = ?sync, "Peer added");
                Ok(AddedPeer { peer, sync })
            }
            Err(e) => {
                error!(error = %e, "Adding peer failed, rolling back");
                if let Err(rollback) = self.store.delete_by_name(name) {
                    warn!(error = %rollback, "Store rollback failed");
                }
                if let Err(rollback) = self.sync.write_removed(&peer) {
                    warn!(error = %rollback, "Config file rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn project_added(&self, peer: &Peer, restart: bool) -> Result<SyncStrategy> {
        self.sync.write_added(peer)?;
        self.sync.push_added(peer, restart).await
    }

    /// Delete a peer
    ///
    /// The store delete stands even if the file or kernel update fails; the
    /// failure is returned and the next reconcile repairs the interface.
    #[instrument(skip(self))]
    pub async fn remove(&self, name: &str) -> Result<RemovedPeer> {
        let peer = self
            .store
            .find_by_name(name)
            .ok_or_else(|| Error::NotFound(format!("peer '{}'", name)))?;
        let restart = self.restart_on_change(&self.document()?)?;

        self.store.delete_by_name(name)?;
        debug!(ip = %peer.ip, "Peer deleted from store");

        let file_result = self.sync.write_removed(&peer);
        if let Err(e) = &file_result {
            error!(error = %e, "Failed to remove peer from interface config");
        }
        let sync = self.sync.push_removed(&peer, restart).await.map_err(|e| {
            error!(error = %e, "Failed to remove peer from interface");
            e
        })?;
        file_result?;

        info!(ip = %peer.ip, sync = ?sync, "Peer removed");
        Ok(RemovedPeer {
            name: peer.name,
            ip: peer.ip,
            sync,
        })
    }

    pub fn get(&self, name: &str) -> Result<Peer> {
        self.store
            .find_by_name(name)
            .ok_or_else(|| Error::NotFound(format!("peer '{}'", name)))
    }

    /// One page of peers ordered by creation time
    ///
    /// `search` filters by case-insensitive substring of the name. `per_page`
    /// falls back to the configured page size.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        page: usize,
        per_page: Option<usize>,
        search: Option<&str>,
    ) -> Result<PeerListing> {
        let needle = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);
        let mut peers: Vec<Peer> = self
            .store
            .list_all()
            .into_iter()
            .filter(|p| {
                needle
                    .as_ref()
                    .map_or(true, |n| p.name.to_lowercase().contains(n.as_str()))
            })
            .collect();
        peers.sort_by_key(|p| p.created);

        let (pagination, range) =
            paginate(peers.len(), page, per_page.unwrap_or(self.settings.page_size));
        let page_peers = &peers[range];
        let connections = self.probe.active_connections(page_peers).await;

        Ok(PeerListing {
            peers: page_peers
                .iter()
                .map(|p| PeerSummary::new(p, &connections))
                .collect(),
            pagination,
            search: needle,
        })
    }

    /// Newest peers first
    #[instrument(skip(self))]
    pub async fn recent(&self, count: Option<usize>) -> Result<Vec<PeerSummary>> {
        let mut peers = self.store.list_all();
        // Equal timestamps keep the later insertion first
        peers.reverse();
        peers.sort_by(|a, b| b.created.cmp(&a.created));
        peers.truncate(count.unwrap_or(self.settings.recent_count));
        let connections = self.probe.active_connections(&peers).await;
        Ok(peers
            .iter()
            .map(|p| PeerSummary::new(p, &connections))
            .collect())
    }

    /// Render the client configuration of a peer
    #[instrument(skip(self))]
    pub async fn export(&self, name: &str) -> Result<ExportedPeer> {
        let peer = self.get(name)?;
        let document = self.document()?;
        let mut settings = ClientSettings::from_document(&document)?;

        if settings.server_public_key.is_none() {
            if let Some(private_key) = document.server_private_key() {
                match self.keys.public_key(private_key).await {
                    Ok(public_key) => settings.server_public_key = Some(public_key),
                    Err(e) => warn!(error = %e, "Could not derive server public key"),
                }
            }
        }

        Ok(ExportedPeer {
            config: ConfigRenderer::client_config(&peer, &settings),
            name: peer.name,
            ip: peer.ip,
            created: peer.created,
        })
    }

    /// Push the whole store to the kernel
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        self.sync.reconcile(&self.store.list_all()).await
    }

    /// Service, interface and peer overview
    #[instrument(skip(self))]
    pub async fn status(&self) -> Result<ServerStatus> {
        let document = self.document()?;
        let service = self.monitor.service_state().await;
        let peers = self.store.list_all();

        let show = match self.probe.snapshot().await {
            Ok(show) => Some(show),
            Err(e) => {
                debug!(error = %e, "Interface not queryable");
                None
            }
        };
        let active_connections = show
            .as_ref()
            .map(|show| self.probe.connections_in(show, &peers).len())
            .unwrap_or(0);
        let enabled = peers.iter().filter(|p| p.enabled).count();
        let (dns_primary, dns_secondary) = document.dns();

        Ok(ServerStatus {
            service,
            interface: show.map(|s| s.interface),
            peers: PeerTotals {
                configured: peers.len(),
                enabled,
                disabled: peers.len() - enabled,
                active_connections,
            },
            server: ServerSettingsView {
                interface: self.settings.interface.clone(),
                config_file: self.settings.interface_config_path(),
                port: document.port(),
                network: document.network()?,
                dns: [dns_primary, dns_secondary],
            },
            system: self.monitor.system_info().await,
        })
    }
}
