//! Interface sync
//!
//! Projects the peer set onto the running system: the kernel interface via
//! `wg set` and the interface config file. Live reconciliation is tried
//! first; a failure escalates to a full service restart.

use super::probe::WgShow;
use super::server_file::InterfaceFile;
use super::tool::WgTool;
use crate::config::DelaySettings;
use crate::models::Peer;
use crate::system::{HostNetwork, ServiceManager};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

/// How a change reached the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    /// `wg set` on the running interface
    Live,
    /// Service restart from the config file
    Restart,
}

/// Outcome of a reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Store peers pushed to the kernel
    pub pushed: usize,
    /// Kernel peers unknown to the store that were removed
    pub removed: usize,
    pub strategy: SyncStrategy,
}

/// Write path to the kernel and the interface config file
#[derive(Clone)]
pub struct InterfaceSync {
    tool: WgTool,
    service: ServiceManager,
    host: HostNetwork,
    file: InterfaceFile,
    delays: DelaySettings,
}

impl InterfaceSync {
    pub fn new(
        tool: WgTool,
        service: ServiceManager,
        host: HostNetwork,
        file: InterfaceFile,
        delays: DelaySettings,
    ) -> Self {
        Self {
            tool,
            service,
            host,
            file,
            delays,
        }
    }

    pub fn file(&self) -> &InterfaceFile {
        &self.file
    }

    pub fn service(&self) -> &ServiceManager {
        &self.service
    }

    /// Append the peer's stanza to the config file
    pub fn write_added(&self, peer: &Peer) -> Result<()> {
        self.file.append_peer(peer)
    }

    /// Drop the peer's stanza from the config file
    pub fn write_removed(&self, peer: &Peer) -> Result<()> {
        if !self.file.remove_peer(peer.ip)? {
            debug!(peer = %peer.name, "No stanza to remove from interface config");
        }
        Ok(())
    }

    /// Push an added peer to the kernel
    #[instrument(skip(self, peer), fields(peer = %peer.name))]
    pub async fn push_added(&self, peer: &Peer, restart: bool) -> Result<SyncStrategy> {
        if restart {
            self.restart_service().await?;
            return Ok(SyncStrategy::Restart);
        }
        match self
            .tool
            .set_peer(&peer.public_key, &peer.preshared_key, peer.ip)
            .await
        {
            Ok(()) => {
                self.save().await;
                info!("Peer added to live interface");
                Ok(SyncStrategy::Live)
            }
            Err(e) => {
                warn!(error = %e, "Live peer add failed, falling back to service restart");
                self.fallback_restart(&e).await
            }
        }
    }

    /// Remove a peer from the kernel
    #[instrument(skip(self, peer), fields(peer = %peer.name))]
    pub async fn push_removed(&self, peer: &Peer, restart: bool) -> Result<SyncStrategy> {
        if restart {
            self.restart_service().await?;
            return Ok(SyncStrategy::Restart);
        }
        match self.tool.remove_peer(&peer.public_key).await {
            Ok(()) => {
                self.save().await;
                info!("Peer removed from live interface");
                Ok(SyncStrategy::Live)
            }
            Err(e) => {
                warn!(error = %e, "Live peer removal failed, falling back to service restart");
                self.fallback_restart(&e).await
            }
        }
    }

    /// Make the kernel match `peers`
    ///
    /// Every enabled peer is pushed and kernel peers absent from the set are
    /// removed, followed by `wg-quick save`. Any failure rewrites the config
    /// file from `peers` and restarts the service instead.
    #[instrument(skip(self, peers), fields(peers = peers.len()))]
    pub async fn reconcile(&self, peers: &[Peer]) -> Result<ReconcileReport> {
        let enabled: Vec<Peer> = peers.iter().filter(|p| p.enabled).cloned().collect();

        match self.reconcile_live(&enabled).await {
            Ok((pushed, removed)) => {
                self.save().await;
                info!(pushed, removed, "Reconciled live interface");
                Ok(ReconcileReport {
                    pushed,
                    removed,
                    strategy: SyncStrategy::Live,
                })
            }
            Err(e) => {
                warn!(error = %e, "Live reconcile failed, rewriting config and restarting");
                self.file.sync_peers(&enabled)?;
                let strategy = self.fallback_restart(&e).await?;
                Ok(ReconcileReport {
                    pushed: enabled.len(),
                    removed: 0,
                    strategy,
                })
            }
        }
    }

    async fn reconcile_live(&self, enabled: &[Peer]) -> Result<(usize, usize)> {
        let show = WgShow::parse(&self.tool.show().await?);
        let wanted: HashSet<&str> = enabled.iter().map(|p| p.public_key.as_str()).collect();

        let mut removed = 0;
        for live in &show.peers {
            if !wanted.contains(live.public_key.as_str()) {
                self.tool.remove_peer(&live.public_key).await?;
                removed += 1;
            }
        }
        for peer in enabled {
            self.tool
                .set_peer(&peer.public_key, &peer.preshared_key, peer.ip)
                .await?;
        }
        Ok((enabled.len(), removed))
    }

    /// Snapshot the kernel back to the config file; failure only warns
    async fn save(&self) {
        if let Err(e) = self.tool.save().await {
            warn!(error = %e, "wg-quick save failed, change may not survive a restart");
        }
    }

    async fn fallback_restart(&self, cause: &Error) -> Result<SyncStrategy> {
        self.restart_service().await.map_err(|restart_err| {
            Error::InterfaceSyncFailed(format!(
                "live update failed ({}) and fallback restart failed ({})",
                cause, restart_err
            ))
        })?;
        Ok(SyncStrategy::Restart)
    }

    /// Restart the interface
    ///
    /// `systemctl restart`, then `wg-quick down`/`up`, then one more
    /// `wg-quick up` after deleting the link.
    #[instrument(skip(self))]
    pub async fn restart_service(&self) -> Result<()> {
        let first = match self.service.restart().await {
            Ok(()) => {
                info!(unit = %self.service.unit(), "Service restarted");
                return Ok(());
            }
            Err(e) => e,
        };
        warn!(error = %first, "systemctl restart failed, trying wg-quick down/up");

        if let Err(e) = self.tool.down().await {
            debug!(error = %e, "wg-quick down failed");
        }
        tokio::time::sleep(self.delays.restart()).await;
        let second = match self.tool.up().await {
            Ok(()) => {
                info!("Interface brought up with wg-quick");
                return Ok(());
            }
            Err(e) => e,
        };

        warn!(error = %second, "wg-quick up failed, deleting link and retrying");
        if let Err(e) = self.host.delete_link(self.tool.interface()).await {
            debug!(error = %e, "ip link delete failed");
        }
        match self.tool.up().await {
            Ok(()) => {
                info!("Interface brought up after link delete");
                Ok(())
            }
            Err(third) => Err(Error::ServiceRestartFailed(format!(
                "systemctl restart: {}; wg-quick up: {}; retry: {}",
                first, second, third
            ))),
        }
    }
}
