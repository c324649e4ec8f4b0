//! Subnet migration execution
//!
//! Moves the whole VPN to a new subnet as one unit: snapshot, stop, rewrite
//! store, interface config, document and firewall, start, verify. Any
//! failure after the snapshot rolls every file back from it.

use super::planner::{
    analysis_warnings, check_blockers, check_capacity, check_conflicts, check_private,
    check_size, validation_warnings, Blockers, IpMapping, PeerAddress, PeerMove, SubnetAnalysis,
    SubnetValidation, ValidationChecks,
};
use super::snapshot::{snapshot_id, Snapshot, SnapshotSources};
use crate::config::{ServerDocument, Settings};
use crate::models::Subnet;
use crate::store::PeerStore;
use crate::system::{parse_ip_addr, Firewall, HostNetwork, OverlayState, ServiceManager};
use crate::wireguard::{ConnectionProbe, InterfaceFile};
use crate::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Steps of a subnet change, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStep {
    Snapshotting,
    StoppingService,
    RewritingStore,
    RewritingInterfaceConfig,
    UpdatingDocument,
    UpdatingStoreSubnet,
    UpdatingFirewall,
    StartingService,
    Verifying,
    Completed,
    RollingBack,
    RolledBack,
}

impl MigrationStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStep::Snapshotting => "snapshotting",
            MigrationStep::StoppingService => "stopping_service",
            MigrationStep::RewritingStore => "rewriting_store",
            MigrationStep::RewritingInterfaceConfig => "rewriting_interface_config",
            MigrationStep::UpdatingDocument => "updating_document",
            MigrationStep::UpdatingStoreSubnet => "updating_store_subnet",
            MigrationStep::UpdatingFirewall => "updating_firewall",
            MigrationStep::StartingService => "starting_service",
            MigrationStep::Verifying => "verifying",
            MigrationStep::Completed => "completed",
            MigrationStep::RollingBack => "rolling_back",
            MigrationStep::RolledBack => "rolled_back",
        }
    }

    /// Whether the firewall already carries the new subnet when a failure
    /// is reported at this step
    pub fn firewall_switched(&self) -> bool {
        matches!(
            self,
            MigrationStep::StartingService | MigrationStep::Verifying | MigrationStep::Completed
        )
    }
}

impl fmt::Display for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a completed subnet change
#[derive(Debug, Clone, Serialize)]
pub struct MigrationOutcome {
    pub old_subnet: Subnet,
    pub new_subnet: Subnet,
    pub new_server_ip: Ipv4Addr,
    pub peers_updated: usize,
    pub backup_id: String,
    pub backup_path: PathBuf,
    pub ip_mapping: Vec<PeerMove>,
    /// Firewall commands that failed; the change itself still stands
    pub firewall_failures: Vec<String>,
}

/// Analyzes, validates and executes subnet changes
pub struct SubnetMigrator {
    settings: Arc<Settings>,
    store: Arc<PeerStore>,
    file: InterfaceFile,
    service: ServiceManager,
    host: HostNetwork,
    firewall: Firewall,
    overlay: OverlayState,
    probe: ConnectionProbe,
}

impl SubnetMigrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Arc<Settings>,
        store: Arc<PeerStore>,
        file: InterfaceFile,
        service: ServiceManager,
        host: HostNetwork,
        firewall: Firewall,
        overlay: OverlayState,
        probe: ConnectionProbe,
    ) -> Self {
        Self {
            settings,
            store,
            file,
            service,
            host,
            firewall,
            overlay,
            probe,
        }
    }

    fn document(&self) -> Result<ServerDocument> {
        ServerDocument::load_or_default(&self.settings.config_document)
    }

    fn sources(&self) -> SnapshotSources {
        SnapshotSources {
            interface_config: self.file.path().to_path_buf(),
            config_document: self.settings.config_document.clone(),
            peer_store: self.store.path().to_path_buf(),
        }
    }

    /// Current addressing, overlay blockers and live connections
    #[instrument(skip(self))]
    pub async fn analyze(&self) -> Result<SubnetAnalysis> {
        let document = self.document()?;
        let current = Subnet::new(document.network()?);

        let mut peers = self.store.list_all();
        peers.sort_by_key(|p| u32::from(p.ip));
        let active_peers = self.probe.active_connections(&peers).await.len();

        let blockers = Blockers {
            ghost_mode_active: self.overlay.ghost_active(),
            multihop_active: self.overlay.multihop_active(&document),
            active_connections: active_peers > 0,
        };

        Ok(SubnetAnalysis {
            current_subnet: current,
            subnet_size: current.size(),
            usable_hosts: current.usable_hosts(),
            server_ip: current.server_ip(),
            total_peers: peers.len(),
            active_peers,
            main_interface: self.host.main_interface().await,
            warnings: analysis_warnings(&blockers, active_peers),
            blockers,
            peers: peers
                .into_iter()
                .map(|p| PeerAddress {
                    name: p.name,
                    ip: p.ip,
                    created: p.created,
                })
                .collect(),
        })
    }

    /// Check a proposed subnet without changing anything
    pub async fn validate(&self, new_cidr: &str) -> Result<SubnetValidation> {
        self.validate_with(new_cidr, false).await
    }

    /// Like [`validate`](Self::validate), optionally skipping the overlay
    /// blocker check
    #[instrument(skip(self))]
    pub async fn validate_with(&self, new_cidr: &str, skip_blockers: bool) -> Result<SubnetValidation> {
        let new = Subnet::parse(new_cidr)?;
        let analysis = self.analyze().await?;
        let current = analysis.current_subnet;
        let peer_count = analysis.total_peers;

        let conflicts = self.host.conflicts(&new, &self.settings.interface).await;
        let checks = ValidationChecks {
            subnet_size: check_size(&new, peer_count),
            private_subnet: check_private(&new),
            capacity: check_capacity(&new, peer_count),
            blockers: (!skip_blockers).then(|| check_blockers(&analysis.blockers)),
            network_conflicts: check_conflicts(&new, &conflicts),
        };

        let errors: Vec<String> = [
            checks.blockers.as_ref(),
            Some(&checks.subnet_size),
            Some(&checks.private_subnet),
            Some(&checks.network_conflicts),
            Some(&checks.capacity),
        ]
        .into_iter()
        .flatten()
        .filter_map(|check| check.error.clone())
        .collect();
        let valid = errors.is_empty();

        let ip_mapping = if valid {
            let peers = self.store.list_all();
            Some(IpMapping::compute(&current, &new, &peers)?)
        } else {
            None
        };

        debug!(new = %new, valid, errors = errors.len(), "Validated subnet change");
        Ok(SubnetValidation {
            new_subnet: new,
            current_subnet: current,
            valid,
            checks,
            errors,
            warnings: validation_warnings(&current, &new, analysis.active_peers),
            network_conflicts: conflicts,
            ip_mapping,
        })
    }

    /// Move the VPN to `new_cidr`
    ///
    /// `force` is the caller's explicit confirmation. Any failure after the
    /// snapshot is rolled back and reported as `MigrationFailed`; a failed
    /// rollback is `RollbackFailed` naming the snapshot directory.
    #[instrument(skip(self))]
    pub async fn execute(&self, new_cidr: &str, force: bool) -> Result<MigrationOutcome> {
        if !force {
            return Err(Error::ConfirmationRequired(
                "Subnet change disconnects every peer. Review the validation result and confirm to proceed."
                    .to_string(),
            ));
        }

        let validation = self.validate(new_cidr).await?;
        if !validation.valid {
            return Err(Error::InvalidSubnet(validation.errors.join("; ")));
        }
        let old = validation.current_subnet;
        let new = validation.new_subnet;
        let peers = self.store.list_all();
        let mapping = match validation.ip_mapping {
            Some(mapping) => mapping,
            None => IpMapping::compute(&old, &new, &peers)?,
        };
        let outbound = self.host.main_interface().await.map(|iface| iface.name);

        info!(old = %old, new = %new, peers = peers.len(), "Starting subnet change");

        let capture = self.firewall.capture().await;
        let now = Utc::now();
        let snapshot = Snapshot::create(
            &self.settings.backup_dir,
            now,
            &self.sources(),
            old,
            &capture,
        )
        .map_err(|e| Error::MigrationFailed {
            backup_id: snapshot_id(now),
            reason: format!("{}: {}", MigrationStep::Snapshotting, e),
        })?;

        let mut step = MigrationStep::StoppingService;
        match self
            .apply(&old, &new, &mapping, outbound.as_deref(), &mut step)
            .await
        {
            Ok(firewall_failures) => {
                info!(
                    old = %old,
                    new = %new,
                    backup = %snapshot.id,
                    step = %MigrationStep::Completed,
                    "Subnet change completed"
                );
                Ok(MigrationOutcome {
                    old_subnet: old,
                    new_subnet: new,
                    new_server_ip: new.server_ip(),
                    peers_updated: mapping.peers.len(),
                    backup_id: snapshot.id,
                    backup_path: snapshot.path,
                    ip_mapping: mapping.peers,
                    firewall_failures,
                })
            }
            Err(e) => {
                let reason = format!("{} failed: {}", step, e);
                error!(backup = %snapshot.id, error = %reason, "Subnet change failed, rolling back");
                let switched = step.firewall_switched();
                match self
                    .rollback(&snapshot, &old, &new, outbound.as_deref(), switched)
                    .await
                {
                    Ok(()) => Err(Error::MigrationFailed {
                        backup_id: snapshot.id,
                        reason,
                    }),
                    Err(rollback_error) => {
                        error!(
                            backup = %snapshot.path.display(),
                            error = %rollback_error,
                            "Rollback failed, manual restore required"
                        );
                        Err(Error::RollbackFailed {
                            backup_path: snapshot.path,
                            reason: format!("{}; rollback: {}", reason, rollback_error),
                        })
                    }
                }
            }
        }
    }

    /// Mutating steps of a subnet change; `step` tracks progress for errors
    async fn apply(
        &self,
        old: &Subnet,
        new: &Subnet,
        mapping: &IpMapping,
        outbound: Option<&str>,
        step: &mut MigrationStep,
    ) -> Result<Vec<String>> {
        *step = MigrationStep::StoppingService;
        self.stop_service().await?;

        *step = MigrationStep::RewritingStore;
        self.store.rewrite_all_ips(&mapping.by_name())?;

        *step = MigrationStep::RewritingInterfaceConfig;
        self.file
            .remap_addresses(&mapping.by_address(), new.server_ip(), new.prefix_len())?;

        *step = MigrationStep::UpdatingDocument;
        let mut document = self.document()?;
        document.set_network(new.cidr());
        document.save(&self.settings.config_document)?;

        *step = MigrationStep::UpdatingStoreSubnet;
        self.store.update_active_subnet(*new)?;

        *step = MigrationStep::UpdatingFirewall;
        let firewall_failures = self
            .firewall
            .switch_subnet(old.cidr(), new.cidr(), outbound)
            .await;
        if !firewall_failures.is_empty() {
            warn!(failed = firewall_failures.len(), "Some firewall rules could not be updated");
        }

        *step = MigrationStep::StartingService;
        self.start_service().await?;

        *step = MigrationStep::Verifying;
        self.verify(new).await?;

        *step = MigrationStep::Completed;
        Ok(firewall_failures)
    }

    async fn stop_service(&self) -> Result<()> {
        self.service.stop().await?;
        tokio::time::sleep(self.settings.delays.settle()).await;
        if let Err(e) = self.host.delete_link(&self.settings.interface).await {
            debug!(error = %e, "Interface link already gone");
        }
        Ok(())
    }

    /// Start the unit, retrying once after deleting a stale link
    async fn start_service(&self) -> Result<()> {
        if let Err(first) = self.service.start().await {
            warn!(error = %first, "Service start failed, retrying after link cleanup");
            if let Err(e) = self.host.delete_link(&self.settings.interface).await {
                debug!(error = %e, "No stale interface link");
            }
            tokio::time::sleep(self.settings.delays.settle()).await;
            self.service
                .start()
                .await
                .map_err(|e| Error::ServiceRestartFailed(e.to_string()))?;
        }
        tokio::time::sleep(self.settings.delays.post_start()).await;
        Ok(())
    }

    async fn verify(&self, new: &Subnet) -> Result<()> {
        if !self.service.is_active().await {
            return Err(Error::ServiceRestartFailed(format!(
                "{} is not active",
                self.service.unit()
            )));
        }

        let output = self.host.addresses_of(&self.settings.interface).await?;
        let server_ip = new.server_ip();
        if !parse_ip_addr(&output)
            .iter()
            .any(|(_, net)| net.addr() == server_ip)
        {
            return Err(Error::InterfaceSyncFailed(format!(
                "{} does not carry {}",
                self.settings.interface, server_ip
            )));
        }

        let recorded = self.document()?.network()?;
        if recorded != new.cidr() {
            return Err(Error::Config(format!(
                "Recorded subnet is {} instead of {}",
                recorded, new
            )));
        }
        Ok(())
    }

    /// Restore the snapshot and bring the old interface back up
    ///
    /// Firewall rules are switched back only when `firewall_switched`.
    #[instrument(skip(self, snapshot), fields(backup = %snapshot.id))]
    async fn rollback(
        &self,
        snapshot: &Snapshot,
        old: &Subnet,
        new: &Subnet,
        outbound: Option<&str>,
        firewall_switched: bool,
    ) -> Result<()> {
        info!(step = %MigrationStep::RollingBack, "Restoring snapshot");

        if let Err(e) = self.service.stop().await {
            debug!(error = %e, "Service stop during rollback failed");
        }
        if let Err(e) = self.host.delete_link(&self.settings.interface).await {
            debug!(error = %e, "Interface link already gone");
        }
        tokio::time::sleep(self.settings.delays.settle()).await;

        snapshot.restore(&self.sources())?;

        if firewall_switched {
            let failed = self
                .firewall
                .switch_subnet(new.cidr(), old.cidr(), outbound)
                .await;
            if !failed.is_empty() {
                warn!(failed = failed.len(), "Firewall rules not fully restored");
            }
        } else {
            debug!("Firewall was not switched, leaving rules in place");
        }

        self.store.reload()?;
        self.start_service().await?;

        info!(step = %MigrationStep::RolledBack, "Rollback completed");
        Ok(())
    }
}
