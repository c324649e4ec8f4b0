//! Control plane facade
//!
//! Owns every component and serializes access: mutations take the write
//! half of a process-wide lock, reads take the read half.

use crate::config::{ServerDocument, Settings};
use crate::migration::{MigrationOutcome, SubnetAnalysis, SubnetMigrator, SubnetValidation};
use crate::models::{Peer, Subnet};
use crate::service::{
    AddedPeer, ExportedPeer, FirewallReport, PeerListing, PeerManager, PeerSummary, RemovedPeer,
    RestartResult, ServerStatus, ServiceLogs, ServiceMonitor,
};
use crate::store::PeerStore;
use crate::system::{CommandRunner, Firewall, HostNetwork, OverlayState, ServiceManager};
use crate::tweaks::{TweakChange, TweakHook, TweakInfo, TweakRegistry};
use crate::wireguard::{
    ConnectionProbe, InterfaceFile, InterfaceSync, KeyGenerator, ReconcileReport, WgTool,
};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

/// Typed entry point for every peer, subnet, service and tweak operation
pub struct ControlPlane {
    settings: Arc<Settings>,
    store: Arc<PeerStore>,
    peers: PeerManager,
    monitor: ServiceMonitor,
    migrator: SubnetMigrator,
    tweaks: TweakRegistry,
    lock: RwLock<()>,
}

impl ControlPlane {
    /// Wire all components from `settings`, running commands through `runner`
    ///
    /// Opens (or creates) the peer store using the subnet recorded in the
    /// main configuration document.
    pub fn open(settings: Settings, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        let settings = Arc::new(settings);
        let document = ServerDocument::load_or_default(&settings.config_document)?;
        let subnet = Subnet::new(document.network()?);
        let store = Arc::new(PeerStore::open(&settings.peer_store, subnet)?);

        let tool = WgTool::new(runner.clone(), settings.interface.as_str(), settings.timeouts.wg_tool())
            .with_interface_timeout(settings.timeouts.service());
        let service = ServiceManager::new(runner.clone(), settings.service_unit(), settings.timeouts.service());
        let host = HostNetwork::new(runner.clone(), settings.timeouts.wg_tool());
        let firewall = Firewall::new(runner, settings.timeouts.firewall());
        let file = InterfaceFile::new(settings.interface_config_path());
        let probe = ConnectionProbe::new(
            tool.clone(),
            Duration::from_secs(settings.active_threshold_secs),
        );

        let sync = InterfaceSync::new(
            tool.clone(),
            service.clone(),
            host.clone(),
            file.clone(),
            settings.delays.clone(),
        );
        let monitor =
            ServiceMonitor::new(settings.clone(), sync.clone(), host.clone(), firewall.clone());
        let peers = PeerManager::new(
            settings.clone(),
            store.clone(),
            KeyGenerator::new(tool),
            sync,
            probe.clone(),
            monitor.clone(),
        );
        let migrator = SubnetMigrator::new(
            settings.clone(),
            store.clone(),
            file,
            service,
            host,
            firewall,
            OverlayState::new(&settings.ghost_state_file),
            probe,
        );

        info!(
            interface = %settings.interface,
            subnet = %subnet,
            peers = store.len(),
            "Control plane ready"
        );
        Ok(Self {
            tweaks: TweakRegistry::new(&settings.config_document),
            settings,
            store,
            peers,
            monitor,
            migrator,
            lock: RwLock::new(()),
        })
    }

    /// Register a runtime side effect for a tweak
    pub fn with_tweak_hook(mut self, name: &str, hook: Arc<dyn TweakHook>) -> Result<Self> {
        self.tweaks = self.tweaks.with_hook(name, hook)?;
        Ok(self)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &PeerStore {
        &self.store
    }

    // Peers

    pub async fn add_peer(&self, name: &str) -> Result<AddedPeer> {
        let _guard = self.lock.write().await;
        self.peers.add(name).await
    }

    pub async fn remove_peer(&self, name: &str) -> Result<RemovedPeer> {
        let _guard = self.lock.write().await;
        self.peers.remove(name).await
    }

    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let _guard = self.lock.write().await;
        self.peers.reconcile().await
    }

    pub async fn get_peer(&self, name: &str) -> Result<Peer> {
        let _guard = self.lock.read().await;
        self.peers.get(name)
    }

    pub async fn list_peers(
        &self,
        page: usize,
        per_page: Option<usize>,
        search: Option<&str>,
    ) -> Result<PeerListing> {
        let _guard = self.lock.read().await;
        self.peers.list(page, per_page, search).await
    }

    pub async fn recent_peers(&self, count: Option<usize>) -> Result<Vec<PeerSummary>> {
        let _guard = self.lock.read().await;
        self.peers.recent(count).await
    }

    pub async fn export_peer(&self, name: &str) -> Result<ExportedPeer> {
        let _guard = self.lock.read().await;
        self.peers.export(name).await
    }

    pub async fn status(&self) -> Result<ServerStatus> {
        let _guard = self.lock.read().await;
        self.peers.status().await
    }

    // Service

    pub async fn service_logs(&self, lines: Option<usize>) -> Result<ServiceLogs> {
        let _guard = self.lock.read().await;
        Ok(self.monitor.logs(lines).await)
    }

    pub async fn restart_service(&self) -> Result<RestartResult> {
        let _guard = self.lock.write().await;
        self.monitor.restart().await
    }

    pub async fn firewall_status(&self) -> Result<FirewallReport> {
        let _guard = self.lock.read().await;
        self.monitor.firewall_status().await
    }

    // Subnet

    pub async fn analyze_subnet(&self) -> Result<SubnetAnalysis> {
        let _guard = self.lock.read().await;
        self.migrator.analyze().await
    }

    pub async fn validate_subnet(&self, cidr: &str, skip_blockers: bool) -> Result<SubnetValidation> {
        let _guard = self.lock.read().await;
        self.migrator.validate_with(cidr, skip_blockers).await
    }

    pub async fn change_subnet(&self, cidr: &str, force: bool) -> Result<MigrationOutcome> {
        let _guard = self.lock.write().await;
        self.migrator.execute(cidr, force).await
    }

    // Tweaks

    pub async fn tweaks(&self) -> Result<Vec<TweakInfo>> {
        let _guard = self.lock.read().await;
        self.tweaks.list()
    }

    pub async fn tweak(&self, name: &str) -> Result<TweakInfo> {
        let _guard = self.lock.read().await;
        self.tweaks.get(name)
    }

    pub async fn set_tweak(&self, name: &str, value: bool) -> Result<TweakChange> {
        let _guard = self.lock.write().await;
        self.tweaks.set(name, value).await
    }
}
