//! Service monitoring
//!
//! Read-mostly view of the `wg-quick@` unit and the host around it: journal
//! output, unit state, firewall rules and kernel settings. The only mutating
//! operation is an explicit restart.

use crate::config::{ServerDocument, Settings};
use crate::defaults;
use crate::system::{Firewall, FirewallStatus, HostNetwork};
use crate::wireguard::InterfaceSync;
use crate::{Error, Result};
use ipnet::Ipv4Net;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Journal excerpt for the unit
#[derive(Debug, Clone, Serialize)]
pub struct ServiceLogs {
    pub service: String,
    pub lines_requested: usize,
    pub count: usize,
    pub logs: Vec<String>,
    /// Set when the journal could not be read
    pub message: Option<String>,
}

/// Outcome of an explicit restart
#[derive(Debug, Clone, Serialize)]
pub struct RestartResult {
    pub service: String,
    pub restarted: bool,
    pub service_active: bool,
    pub interface_up: bool,
}

/// Unit state for the status view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceState {
    pub unit: String,
    pub active: bool,
    /// systemd's `ActiveEnterTimestamp`
    pub started_at: Option<String>,
    pub pid: Option<u32>,
}

/// Host facts for the status view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemInfo {
    pub config_document: PathBuf,
    pub peer_store: PathBuf,
    pub backup_dir: PathBuf,
    pub firewall_active: bool,
    pub wireguard_module: bool,
    pub ip_forward: Option<bool>,
}

/// Firewall view with the kernel settings the VPN depends on
#[derive(Debug, Clone, Serialize)]
pub struct FirewallReport {
    pub interface: String,
    pub network: Ipv4Net,
    pub port: u16,
    #[serde(flatten)]
    pub firewall: FirewallStatus,
    pub ip_forward: Option<bool>,
    /// Something is bound to the listen port; `None` when `ss` fails
    pub port_listening: Option<bool>,
}

/// Unit, journal and firewall queries plus restart
#[derive(Clone)]
pub struct ServiceMonitor {
    settings: Arc<Settings>,
    sync: InterfaceSync,
    host: HostNetwork,
    firewall: Firewall,
}

impl ServiceMonitor {
    pub fn new(settings: Arc<Settings>, sync: InterfaceSync, host: HostNetwork, firewall: Firewall) -> Self {
        Self {
            settings,
            sync,
            host,
            firewall,
        }
    }

    fn unit(&self) -> &str {
        self.sync.service().unit()
    }

    /// Last `lines` journal entries, 50 by default
    ///
    /// A journal that cannot be read yields an empty excerpt with a message
    /// rather than an error.
    #[instrument(skip(self))]
    pub async fn logs(&self, lines: Option<usize>) -> ServiceLogs {
        let lines_requested = lines
            .unwrap_or(defaults::LOG_LINES)
            .clamp(1, defaults::MAX_LOG_LINES);
        let (logs, message) = match self.sync.service().logs(lines_requested).await {
            Ok(logs) => (logs, None),
            Err(e) => {
                warn!(error = %e, "Could not read service journal");
                (Vec::new(), Some("No logs available".to_string()))
            }
        };
        ServiceLogs {
            service: self.unit().to_string(),
            lines_requested,
            count: logs.len(),
            logs,
            message,
        }
    }

    /// Restart the unit and report whether it came back
    ///
    /// Uses the same `systemctl restart` / `wg-quick` escalation as peer
    /// sync. If every attempt fails a final `systemctl start` is tried
    /// before the error is returned.
    #[instrument(skip(self))]
    pub async fn restart(&self) -> Result<RestartResult> {
        if let Err(e) = self.sync.restart_service().await {
            warn!(error = %e, "Restart failed, trying a plain start");
            if let Err(start_err) = self.sync.service().start().await {
                return Err(Error::ServiceRestartFailed(format!(
                    "{}; start: {}",
                    e, start_err
                )));
            }
            return Err(e);
        }
        tokio::time::sleep(self.settings.delays.settle()).await;

        let service_active = self.sync.service().is_active().await;
        let interface_up = self.host.link_up(&self.settings.interface).await;
        info!(service_active, interface_up, "Service restarted");
        Ok(RestartResult {
            service: self.unit().to_string(),
            restarted: true,
            service_active,
            interface_up,
        })
    }

    /// Unit activity with start time and PID
    pub async fn service_state(&self) -> ServiceState {
        let service = self.sync.service();
        let active = service.is_active().await;
        let details = service.details().await;
        ServiceState {
            unit: service.unit().to_string(),
            active,
            started_at: details.started_at,
            pid: details.pid,
        }
    }

    pub async fn system_info(&self) -> SystemInfo {
        SystemInfo {
            config_document: self.settings.config_document.clone(),
            peer_store: self.settings.peer_store.clone(),
            backup_dir: self.settings.backup_dir.clone(),
            firewall_active: self.firewall.ufw_active().await,
            wireguard_module: self.host.wireguard_module_loaded().await,
            ip_forward: self.host.ip_forward().await,
        }
    }

    /// UFW, iptables and forwarding state for the VPN interface
    #[instrument(skip(self))]
    pub async fn firewall_status(&self) -> Result<FirewallReport> {
        let document = ServerDocument::load_or_default(&self.settings.config_document)?;
        let network = document.network()?;
        let port = document.port();
        let interface = self.settings.interface.clone();

        let firewall = self.firewall.status(&interface, network, port).await;
        Ok(FirewallReport {
            firewall,
            ip_forward: self.host.ip_forward().await,
            port_listening: self.host.listening_on(port).await,
            interface,
            network,
            port,
        })
    }
}
