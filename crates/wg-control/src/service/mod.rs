//! Peer management and service monitoring

mod manager;
mod monitor;

pub use manager::{
    paginate, AddedPeer, ExportedPeer, Pagination, PeerListing, PeerManager, PeerSummary,
    PeerTotals, RemovedPeer, ServerSettingsView, ServerStatus,
};
pub use monitor::{
    FirewallReport, RestartResult, ServiceLogs, ServiceMonitor, ServiceState, SystemInfo,
};
