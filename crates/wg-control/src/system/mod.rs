//! Host collaborators
//!
//! Thin typed wrappers over external tools, all sharing one
//! [`CommandRunner`].

mod firewall;
mod host;
mod overlay;
mod runner;
mod service;

pub use firewall::{
    parse_ufw_status, Firewall, FirewallCapture, FirewallStatus, IptablesRules, UfwStatus,
};
pub use host::{
    parse_default_route, parse_ip_addr, parse_link_up, parse_listening, HostNetwork,
    MainInterface, NetworkConflict,
};
pub use overlay::OverlayState;
pub use runner::{CommandOutput, CommandRunner, CommandSpec, SystemRunner, DEFAULT_COMMAND_TIMEOUT};
pub use service::{parse_show_properties, ServiceDetails, ServiceManager};
