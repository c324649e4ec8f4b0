//! Firewall rule updates for a subnet change, and a read-only status view
//!
//! All updates are best-effort. A failed rule change is logged and reported
//! back to the caller, never raised.

use super::runner::{CommandRunner, CommandSpec};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_SSH_PORT: u16 = 22;

/// Rules captured before a migration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FirewallCapture {
    /// `ufw status numbered`
    pub ufw: Option<String>,
    /// `iptables -t nat -L -n -v`
    pub nat: Option<String>,
}

/// `ufw status verbose` summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UfwStatus {
    pub enabled: bool,
    /// Rules mentioning the interface or the listen port
    pub rules: Vec<String>,
}

/// iptables rules mentioning the VPN interface or subnet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IptablesRules {
    pub nat: Vec<String>,
    pub filter: Vec<String>,
    /// NAT rules with a `MASQUERADE` target
    pub masquerade: Vec<String>,
}

/// Firewall state relevant to the VPN
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirewallStatus {
    /// UFW enabled, or iptables carries VPN rules
    pub active: bool,
    /// `None` when ufw is missing or fails
    pub ufw: Option<UfwStatus>,
    /// `None` when iptables is missing or fails
    pub iptables: Option<IptablesRules>,
}

/// Trimmed lines of `output` containing any of `needles`
fn lines_mentioning(output: &str, needles: &[&str]) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| needles.iter().any(|needle| line.contains(needle)))
        .map(str::to_string)
        .collect()
}

/// Parse `ufw status verbose`, keeping rules for `interface` or `port`
pub fn parse_ufw_status(output: &str, interface: &str, port: u16) -> UfwStatus {
    let port = port.to_string();
    let enabled = output
        .lines()
        .any(|line| line.trim() == "Status: active");
    let rules = output
        .lines()
        .skip_while(|line| !line.starts_with("--"))
        .skip(1)
        .map(str::trim)
        .filter(|line| {
            line.contains(interface)
                || line
                    .split(|c: char| !c.is_ascii_digit())
                    .any(|word| word == port)
        })
        .map(str::to_string)
        .collect();
    UfwStatus { enabled, rules }
}

/// UFW and iptables NAT management
#[derive(Clone)]
pub struct Firewall {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
    sshd_config: PathBuf,
}

impl Firewall {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self {
            runner,
            timeout,
            sshd_config: PathBuf::from("/etc/ssh/sshd_config"),
        }
    }

    /// Read the SSH port from a different sshd config
    pub fn with_sshd_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.sshd_config = path.into();
        self
    }

    /// SSH port from sshd_config, 22 when not set
    pub fn ssh_port(&self) -> u16 {
        std::fs::read_to_string(&self.sshd_config)
            .ok()
            .and_then(|content| {
                content.lines().map(str::trim).find_map(|line| {
                    line.strip_prefix("Port ")
                        .and_then(|port| port.trim().parse().ok())
                })
            })
            .unwrap_or(DEFAULT_SSH_PORT)
    }

    async fn output_of<const N: usize>(&self, program: &str, args: [&str; N]) -> Option<String> {
        let spec = CommandSpec::new(program, args).with_timeout(self.timeout);
        match self.runner.run(spec).await {
            Ok(output) if output.success() => Some(output.stdout),
            _ => None,
        }
    }

    /// Snapshot of current UFW and NAT rules
    pub async fn capture(&self) -> FirewallCapture {
        FirewallCapture {
            ufw: self.output_of("ufw", ["status", "numbered"]).await,
            nat: self.output_of("iptables", ["-t", "nat", "-L", "-n", "-v"]).await,
        }
    }

    /// `ufw status` reports the firewall as active
    pub async fn ufw_active(&self) -> bool {
        self.output_of("ufw", ["status"])
            .await
            .map_or(false, |output| output.lines().any(|l| l.trim() == "Status: active"))
    }

    /// UFW and iptables rules that concern `interface`, `subnet` or `port`
    pub async fn status(&self, interface: &str, subnet: Ipv4Net, port: u16) -> FirewallStatus {
        let ufw = self
            .output_of("ufw", ["status", "verbose"])
            .await
            .map(|output| parse_ufw_status(&output, interface, port));

        let subnet = subnet.to_string();
        let needles = [interface, subnet.as_str()];
        let nat = self.output_of("iptables", ["-t", "nat", "-L", "-n", "-v"]).await;
        let filter = self.output_of("iptables", ["-L", "-n", "-v"]).await;
        let iptables = nat.map(|nat| IptablesRules {
            masquerade: lines_mentioning(&nat, &["MASQUERADE"]),
            nat: lines_mentioning(&nat, &needles),
            filter: filter
                .map(|filter| lines_mentioning(&filter, &needles))
                .unwrap_or_default(),
        });

        let active = ufw.as_ref().map_or(false, |u| u.enabled)
            || iptables
                .as_ref()
                .map_or(false, |r| !r.nat.is_empty() || !r.filter.is_empty());
        FirewallStatus {
            active,
            ufw,
            iptables,
        }
    }

    /// Run one rule change; returns a description on failure
    async fn apply(&self, program: &str, args: Vec<String>) -> Option<String> {
        let spec = CommandSpec::new(program, args).with_timeout(self.timeout);
        let command_line = spec.command_line();
        match self.runner.run_checked(spec).await {
            Ok(_) => {
                debug!(cmd = %command_line, "Firewall rule applied");
                None
            }
            Err(e) => {
                warn!(cmd = %command_line, error = %e, "Firewall rule change failed");
                Some(command_line)
            }
        }
    }

    /// Move host-access and NAT rules from `old` to `new`
    ///
    /// NAT rules are only touched when the outbound interface is known.
    /// Returns the commands that failed.
    pub async fn switch_subnet(
        &self,
        old: Ipv4Net,
        new: Ipv4Net,
        outbound_interface: Option<&str>,
    ) -> Vec<String> {
        let ssh_port = self.ssh_port().to_string();
        let ssh_port = ssh_port.as_str();
        let old_cidr = old.to_string();
        let old = old_cidr.as_str();
        let new_cidr = new.to_string();
        let new = new_cidr.as_str();
        let args = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        let mut steps: Vec<(&str, Vec<String>)> = vec![
            ("ufw", args(&["delete", "allow", "from", old, "to", "any", "port", ssh_port])),
            ("ufw", args(&["allow", "from", new, "to", "any", "port", ssh_port])),
            ("ufw", args(&["delete", "allow", "from", old])),
            ("ufw", args(&["allow", "from", new])),
        ];
        if let Some(iface) = outbound_interface {
            steps.push((
                "iptables",
                args(&["-t", "nat", "-D", "POSTROUTING", "-s", old, "-o", iface, "-j", "MASQUERADE"]),
            ));
            steps.push((
                "iptables",
                args(&["-t", "nat", "-A", "POSTROUTING", "-s", new, "-o", iface, "-j", "MASQUERADE"]),
            ));
            steps.push(("netfilter-persistent", args(&["save"])));
        }

        let mut failed = Vec::new();
        for (program, step_args) in steps {
            if let Some(command_line) = self.apply(program, step_args).await {
                failed.push(command_line);
            }
        }
        failed
    }
}
