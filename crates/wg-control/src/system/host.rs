//! Host network queries through `ip`

use super::runner::{CommandRunner, CommandSpec};
use crate::models::Subnet;
use crate::Result;
use ipnet::Ipv4Net;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Interface carrying the default route
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MainInterface {
    pub name: String,
    /// First IPv4 address on the interface
    pub ip: Option<Ipv4Addr>,
    pub network: Option<Ipv4Net>,
}

/// Host network overlapping a candidate subnet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkConflict {
    pub interface: String,
    pub network: Ipv4Net,
}

/// `(interface, address/prefix)` for every IPv4 address in `ip addr show` output
pub fn parse_ip_addr(output: &str) -> Vec<(String, Ipv4Net)> {
    let mut current: Option<String> = None;
    let mut addresses = Vec::new();

    for line in output.lines() {
        if !line.starts_with(char::is_whitespace) {
            // "3: wg_main: <POINTOPOINT,NOARP,UP> mtu 1420 ..."
            current = line
                .split(':')
                .nth(1)
                .map(|name| name.trim().split('@').next().unwrap_or_default().to_string())
                .filter(|name| !name.is_empty());
            continue;
        }
        let mut words = line.split_whitespace();
        if words.next() != Some("inet") {
            continue;
        }
        if let (Some(iface), Some(addr)) = (&current, words.next()) {
            if let Ok(net) = addr.parse::<Ipv4Net>() {
                addresses.push((iface.clone(), net));
            }
        }
    }
    addresses
}

/// `dev` of an `ip route show default` line
pub fn parse_default_route(output: &str) -> Option<String> {
    let mut words = output.split_whitespace();
    while let Some(word) = words.next() {
        if word == "dev" {
            return words.next().map(str::to_string);
        }
    }
    None
}

/// Whether the flags of an `ip link show` line include `UP`
pub fn parse_link_up(output: &str) -> bool {
    output
        .lines()
        .filter_map(|line| {
            let start = line.find('<')?;
            let end = line[start..].find('>')? + start;
            Some(&line[start + 1..end])
        })
        .any(|flags| flags.split(',').any(|flag| flag == "UP"))
}

/// Whether any socket in `ss -tunlp` output is bound to `port` locally
pub fn parse_listening(output: &str, port: u16) -> bool {
    let suffix = format!(":{}", port);
    output
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().nth(4))
        .any(|local| local.ends_with(&suffix))
}

/// Queries and link operations on the host network stack
#[derive(Clone)]
pub struct HostNetwork {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl HostNetwork {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    fn ip<const N: usize>(&self, args: [&str; N]) -> CommandSpec {
        CommandSpec::new("ip", args).with_timeout(self.timeout)
    }

    /// `ip addr show <iface>` output
    pub async fn addresses_of(&self, interface: &str) -> Result<String> {
        self.runner.run_checked(self.ip(["addr", "show", interface])).await
    }

    /// `ip link delete <iface>`
    pub async fn delete_link(&self, interface: &str) -> Result<()> {
        self.runner
            .run_checked(self.ip(["link", "delete", interface]))
            .await?;
        Ok(())
    }

    /// `ip link show <iface>` reports the link as up
    pub async fn link_up(&self, interface: &str) -> bool {
        match self.runner.run_checked(self.ip(["link", "show", interface])).await {
            Ok(output) => parse_link_up(&output),
            Err(e) => {
                debug!(interface, error = %e, "Link not found");
                false
            }
        }
    }

    /// `wireguard` appears in `lsmod`
    pub async fn wireguard_module_loaded(&self) -> bool {
        let spec = CommandSpec::new("lsmod", Vec::<String>::new()).with_timeout(self.timeout);
        match self.runner.run_checked(spec).await {
            Ok(output) => output
                .lines()
                .any(|line| line.split_whitespace().next() == Some("wireguard")),
            Err(_) => false,
        }
    }

    /// `net.ipv4.ip_forward`; `None` when it cannot be read
    pub async fn ip_forward(&self) -> Option<bool> {
        let spec =
            CommandSpec::new("sysctl", ["-n", "net.ipv4.ip_forward"]).with_timeout(self.timeout);
        let output = self.runner.run_checked(spec).await.ok()?;
        match output.trim() {
            "1" => Some(true),
            "0" => Some(false),
            _ => None,
        }
    }

    /// Some socket listens on `port`; `None` when `ss` fails
    pub async fn listening_on(&self, port: u16) -> Option<bool> {
        let spec = CommandSpec::new("ss", ["-tunlp"]).with_timeout(self.timeout);
        let output = self.runner.run_checked(spec).await.ok()?;
        Some(parse_listening(&output, port))
    }

    /// Interface carrying the default route, if it can be determined
    pub async fn main_interface(&self) -> Option<MainInterface> {
        let route = self
            .runner
            .run_checked(self.ip(["route", "show", "default"]))
            .await
            .ok()?;
        let name = parse_default_route(&route)?;
        let address = match self.addresses_of(&name).await {
            Ok(output) => parse_ip_addr(&output).into_iter().next().map(|(_, net)| net),
            Err(_) => None,
        };
        Some(MainInterface {
            ip: address.map(|net| net.addr()),
            network: address,
            name,
        })
    }

    /// Host networks overlapping `candidate`, ignoring WireGuard interfaces
    ///
    /// `wireguard_interface` and any `wg*` interface are skipped. A host
    /// that cannot be queried reports no conflicts.
    pub async fn conflicts(&self, candidate: &Subnet, wireguard_interface: &str) -> Vec<NetworkConflict> {
        let output = match self.runner.run_checked(self.ip(["addr", "show"])).await {
            Ok(output) => output,
            Err(e) => {
                debug!(error = %e, "Could not list host addresses");
                return Vec::new();
            }
        };
        parse_ip_addr(&output)
            .into_iter()
            .filter(|(iface, _)| iface != wireguard_interface && !iface.starts_with("wg"))
            .map(|(iface, net)| (iface, net.trunc()))
            .filter(|(_, net)| candidate.overlaps(net))
            .map(|(interface, network)| NetworkConflict { interface, network })
            .collect()
    }
}
