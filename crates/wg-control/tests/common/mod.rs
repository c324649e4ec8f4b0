//! Shared fixtures for integration tests
//!
//! [`FakeHost`] stands in for `wg`, `wg-quick`, `systemctl`, `journalctl`,
//! `ip`, `ufw`, `iptables`, `netfilter-persistent`, `ss`, `sysctl` and
//! `lsmod`. It keeps just enough state to behave like a real host: whether
//! the unit is running, which peers the kernel knows, the interface address
//! taken from the config file, the MASQUERADE rules and the unit journal.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use wg_control::wireguard::server_file::{interface_address, peer_sections};
use wg_control::{CommandOutput, CommandRunner, CommandSpec, ControlPlane, Result, Settings};

pub const SERVER_PUBLIC_KEY: &str = "SERVERPUBKEYSERVERPUBKEYSERVERPUBKEYSERVER=";

const UFW_VERBOSE: &str = "\
Status: active
Logging: on (low)
Default: deny (incoming), allow (outgoing), deny (routed)
New profiles: skip

To                         Action      From
--                         ------      ----
22/tcp                     ALLOW IN    Anywhere
51820/udp                  ALLOW IN    Anywhere
";

const FILTER_TABLE: &str = "\
Chain INPUT (policy ACCEPT 0 packets, 0 bytes)
 pkts bytes target     prot opt in     out     source               destination

Chain FORWARD (policy DROP 0 packets, 0 bytes)
 pkts bytes target     prot opt in     out     source               destination
  120  9600 ACCEPT     all  --  wg_main *       0.0.0.0/0            0.0.0.0/0
  118 15104 ACCEPT     all  --  *      wg_main  0.0.0.0/0            0.0.0.0/0
";

const LSMOD: &str = "\
Module                  Size  Used by
wireguard             118784  0
libchacha20poly1305    16384  1 wireguard
ip6_udp_tunnel         16384  1 wireguard
";

/// Commands starting with `prefix` fail, optionally only while the
/// interface config contains `config_contains`
#[derive(Debug, Clone)]
struct FailRule {
    prefix: String,
    config_contains: Option<String>,
}

#[derive(Debug, Default)]
struct HostState {
    key_counter: u64,
    service_active: bool,
    /// public key -> allowed ips
    kernel_peers: BTreeMap<String, String>,
    handshakes: HashMap<String, String>,
    fail_rules: Vec<FailRule>,
    host_networks: Vec<(String, String)>,
    /// (source, outbound interface) of each POSTROUTING MASQUERADE rule
    nat_rules: Vec<(String, String)>,
    ip_forward: bool,
    journal: Vec<String>,
}

/// Runs once, just before the first command starting with its prefix
type CommandHook = (String, Box<dyn FnOnce() + Send>);

/// Scripted host
pub struct FakeHost {
    interface: String,
    interface_config: PathBuf,
    state: Mutex<HostState>,
    calls: Mutex<Vec<String>>,
    hooks: Mutex<Vec<CommandHook>>,
}

/// 44-character key with `tag` and `n` embedded
fn fake_key(tag: &str, n: u64) -> String {
    format!("{:0>43}=", format!("{}{}", tag, n))
}

impl FakeHost {
    pub fn new(interface: &str, interface_config: &Path) -> Self {
        Self {
            interface: interface.to_string(),
            interface_config: interface_config.to_path_buf(),
            state: Mutex::new(HostState {
                service_active: true,
                host_networks: vec![("eth0".to_string(), "203.0.113.10/24".to_string())],
                ip_forward: true,
                journal: vec![format!(
                    "Oct 19 09:12:44 vpn systemd[1]: Started WireGuard via wg-quick(8) for {}.",
                    interface
                )],
                ..Default::default()
            }),
            calls: Mutex::new(Vec::new()),
            hooks: Mutex::new(Vec::new()),
        }
    }

    /// Run `hook` before the next command starting with `prefix`
    ///
    /// Hooks on the same prefix fire in registration order, one per call.
    pub fn on_command(&self, prefix: &str, hook: impl FnOnce() + Send + 'static) {
        self.hooks.lock().push((prefix.to_string(), Box::new(hook)));
    }

    pub fn fail(&self, prefix: &str) {
        self.state.lock().fail_rules.push(FailRule {
            prefix: prefix.to_string(),
            config_contains: None,
        });
    }

    pub fn fail_while_config_contains(&self, prefix: &str, needle: &str) {
        self.state.lock().fail_rules.push(FailRule {
            prefix: prefix.to_string(),
            config_contains: Some(needle.to_string()),
        });
    }

    pub fn clear_failures(&self) {
        self.state.lock().fail_rules.clear();
    }

    pub fn set_handshake(&self, public_key: &str, handshake: &str) {
        self.state
            .lock()
            .handshakes
            .insert(public_key.to_string(), handshake.to_string());
    }

    pub fn add_host_network(&self, interface: &str, cidr: &str) {
        self.state
            .lock()
            .host_networks
            .push((interface.to_string(), cidr.to_string()));
    }

    pub fn add_nat_rule(&self, source: &str, outbound: &str) {
        self.state
            .lock()
            .nat_rules
            .push((source.to_string(), outbound.to_string()));
    }

    pub fn nat_rules(&self) -> Vec<(String, String)> {
        self.state.lock().nat_rules.clone()
    }

    pub fn set_ip_forward(&self, enabled: bool) {
        self.state.lock().ip_forward = enabled;
    }

    pub fn journal(&self) -> Vec<String> {
        self.state.lock().journal.clone()
    }

    pub fn service_active(&self) -> bool {
        self.state.lock().service_active
    }

    pub fn kernel_peers(&self) -> BTreeMap<String, String> {
        self.state.lock().kernel_peers.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls_starting_with(prefix).len()
    }

    fn take_hook(&self, command_line: &str) -> Option<Box<dyn FnOnce() + Send>> {
        let mut hooks = self.hooks.lock();
        let index = hooks
            .iter()
            .position(|(prefix, _)| command_line.starts_with(prefix.as_str()))?;
        Some(hooks.remove(index).1)
    }

    fn config(&self) -> String {
        std::fs::read_to_string(&self.interface_config).unwrap_or_default()
    }

    fn should_fail(&self, command_line: &str) -> bool {
        let rules = self.state.lock().fail_rules.clone();
        rules.iter().any(|rule| {
            command_line.starts_with(&rule.prefix)
                && rule
                    .config_contains
                    .as_ref()
                    .map_or(true, |needle| self.config().contains(needle.as_str()))
        })
    }

    /// Bring the interface up from the config file, like `wg-quick up`
    fn bring_up(&self) {
        let config = self.config();
        let mut state = self.state.lock();
        state.service_active = true;
        let entry = format!(
            "Oct 19 09:30:00 vpn systemd[1]: Started WireGuard via wg-quick(8) for {}.",
            self.interface
        );
        state.journal.push(entry);
        state.kernel_peers = peer_sections(&config)
            .into_iter()
            .filter_map(|section| {
                section
                    .public_key
                    .map(|pk| (pk, section.allowed_ips.join(", ")))
            })
            .collect();
    }

    fn bring_down(&self) {
        let mut state = self.state.lock();
        if state.service_active {
            let entry = format!(
                "Oct 19 09:29:58 vpn systemd[1]: Stopped WireGuard via wg-quick(8) for {}.",
                self.interface
            );
            state.journal.push(entry);
        }
        state.service_active = false;
        state.kernel_peers.clear();
    }

    fn journalctl(&self, count: &str) -> CommandOutput {
        let state = self.state.lock();
        let count: usize = count.parse().unwrap_or(0);
        let start = state.journal.len().saturating_sub(count);
        let mut out = state.journal[start..].join("\n");
        out.push('\n');
        CommandOutput::ok(out)
    }

    fn nat_table(&self) -> CommandOutput {
        let state = self.state.lock();
        let mut out = String::from(
            "Chain PREROUTING (policy ACCEPT 0 packets, 0 bytes)\n \
             pkts bytes target     prot opt in     out     source               destination\n\n\
             Chain POSTROUTING (policy ACCEPT 0 packets, 0 bytes)\n \
             pkts bytes target     prot opt in     out     source               destination\n",
        );
        for (source, outbound) in &state.nat_rules {
            out.push_str(&format!(
                "   42  2520 MASQUERADE  all  --  *      {:<7} {:<20} 0.0.0.0/0\n",
                outbound, source
            ));
        }
        CommandOutput::ok(out)
    }

    fn ss(&self) -> CommandOutput {
        let mut out = String::from(
            "Netid State  Recv-Q Send-Q Local Address:Port Peer Address:Port Process\n\
             tcp   LISTEN 0      128          0.0.0.0:22        0.0.0.0:*     users:((\"sshd\",pid=611,fd=3))\n",
        );
        if self.service_active() {
            out.push_str("udp   UNCONN 0      0            0.0.0.0:51820     0.0.0.0:*\n");
        }
        CommandOutput::ok(out)
    }

    fn wg_show(&self) -> CommandOutput {
        let state = self.state.lock();
        if !state.service_active {
            return CommandOutput::failed(1, "Unable to access interface: No such device");
        }
        let mut out = format!(
            "interface: {}\n  public key: {}\n  private key: (hidden)\n  listening port: 51820\n",
            self.interface, SERVER_PUBLIC_KEY
        );
        for (public_key, allowed) in &state.kernel_peers {
            out.push_str(&format!("\npeer: {}\n  preshared key: (hidden)\n", public_key));
            if let Some(handshake) = state.handshakes.get(public_key) {
                out.push_str("  endpoint: 198.51.100.20:51234\n");
                out.push_str(&format!("  allowed ips: {}\n", allowed));
                out.push_str(&format!("  latest handshake: {}\n", handshake));
                out.push_str("  transfer: 1.50 KiB received, 3.25 MiB sent\n");
            } else {
                out.push_str(&format!("  allowed ips: {}\n", allowed));
            }
        }
        CommandOutput::ok(out)
    }

    fn ip_addr(&self, interface: Option<&str>) -> CommandOutput {
        let state = self.state.lock();
        let mut blocks: Vec<(String, String)> = state.host_networks.clone();
        if state.service_active {
            if let Some(address) = interface_address(&self.config()) {
                blocks.push((self.interface.clone(), address));
            }
        }
        let selected: Vec<&(String, String)> = blocks
            .iter()
            .filter(|(name, _)| interface.map_or(true, |i| i == name))
            .collect();
        if interface.is_some() && selected.is_empty() {
            return CommandOutput::failed(1, "Device does not exist.");
        }
        let mut out = String::from(
            "1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536\n    inet 127.0.0.1/8 scope host lo\n",
        );
        if interface.is_some() {
            out.clear();
        }
        for (i, (name, cidr)) in selected.iter().enumerate() {
            out.push_str(&format!(
                "{}: {}: <UP,LOWER_UP> mtu 1500\n    inet {} scope global {}\n",
                i + 2,
                name,
                cidr,
                name
            ));
        }
        CommandOutput::ok(out)
    }

    fn dispatch(&self, spec: &CommandSpec) -> CommandOutput {
        let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();
        match (spec.program.as_str(), args.as_slice()) {
            ("wg", ["genkey"]) => {
                let n = self.next_key();
                CommandOutput::ok(format!("{}\n", fake_key("priv", n)))
            }
            ("wg", ["genpsk"]) => {
                let n = self.next_key();
                CommandOutput::ok(format!("{}\n", fake_key("psk", n)))
            }
            ("wg", ["pubkey"]) => {
                let private = spec.stdin.as_deref().unwrap_or("").trim();
                CommandOutput::ok(format!("{}\n", private.replacen("priv", "pubk", 1)))
            }
            ("wg", ["show", _]) => self.wg_show(),
            ("wg", ["set", _, "peer", public_key, "remove"]) => {
                let mut state = self.state.lock();
                if !state.service_active {
                    return CommandOutput::failed(1, "No such device");
                }
                state.kernel_peers.remove(*public_key);
                CommandOutput::ok("")
            }
            ("wg", ["set", _, "peer", public_key, "preshared-key", "/dev/stdin", "allowed-ips", allowed]) => {
                let mut state = self.state.lock();
                if !state.service_active {
                    return CommandOutput::failed(1, "No such device");
                }
                state
                    .kernel_peers
                    .insert(public_key.to_string(), allowed.to_string());
                CommandOutput::ok("")
            }
            ("wg-quick", ["save", _]) => CommandOutput::ok(""),
            ("wg-quick", ["up", _]) => {
                self.bring_up();
                CommandOutput::ok("")
            }
            ("wg-quick", ["down", _]) => {
                self.bring_down();
                CommandOutput::ok("")
            }
            ("systemctl", ["start" | "restart", _]) => {
                self.bring_up();
                CommandOutput::ok("")
            }
            ("systemctl", ["stop", _]) => {
                self.bring_down();
                CommandOutput::ok("")
            }
            ("systemctl", ["show", _, "--property=ActiveEnterTimestamp,MainPID"]) => {
                if self.service_active() {
                    CommandOutput::ok("ActiveEnterTimestamp=Mon 2026-10-19 09:12:44 UTC\nMainPID=0\n")
                } else {
                    CommandOutput::ok("ActiveEnterTimestamp=\nMainPID=0\n")
                }
            }
            ("journalctl", ["-u", _, "-n", count, "--no-pager"]) => self.journalctl(count),
            ("systemctl", ["is-active", _]) => {
                if self.service_active() {
                    CommandOutput::ok("active\n")
                } else {
                    CommandOutput {
                        code: Some(3),
                        stdout: "inactive\n".to_string(),
                        stderr: String::new(),
                    }
                }
            }
            ("ip", ["addr", "show"]) => self.ip_addr(None),
            ("ip", ["addr", "show", interface]) => self.ip_addr(Some(interface)),
            ("ip", ["route", "show", "default"]) => {
                CommandOutput::ok("default via 203.0.113.1 dev eth0 proto static\n")
            }
            ("ip", ["link", "show", interface]) => {
                if *interface == self.interface && self.service_active() {
                    CommandOutput::ok(format!(
                        "5: {}: <POINTOPOINT,NOARP,UP,LOWER_UP> mtu 1420 qdisc noqueue state UNKNOWN\n    link/none\n",
                        interface
                    ))
                } else {
                    CommandOutput::failed(1, format!("Device \"{}\" does not exist.", interface))
                }
            }
            ("lsmod", []) => CommandOutput::ok(LSMOD),
            ("sysctl", ["-n", "net.ipv4.ip_forward"]) => {
                let enabled = self.state.lock().ip_forward;
                CommandOutput::ok(if enabled { "1\n" } else { "0\n" })
            }
            ("ss", ["-tunlp"]) => self.ss(),
            ("ufw", ["status"]) => CommandOutput::ok("Status: active\n"),
            ("ufw", ["status", "verbose"]) => CommandOutput::ok(UFW_VERBOSE),
            ("iptables", ["-t", "nat", "-A", "POSTROUTING", "-s", source, "-o", outbound, "-j", "MASQUERADE"]) => {
                self.add_nat_rule(source, outbound);
                CommandOutput::ok("")
            }
            ("iptables", ["-t", "nat", "-D", "POSTROUTING", "-s", source, "-o", outbound, "-j", "MASQUERADE"]) => {
                let mut state = self.state.lock();
                let found = state
                    .nat_rules
                    .iter()
                    .position(|(s, o)| s == source && o == outbound);
                match found {
                    Some(index) => {
                        state.nat_rules.remove(index);
                        CommandOutput::ok("")
                    }
                    None => CommandOutput::failed(
                        1,
                        "iptables: Bad rule (does a matching rule exist in that chain?).",
                    ),
                }
            }
            ("iptables", ["-t", "nat", "-L", "-n", "-v"]) => self.nat_table(),
            ("iptables", ["-L", "-n", "-v"]) => CommandOutput::ok(FILTER_TABLE),
            ("ip", ["link", "delete", _]) => {
                if self.service_active() {
                    self.bring_down();
                    CommandOutput::ok("")
                } else {
                    CommandOutput::failed(1, "Cannot find device")
                }
            }
            ("ufw", _) | ("iptables", _) | ("netfilter-persistent", _) => CommandOutput::ok(""),
            _ => CommandOutput::failed(127, format!("{}: command not found", spec.program)),
        }
    }

    fn next_key(&self) -> u64 {
        let mut state = self.state.lock();
        state.key_counter += 1;
        state.key_counter
    }
}

#[async_trait]
impl CommandRunner for FakeHost {
    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput> {
        let command_line = spec.command_line();
        self.calls.lock().push(command_line.clone());
        if let Some(hook) = self.take_hook(&command_line) {
            hook();
        }
        if self.should_fail(&command_line) {
            return Ok(CommandOutput::failed(1, format!("{}: simulated failure", command_line)));
        }
        Ok(self.dispatch(&spec))
    }
}

/// A temp install with a running fake host
pub struct TestEnv {
    pub dir: TempDir,
    pub settings: Settings,
    pub host: Arc<FakeHost>,
}

impl TestEnv {
    /// Fresh install on `subnet` with no peers
    pub fn new(subnet: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let settings = Settings::rooted_at(dir.path());
        let net: ipnet::Ipv4Net = subnet.parse().unwrap();
        let server_ip = ipnet::Ipv4Net::new(
            std::net::Ipv4Addr::from(u32::from(net.network()) + 1),
            net.prefix_len(),
        )
        .unwrap();

        std::fs::create_dir_all(settings.config_document.parent().unwrap()).unwrap();
        std::fs::write(
            &settings.config_document,
            serde_json::to_string_pretty(&json!({
                "wireguard": {"network": subnet, "port": 51820},
                "server": {"ip": "203.0.113.10", "public_key": SERVER_PUBLIC_KEY},
                "dns": {"primary": "9.9.9.9", "secondary": "1.1.1.1"}
            }))
            .unwrap(),
        )
        .unwrap();

        let interface_config = settings.interface_config_path();
        std::fs::create_dir_all(interface_config.parent().unwrap()).unwrap();
        std::fs::write(
            &interface_config,
            format!(
                "[Interface]\nPrivateKey = {}\nAddress = {}\nListenPort = 51820\n",
                fake_key("server", 0),
                server_ip
            ),
        )
        .unwrap();

        let host = Arc::new(FakeHost::new(&settings.interface, &interface_config));
        host.add_nat_rule(subnet, "eth0");
        Self {
            dir,
            settings,
            host,
        }
    }

    pub fn control(&self) -> ControlPlane {
        ControlPlane::open(self.settings.clone(), self.host.clone()).unwrap()
    }

    pub fn interface_config(&self) -> String {
        std::fs::read_to_string(self.settings.interface_config_path()).unwrap()
    }

    pub fn document(&self) -> serde_json::Value {
        serde_json::from_str(&std::fs::read_to_string(&self.settings.config_document).unwrap())
            .unwrap()
    }

    pub fn store_json(&self) -> serde_json::Value {
        serde_json::from_str(&std::fs::read_to_string(&self.settings.peer_store).unwrap()).unwrap()
    }

    pub fn set_ghost_mode(&self, enabled: bool) {
        std::fs::write(
            &self.settings.ghost_state_file,
            json!({"enabled": enabled}).to_string(),
        )
        .unwrap();
    }
}
