//! `wg` and `wg-quick` invocations

use crate::system::{CommandRunner, CommandSpec};
use crate::Result;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Typed wrapper over the WireGuard command-line tools for one interface
#[derive(Clone)]
pub struct WgTool {
    runner: Arc<dyn CommandRunner>,
    interface: String,
    timeout: Duration,
    /// Limit for `wg-quick up`/`down`, which bring the whole interface up
    quick_timeout: Duration,
}

impl WgTool {
    pub fn new(runner: Arc<dyn CommandRunner>, interface: impl Into<String>, timeout: Duration) -> Self {
        Self {
            runner,
            interface: interface.into(),
            timeout,
            quick_timeout: timeout,
        }
    }

    /// Use `timeout` for `wg-quick up` and `wg-quick down`
    pub fn with_interface_timeout(mut self, timeout: Duration) -> Self {
        self.quick_timeout = timeout;
        self
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    fn wg<const N: usize>(&self, args: [&str; N]) -> CommandSpec {
        CommandSpec::new("wg", args).with_timeout(self.timeout)
    }

    fn wg_quick(&self, action: &str, timeout: Duration) -> CommandSpec {
        CommandSpec::new("wg-quick", [action, self.interface.as_str()]).with_timeout(timeout)
    }

    /// `wg genkey`
    pub async fn genkey(&self) -> Result<String> {
        let out = self.runner.run_checked(self.wg(["genkey"])).await?;
        Ok(out.trim().to_string())
    }

    /// `wg pubkey` with the private key on stdin
    pub async fn pubkey(&self, private_key: &str) -> Result<String> {
        let spec = self.wg(["pubkey"]).with_stdin(format!("{}\n", private_key));
        let out = self.runner.run_checked(spec).await?;
        Ok(out.trim().to_string())
    }

    /// `wg genpsk`
    pub async fn genpsk(&self) -> Result<String> {
        let out = self.runner.run_checked(self.wg(["genpsk"])).await?;
        Ok(out.trim().to_string())
    }

    /// Raw `wg show <iface>` output
    pub async fn show(&self) -> Result<String> {
        self.runner
            .run_checked(self.wg(["show", self.interface.as_str()]))
            .await
    }

    /// Add or update a peer on the live interface
    ///
    /// The preshared key is passed on stdin so it never shows up in the
    /// process table.
    pub async fn set_peer(&self, public_key: &str, preshared_key: &str, ip: Ipv4Addr) -> Result<()> {
        let allowed = format!("{}/32", ip);
        trace!(interface = %self.interface, peer = %public_key, allowed_ips = %allowed, "wg set peer");
        let spec = self
            .wg([
                "set",
                self.interface.as_str(),
                "peer",
                public_key,
                "preshared-key",
                "/dev/stdin",
                "allowed-ips",
                allowed.as_str(),
            ])
            .with_stdin(format!("{}\n", preshared_key));
        self.runner.run_checked(spec).await?;
        Ok(())
    }

    /// Remove a peer from the live interface
    pub async fn remove_peer(&self, public_key: &str) -> Result<()> {
        let spec = self.wg(["set", self.interface.as_str(), "peer", public_key, "remove"]);
        self.runner.run_checked(spec).await?;
        Ok(())
    }

    /// `wg-quick save <iface>`
    pub async fn save(&self) -> Result<()> {
        self.runner.run_checked(self.wg_quick("save", self.timeout)).await?;
        Ok(())
    }

    /// `wg-quick up <iface>`
    pub async fn up(&self) -> Result<()> {
        self.runner.run_checked(self.wg_quick("up", self.quick_timeout)).await?;
        Ok(())
    }

    /// `wg-quick down <iface>`
    pub async fn down(&self) -> Result<()> {
        self.runner.run_checked(self.wg_quick("down", self.quick_timeout)).await?;
        Ok(())
    }
}
