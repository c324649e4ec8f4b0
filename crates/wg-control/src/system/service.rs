//! systemd unit control

use super::runner::{CommandRunner, CommandSpec};
use crate::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Properties read from `systemctl show`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceDetails {
    /// `ActiveEnterTimestamp` as systemd prints it
    pub started_at: Option<String>,
    /// `MainPID`; oneshot units such as `wg-quick@` report none
    pub pid: Option<u32>,
}

/// Parse `Key=Value` lines from `systemctl show --property=...`
pub fn parse_show_properties(output: &str) -> ServiceDetails {
    let mut details = ServiceDetails::default();
    for line in output.lines() {
        match line.trim().split_once('=') {
            Some(("ActiveEnterTimestamp", value)) if !value.trim().is_empty() => {
                details.started_at = Some(value.trim().to_string());
            }
            Some(("MainPID", value)) => {
                details.pid = value.trim().parse().ok().filter(|pid| *pid != 0);
            }
            _ => {}
        }
    }
    details
}

/// Starts, stops and queries the `wg-quick@<iface>` unit
#[derive(Clone)]
pub struct ServiceManager {
    runner: Arc<dyn CommandRunner>,
    unit: String,
    timeout: Duration,
}

impl ServiceManager {
    pub fn new(runner: Arc<dyn CommandRunner>, unit: impl Into<String>, timeout: Duration) -> Self {
        Self {
            runner,
            unit: unit.into(),
            timeout,
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    fn systemctl(&self, action: &str) -> CommandSpec {
        CommandSpec::new("systemctl", [action, self.unit.as_str()]).with_timeout(self.timeout)
    }

    pub async fn start(&self) -> Result<()> {
        debug!(unit = %self.unit, "Starting service");
        self.runner.run_checked(self.systemctl("start")).await?;
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        debug!(unit = %self.unit, "Stopping service");
        self.runner.run_checked(self.systemctl("stop")).await?;
        Ok(())
    }

    pub async fn restart(&self) -> Result<()> {
        debug!(unit = %self.unit, "Restarting service");
        self.runner.run_checked(self.systemctl("restart")).await?;
        Ok(())
    }

    /// `systemctl is-active`; any failure to ask counts as inactive
    pub async fn is_active(&self) -> bool {
        match self.runner.run(self.systemctl("is-active")).await {
            Ok(output) => output.success(),
            Err(_) => false,
        }
    }

    /// Start time and main PID; empty when systemd cannot be asked
    pub async fn details(&self) -> ServiceDetails {
        let spec = CommandSpec::new(
            "systemctl",
            [
                "show",
                self.unit.as_str(),
                "--property=ActiveEnterTimestamp,MainPID",
            ],
        )
        .with_timeout(self.timeout);
        match self.runner.run_checked(spec).await {
            Ok(output) => parse_show_properties(&output),
            Err(e) => {
                debug!(unit = %self.unit, error = %e, "systemctl show failed");
                ServiceDetails::default()
            }
        }
    }

    /// Last `lines` journal entries of the unit
    pub async fn logs(&self, lines: usize) -> Result<Vec<String>> {
        let count = lines.to_string();
        let spec = CommandSpec::new(
            "journalctl",
            ["-u", self.unit.as_str(), "-n", count.as_str(), "--no-pager"],
        )
        .with_timeout(self.timeout);
        let output = self.runner.run_checked(spec).await?;
        Ok(output
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_show_properties() {
        let details = parse_show_properties(
            "ActiveEnterTimestamp=Mon 2026-10-19 09:12:44 UTC\nMainPID=812\n",
        );
        assert_eq!(details.started_at.as_deref(), Some("Mon 2026-10-19 09:12:44 UTC"));
        assert_eq!(details.pid, Some(812));
    }

    #[test]
    fn test_parse_show_properties_inactive_oneshot() {
        let details = parse_show_properties("ActiveEnterTimestamp=\nMainPID=0\n");
        assert_eq!(details, ServiceDetails::default());
    }
}
