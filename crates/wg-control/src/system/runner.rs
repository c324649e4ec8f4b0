//! External command execution
//!
//! Every collaborator (wg, wg-quick, systemctl, ip, ufw, iptables) is driven
//! through [`CommandRunner`], so the whole control plane can be exercised
//! against a scripted runner in tests.

use crate::{Error, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::trace;

/// Default soft limit for a single command
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// A single command invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program name or path
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Data written to stdin, if any
    pub stdin: Option<String>,
    /// Wall-clock limit; exceeding it is a failure
    pub timeout: Duration,
}

impl CommandSpec {
    /// Create a command with the default timeout and no stdin
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Feed `input` to the process on stdin
    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Override the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Program and arguments joined for log and error messages
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (None when killed by a signal)
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Executes external commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion.
    ///
    /// Returns `Err(Error::Command)` only when the process could not be
    /// spawned or exceeded its timeout. A non-zero exit is reported through
    /// [`CommandOutput::success`].
    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput>;

    /// Run a command and return its stdout, failing on non-zero exit
    async fn run_checked(&self, spec: CommandSpec) -> Result<String> {
        let command_line = spec.command_line();
        let output = self.run(spec).await?;
        if !output.success() {
            return Err(Error::Command(format!(
                "{} exited with {:?}: {}",
                command_line,
                output.code,
                output.stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

/// Runs commands on the local host via `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput> {
        trace!(cmd = %spec.program, args = ?spec.args, "Executing command");

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if spec.stdin.is_some() {
            command.stdin(Stdio::piped());
        } else {
            command.stdin(Stdio::null());
        }

        let mut child = command
            .spawn()
            .map_err(|e| Error::Command(format!("Failed to execute {}: {}", spec.program, e)))?;

        if let Some(input) = &spec.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input.as_bytes()).await.map_err(|e| {
                    Error::Command(format!("Failed to write stdin of {}: {}", spec.program, e))
                })?;
                // Dropping closes the pipe so the child sees EOF
                drop(stdin);
            }
        }

        let output = tokio::time::timeout(spec.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                Error::Command(format!(
                    "{} timed out after {}s",
                    spec.command_line(),
                    spec.timeout.as_secs()
                ))
            })?
            .map_err(|e| Error::Command(format!("Failed to wait for {}: {}", spec.program, e)))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line() {
        let spec = CommandSpec::new("wg", ["show", "wg_main"]);
        assert_eq!(spec.command_line(), "wg show wg_main");
        assert_eq!(CommandSpec::new("lsmod", Vec::<String>::new()).command_line(), "lsmod");
    }

    #[test]
    fn test_builder() {
        let spec = CommandSpec::new("wg", ["pubkey"])
            .with_stdin("key")
            .with_timeout(Duration::from_secs(3));
        assert_eq!(spec.stdin.as_deref(), Some("key"));
        assert_eq!(spec.timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_output_success() {
        assert!(CommandOutput::ok("x").success());
        assert!(!CommandOutput::failed(1, "boom").success());
        assert!(!CommandOutput::default().success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_echo_stdin() {
        let runner = SystemRunner::new();
        let out = runner
            .run(CommandSpec::new("cat", Vec::<String>::new()).with_stdin("hello"))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_missing_program() {
        let runner = SystemRunner::new();
        let err = runner
            .run(CommandSpec::new("definitely-not-a-real-binary-xyz", Vec::<String>::new()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "COMMAND_FAILED");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_checked_nonzero() {
        let runner = SystemRunner::new();
        let err = runner
            .run_checked(CommandSpec::new("false", Vec::<String>::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Command(_)));
    }
}
