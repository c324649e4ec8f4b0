//! Command-line structure for `wg-control`

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Peer and subnet control plane for a single-host WireGuard server
///
/// Every command prints a JSON document on stdout. Failures print
/// `{"error": CODE, "message": ...}` and exit with status 1.
#[derive(Parser)]
#[command(name = "wg-control")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase log verbosity on stderr (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Settings file (TOML)
    #[arg(short, long, global = true, default_value = "/etc/wg-control/wg-control.toml")]
    pub config: PathBuf,

    /// Print JSON on a single line
    #[arg(long, global = true)]
    pub compact: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a peer and bring it onto the interface
    Add {
        name: String,
    },

    /// Delete a peer
    Remove {
        name: String,
    },

    /// Show one peer, keys included
    Get {
        name: String,
    },

    /// List peers ordered by creation time
    List {
        #[arg(long, default_value_t = 1)]
        page: usize,

        /// Page size; the configured default when omitted
        #[arg(long)]
        per_page: Option<usize>,

        /// Case-insensitive substring of the peer name
        #[arg(long)]
        search: Option<String>,
    },

    /// Render a peer's client configuration
    Export {
        name: String,

        /// Print the configuration text instead of JSON
        #[arg(long)]
        raw: bool,
    },

    /// Most recently created peers
    Recent {
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Service, interface and peer overview
    Status,

    /// Push every stored peer to the running interface
    Reconcile,

    /// Recent journal entries of the WireGuard unit
    Logs {
        /// Number of lines; 50 when omitted
        #[arg(short = 'n', long)]
        lines: Option<usize>,
    },

    /// Restart the WireGuard unit
    Restart,

    /// UFW, NAT and forwarding state for the VPN
    FirewallStatus,

    /// Subnet analysis and migration
    #[command(subcommand)]
    Subnet(SubnetCommands),

    /// Runtime behavior flags
    #[command(subcommand)]
    Tweak(TweakCommands),
}

#[derive(Subcommand)]
pub enum SubnetCommands {
    /// Report current addressing and anything blocking a change
    Analyze,

    /// Check a proposed subnet without changing anything
    Validate {
        cidr: String,

        /// Ignore Ghost Mode and Multihop
        #[arg(long)]
        skip_blockers: bool,
    },

    /// Move every peer and the server to a new subnet
    Change {
        cidr: String,

        /// Confirm the change; all peers are disconnected
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
pub enum TweakCommands {
    /// Every tweak with its current value
    List,

    /// One tweak
    Get {
        name: String,
    },

    /// Persist a new value
    Set {
        name: String,

        #[arg(action = clap::ArgAction::Set)]
        value: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_subnet_change() {
        let cli = Cli::parse_from(["wg-control", "subnet", "change", "192.168.100.0/24", "--force"]);
        match cli.command {
            Commands::Subnet(SubnetCommands::Change { cidr, force }) => {
                assert_eq!(cidr, "192.168.100.0/24");
                assert!(force);
            }
            _ => panic!("expected subnet change"),
        }
    }

    #[test]
    fn test_parse_tweak_set() {
        let cli = Cli::parse_from([
            "wg-control",
            "--compact",
            "tweak",
            "set",
            "restart_service_after_peer_change",
            "true",
        ]);
        assert!(cli.compact);
        match cli.command {
            Commands::Tweak(TweakCommands::Set { name, value }) => {
                assert_eq!(name, "restart_service_after_peer_change");
                assert!(value);
            }
            _ => panic!("expected tweak set"),
        }
    }

    #[test]
    fn test_parse_service_commands() {
        let cli = Cli::parse_from(["wg-control", "logs", "-n", "200"]);
        match cli.command {
            Commands::Logs { lines } => assert_eq!(lines, Some(200)),
            _ => panic!("expected logs"),
        }
        let cli = Cli::parse_from(["wg-control", "firewall-status"]);
        assert!(matches!(cli.command, Commands::FirewallStatus));
        let cli = Cli::parse_from(["wg-control", "restart"]);
        assert!(matches!(cli.command, Commands::Restart));
    }

    #[test]
    fn test_list_defaults() {
        let cli = Cli::parse_from(["wg-control", "list"]);
        match cli.command {
            Commands::List { page, per_page, search } => {
                assert_eq!(page, 1);
                assert!(per_page.is_none());
                assert!(search.is_none());
            }
            _ => panic!("expected list"),
        }
    }
}
