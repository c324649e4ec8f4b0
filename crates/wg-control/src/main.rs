//! wg-control
//!
//! Usage:
//!   wg-control <subcommand> [options]
//!
//! Subcommands:
//!   add, remove, get, list, export, recent   Peer lifecycle
//!   status, reconcile                        Interface state
//!   logs, restart, firewall-status           Service monitoring
//!   subnet analyze|validate|change           Subnet migration
//!   tweak list|get|set                       Runtime flags

mod cli;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use serde_json::{json, Value};
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wg_control::{ControlPlane, Error, Settings, SystemRunner};

use cli::{Cli, Commands, SubnetCommands, TweakCommands};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let compact = cli.compact;
    let outcome = match run(cli).await {
        Ok(Output::Json(value)) => print(&value, compact),
        Ok(Output::Text(text)) => {
            print!("{}", text);
            Ok(())
        }
        Err(e) => {
            report_failure(&e, compact, &mut std::io::stdout(), &mut std::io::stderr());
            return ExitCode::FAILURE;
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

enum Output {
    Json(Value),
    Text(String),
}

fn to_output<T: Serialize>(value: T) -> Result<Output, Error> {
    Ok(Output::Json(serde_json::to_value(value)?))
}

fn print(value: &Value, compact: bool) -> anyhow::Result<()> {
    write_json(value, compact, &mut std::io::stdout())
}

fn write_json(value: &Value, compact: bool, out: &mut impl Write) -> anyhow::Result<()> {
    let rendered = if compact {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    }
    .context("Failed to render output")?;
    writeln!(out, "{}", rendered).context("Failed to write output")?;
    Ok(())
}

/// Emit the error document, or a plain line on `fallback` if stdout is gone
fn report_failure(e: &Error, compact: bool, out: &mut impl Write, fallback: &mut impl Write) {
    let body = json!({"error": e.code(), "message": e.to_string()});
    if let Err(write_err) = write_json(&body, compact, out) {
        let _ = writeln!(fallback, "{}: {}", e.code(), e);
        let _ = writeln!(fallback, "{:#}", write_err);
    }
}

async fn run(cli: Cli) -> Result<Output, Error> {
    let settings = Settings::load_or_default(&cli.config)?;
    let control = ControlPlane::open(settings, Arc::new(SystemRunner::new()))?;

    match cli.command {
        Commands::Add { name } => to_output(control.add_peer(&name).await?),
        Commands::Remove { name } => to_output(control.remove_peer(&name).await?),
        Commands::Get { name } => to_output(control.get_peer(&name).await?),
        Commands::List {
            page,
            per_page,
            search,
        } => to_output(
            control
                .list_peers(page, per_page, search.as_deref())
                .await?,
        ),
        Commands::Export { name, raw } => {
            let exported = control.export_peer(&name).await?;
            if raw {
                Ok(Output::Text(exported.config))
            } else {
                to_output(exported)
            }
        }
        Commands::Recent { count } => to_output(control.recent_peers(count).await?),
        Commands::Status => to_output(control.status().await?),
        Commands::Reconcile => to_output(control.reconcile().await?),
        Commands::Logs { lines } => to_output(control.service_logs(lines).await?),
        Commands::Restart => to_output(control.restart_service().await?),
        Commands::FirewallStatus => to_output(control.firewall_status().await?),
        Commands::Subnet(cmd) => match cmd {
            SubnetCommands::Analyze => to_output(control.analyze_subnet().await?),
            SubnetCommands::Validate {
                cidr,
                skip_blockers,
            } => to_output(control.validate_subnet(&cidr, skip_blockers).await?),
            SubnetCommands::Change { cidr, force } => {
                to_output(control.change_subnet(&cidr, force).await?)
            }
        },
        Commands::Tweak(cmd) => match cmd {
            TweakCommands::List => to_output(control.tweaks().await?),
            TweakCommands::Get { name } => to_output(control.tweak(&name).await?),
            TweakCommands::Set { name, value } => to_output(control.set_tweak(&name, value).await?),
        },
    }
}
