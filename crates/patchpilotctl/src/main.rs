//! patchpilotctl - Operator CLI for the patchpilot agent
//!
//! Runs installs, listings and reboot bookkeeping on demand against the same
//! state the daemon uses.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Install {
            all,
            drivers,
            virus_def,
            kbs,
            deadline_only,
        } => {
            let trigger = commands::install_trigger(all, drivers, virus_def, kbs.as_deref());
            commands::install(trigger, deadline_only).await?
        }
        Commands::List { hidden, ids } => commands::list(hidden, ids).await?,
        Commands::Hide { unhide, kbs } => commands::hide_updates(&kbs, unhide).await?,
        Commands::History => commands::history().await?,
        Commands::Reboot { clear, time, .. } => commands::reboot(clear, time).await?,
        Commands::Service { install, .. } => commands::service(install)?,
        Commands::Wsus {
            wsus_servers,
            force,
        } => commands::wsus(wsus_servers.as_deref(), force).await?,
    };

    if exit_code != commands::EXIT_SUCCESS {
        std::process::exit(exit_code);
    }
    Ok(())
}
