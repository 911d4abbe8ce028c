//! patchpilot daemon - Keeps the host patched on a schedule
//!
//! Installs updates on timers, enforces fleet directives dropped into the
//! enforcement directory and reboots the host when installs require it.

use anyhow::Result;
use patchpilot_common::Policy;
use patchpilotd::{AgentContext, Scheduler};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("patchpilotd v{} starting", env!("CARGO_PKG_VERSION"));

    let policy = Policy::load();
    let (ctx, reboot_rx) = AgentContext::system(policy);
    let scheduler = Scheduler::new(ctx, reboot_rx);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatch = tokio::spawn(scheduler.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down gracefully");
    let _ = shutdown_tx.send(true);
    dispatch.await?;

    Ok(())
}
