//! Command implementations
//!
//! Each command builds the same agent context the daemon uses and talks to
//! the collaborators directly. Commands return the process exit code.

use anyhow::{bail, Context, Result};
use chrono::{Duration as ChronoDuration, Local, Utc};
use owo_colors::OwoColorize;
use patchpilot_common::policy::CONFIG_PATH;
use patchpilot_common::{KbSet, Policy, Trigger};
use patchpilotd::install::list::ListedUpdate;
use patchpilotd::install::{hide, list_updates, unhide};
use patchpilotd::source::UpdateSource;
use patchpilotd::{AgentContext, InstallRequest, RebootState, RunOutcome};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, warn};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_USAGE: i32 = 2;
/// Updates were installed and the host must reboot
pub const EXIT_REBOOT_REQUIRED: i32 = 6;

const UNIT_PATH: &str = "/etc/systemd/system/patchpilotd.service";
const UNIT_NAME: &str = "patchpilotd.service";
const DAEMON_BINARY: &str = "/usr/bin/patchpilotd";

/// Host checked to decide whether private update servers are needed
const PUBLIC_UPDATE_HOST: &str = "windowsupdate.microsoft.com:80";
const REACHABILITY_TIMEOUT: Duration = Duration::from_secs(3);

fn context() -> AgentContext {
    // The reboot queue belongs to the daemon; requests raised here are dropped.
    let (ctx, _reboot_rx) = AgentContext::system(Policy::load());
    ctx
}

/// Which run an `install` invocation asks for.
pub fn install_trigger(all: bool, drivers: bool, virus_def: bool, kbs: Option<&str>) -> Trigger {
    if all {
        Trigger::All
    } else if drivers {
        Trigger::Drivers
    } else if virus_def {
        Trigger::VirusDefinitions
    } else if let Some(kbs) = kbs {
        Trigger::ManualKbSet(KbSet::parse(kbs))
    } else {
        Trigger::Default
    }
}

pub async fn install(trigger: Trigger, deadline_only: bool) -> Result<i32> {
    let ctx = context();
    let request = InstallRequest::new(trigger)
        .deadline_only(deadline_only)
        .interactive();
    let report = ctx.engine.run(request).await?;

    match report.outcome {
        RunOutcome::Disabled => {
            println!("Routine installs are disabled in the configuration.");
            return Ok(EXIT_SUCCESS);
        }
        RunOutcome::RebootPending => {
            println!("{}", "A reboot is pending. Reboot before installing more updates.".yellow());
            return Ok(EXIT_REBOOT_REQUIRED);
        }
        RunOutcome::Completed => {}
    }

    println!("Found {} updates", report.found);
    for title in &report.installed {
        println!("  {} {}", "installed".green(), title);
    }
    for (title, reason) in &report.skipped {
        println!("  {} {} ({})", "skipped".dimmed(), title, reason);
    }
    for failure in &report.failures {
        println!("  {} {}", "failed".red(), failure);
    }

    if report.reboot_required {
        match report.reboot_time {
            Some(at) => println!(
                "Reboot required, scheduled for {}",
                at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
            ),
            None => println!("Reboot required"),
        }
        return Ok(EXIT_REBOOT_REQUIRED);
    }
    Ok(EXIT_SUCCESS)
}

fn print_section(heading: &str, updates: &[ListedUpdate], with_ids: bool) {
    println!("{}", heading.bold());
    if updates.is_empty() {
        println!("  (none)");
    }
    for update in updates {
        println!("  {}", update.render(with_ids));
    }
}

pub async fn list(hidden: bool, ids: bool) -> Result<i32> {
    let ctx = context();
    let listing = list_updates(ctx.source.as_ref(), &ctx.policy, hidden).await?;

    if hidden {
        let all: Vec<ListedUpdate> = listing
            .required
            .into_iter()
            .chain(listing.optional)
            .collect();
        print_section("Hidden updates:", &all, ids);
        return Ok(EXIT_SUCCESS);
    }

    print_section("Required updates:", &listing.required, ids);
    print_section("Optional updates:", &listing.optional, ids);
    if !listing.device_patched {
        println!(
            "{}",
            "Some required updates have been waiting for more than a month.".yellow()
        );
    }
    Ok(EXIT_SUCCESS)
}

pub async fn hide_updates(kbs: &str, unhide_them: bool) -> Result<i32> {
    let set = KbSet::parse(kbs);
    if set.is_empty() {
        eprintln!("{}", "No KB ids given".red());
        return Ok(EXIT_USAGE);
    }

    let ctx = context();
    let report = if unhide_them {
        unhide(ctx.source.as_ref(), &set).await?
    } else {
        hide(ctx.source.as_ref(), &set).await?
    };

    let verb = if unhide_them { "Unhid" } else { "Hid" };
    if report.changed.is_empty() {
        println!("No updates matched {}", set);
    }
    for title in &report.changed {
        println!("{} {}", verb, title);
    }
    for title in &report.failed {
        println!("{} {}", "Failed to change".red(), title);
    }
    Ok(EXIT_SUCCESS)
}

pub async fn history() -> Result<i32> {
    let ctx = context();
    let mut entries = ctx.source.history().await?;
    entries.sort_by_key(|e| e.date);

    if entries.is_empty() {
        println!("No updates installed yet");
    }
    for entry in &entries {
        println!("{}", entry);
    }
    Ok(EXIT_SUCCESS)
}

pub async fn reboot(clear: bool, time: Option<u64>) -> Result<i32> {
    let ctx = context();

    if clear {
        ctx.reboot.clear().await?;
        println!("Reboot schedule cleared");
        return Ok(EXIT_SUCCESS);
    }

    if let Some(secs) = time {
        let secs = i64::try_from(secs).context("Reboot delay out of range")?;
        let at = Utc::now() + ChronoDuration::seconds(secs);
        ctx.reboot.schedule(at).await?;
        println!(
            "Reboot scheduled for {}",
            at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        );
        return Ok(EXIT_SUCCESS);
    }

    // --check and no flag at all both report status.
    let status = ctx.reboot.status().await?;
    let pending = if matches!(status, RebootState::NoRebootPending) {
        "no".green().to_string()
    } else {
        "yes".yellow().to_string()
    };
    println!("Reboot pending: {}", pending);
    match status {
        RebootState::Scheduled(at) | RebootState::Executing(at) => println!(
            "Reboot time: {}",
            at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        ),
        RebootState::PendingUnscheduled => println!("Reboot time: not scheduled"),
        RebootState::NoRebootPending => {}
    }
    Ok(EXIT_SUCCESS)
}

/// The systemd unit that runs the daemon from `binary`.
pub fn render_unit(binary: &Path) -> String {
    format!(
        "[Unit]\n\
         Description=patchpilot update agent\n\
         Wants=network-online.target\n\
         After=network-online.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         ExecStart={}\n\
         Restart=on-failure\n\
         RestartSec=30\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        binary.display()
    )
}

/// The daemon binary next to this executable, if there is one.
fn daemon_binary() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("patchpilotd")))
        .filter(|path| path.exists())
        .unwrap_or_else(|| PathBuf::from(DAEMON_BINARY))
}

fn systemctl(args: &[&str]) -> Result<()> {
    debug!("systemctl {}", args.join(" "));
    let status = Command::new("systemctl")
        .args(args)
        .status()
        .context("Failed to run systemctl")?;
    if !status.success() {
        bail!("systemctl {} failed with {}", args.join(" "), status);
    }
    Ok(())
}

pub fn service(install: bool) -> Result<i32> {
    if install {
        let unit = render_unit(&daemon_binary());
        fs::write(UNIT_PATH, unit).with_context(|| format!("Failed to write {}", UNIT_PATH))?;
        systemctl(&["daemon-reload"])?;
        systemctl(&["enable", "--now", UNIT_NAME])?;
        println!("{} {}", "Installed and started".green(), UNIT_NAME);
        return Ok(EXIT_SUCCESS);
    }

    if let Err(e) = systemctl(&["disable", "--now", UNIT_NAME]) {
        warn!("{}", e);
    }
    if Path::new(UNIT_PATH).exists() {
        fs::remove_file(UNIT_PATH).with_context(|| format!("Failed to remove {}", UNIT_PATH))?;
    }
    systemctl(&["daemon-reload"])?;
    println!("Removed {}", UNIT_NAME);
    Ok(EXIT_SUCCESS)
}

async fn public_host_reachable() -> bool {
    matches!(
        tokio::time::timeout(REACHABILITY_TIMEOUT, TcpStream::connect(PUBLIC_UPDATE_HOST)).await,
        Ok(Ok(_))
    )
}

/// Set the update servers unless the public host is reachable and the
/// change is not forced. Returns whether the policy changed.
pub fn apply_update_servers(policy: &mut Policy, servers: &str, reachable: bool, force: bool) -> bool {
    if reachable && !force {
        return false;
    }
    policy.update_servers = servers
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    true
}

pub async fn wsus(servers: Option<&str>, force: bool) -> Result<i32> {
    let mut policy = Policy::load();
    let Some(servers) = servers else {
        if policy.update_servers.is_empty() {
            println!("No update servers configured");
        }
        for server in &policy.update_servers {
            println!("{}", server);
        }
        return Ok(EXIT_SUCCESS);
    };

    let reachable = public_host_reachable().await;
    debug!("{} reachable: {}", PUBLIC_UPDATE_HOST, reachable);
    if !apply_update_servers(&mut policy, servers, reachable, force) {
        println!(
            "{} is reachable, leaving update servers unchanged (use --force to override)",
            PUBLIC_UPDATE_HOST
        );
        return Ok(EXIT_SUCCESS);
    }

    policy.save(Path::new(CONFIG_PATH))?;
    println!("Update servers set to {}", policy.update_servers.join(", "));
    Ok(EXIT_SUCCESS)
}
