//! CLI - Command-line argument parsing
//!
//! Defines the CLI structure using clap.
//! Keeps argument parsing separate from execution logic.

use clap::{ArgGroup, Parser, Subcommand};

/// patchpilot control utility
#[derive(Parser, Debug)]
#[command(name = "patchpilotctl")]
#[command(about = "patchpilot - OS update orchestration agent", long_about = None)]
#[command(version)]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install updates now
    #[command(group(ArgGroup::new("selection").args(["all", "drivers", "virus_def", "kbs"])))]
    Install {
        /// All assigned updates, drivers included, in any category
        #[arg(long)]
        all: bool,

        /// Driver updates only
        #[arg(long)]
        drivers: bool,

        /// Virus definition updates only
        #[arg(long = "virus_def")]
        virus_def: bool,

        /// Comma separated KB ids to install
        #[arg(long, value_name = "IDS")]
        kbs: Option<String>,

        /// Only updates past the deployment deadline
        #[arg(long = "deadlineOnly")]
        deadline_only: bool,
    },

    /// List available updates
    List {
        /// List hidden updates instead
        #[arg(long)]
        hidden: bool,

        /// Print update ids next to titles
        #[arg(long)]
        ids: bool,
    },

    /// Hide or unhide updates by KB
    Hide {
        /// Unhide instead of hide
        #[arg(long)]
        unhide: bool,

        /// Comma separated KB ids
        #[arg(long, value_name = "IDS")]
        kbs: String,
    },

    /// Show the installed update history
    History,

    /// Inspect or change the reboot schedule
    #[command(group(ArgGroup::new("action").args(["clear", "time", "check"])))]
    Reboot {
        /// Clear the scheduled reboot
        #[arg(long)]
        clear: bool,

        /// Schedule a reboot this many seconds from now
        #[arg(long, value_name = "SECONDS")]
        time: Option<u64>,

        /// Show whether a reboot is pending and when it is scheduled
        #[arg(long)]
        check: bool,
    },

    /// Install or remove the daemon's systemd unit
    #[command(group(ArgGroup::new("action").required(true).args(["install", "uninstall"])))]
    Service {
        #[arg(long)]
        install: bool,

        #[arg(long)]
        uninstall: bool,
    },

    /// Point the agent at private update servers
    Wsus {
        /// Comma separated server addresses
        #[arg(long = "wsus_servers", value_name = "SERVERS")]
        wsus_servers: Option<String>,

        /// Write the servers even when the public update host is reachable
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_install_flags() {
        let cli = Cli::try_parse_from([
            "patchpilotctl",
            "install",
            "--kbs=4018073,KB67891011",
            "--deadlineOnly",
        ])
        .unwrap();
        match cli.command {
            Commands::Install {
                kbs, deadline_only, all, ..
            } => {
                assert_eq!(kbs.as_deref(), Some("4018073,KB67891011"));
                assert!(deadline_only);
                assert!(!all);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_install_selections_are_exclusive() {
        let result = Cli::try_parse_from(["patchpilotctl", "install", "--all", "--virus_def"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_hide_requires_kbs() {
        assert!(Cli::try_parse_from(["patchpilotctl", "hide", "--unhide"]).is_err());
    }

    #[test]
    fn test_service_requires_an_action() {
        assert!(Cli::try_parse_from(["patchpilotctl", "service"]).is_err());
        assert!(
            Cli::try_parse_from(["patchpilotctl", "service", "--install", "--uninstall"]).is_err()
        );
    }

    #[test]
    fn test_reboot_time_and_wsus_servers() {
        let cli = Cli::try_parse_from(["patchpilotctl", "reboot", "--time", "600"]).unwrap();
        assert!(matches!(cli.command, Commands::Reboot { time: Some(600), .. }));

        let cli = Cli::try_parse_from([
            "patchpilotctl",
            "wsus",
            "--wsus_servers=http://a:8530,http://b:8530",
            "--force",
        ])
        .unwrap();
        match cli.command {
            Commands::Wsus {
                wsus_servers,
                force,
            } => {
                assert_eq!(wsus_servers.as_deref(), Some("http://a:8530,http://b:8530"));
                assert!(force);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
