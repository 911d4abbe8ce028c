//! Agent policy.
//!
//! Loaded once at start-up from /etc/patchpilot/config.toml, falling back to
//! /var/lib/patchpilot/config.toml and finally to defaults. A missing or
//! broken file is never fatal.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::candidate::category;

/// Config file path
pub const CONFIG_PATH: &str = "/etc/patchpilot/config.toml";

/// Fallback config file path
pub const DEFAULT_CONFIG_PATH: &str = "/var/lib/patchpilot/config.toml";

/// Service name used for notifications, units and window labels
pub const SERVICE_NAME: &str = "patchpilot";

pub fn default_required_categories() -> Vec<String> {
    vec![
        category::CRITICAL.to_string(),
        category::DEFINITION.to_string(),
        category::SECURITY.to_string(),
    ]
}

fn default_true() -> bool {
    true
}

fn default_reboot_delay() -> u64 {
    21_600 // 6 hours
}

fn default_deadline() -> u64 {
    14
}

fn default_script_timeout() -> u64 {
    600
}

/// Maintenance-window integration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceWindowConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Port of the local window service
    #[serde(default = "default_window_port")]
    pub port: u16,

    /// Label of the window that gates installs
    #[serde(default = "default_window_name")]
    pub name: String,
}

fn default_window_port() -> u16 {
    9119
}

fn default_window_name() -> String {
    SERVICE_NAME.to_string()
}

impl Default for MaintenanceWindowConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_window_port(),
            name: default_window_name(),
        }
    }
}

/// On-disk locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Persistent agent state (reboot record, source state, payload cache)
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Directory watched for enforcement directives
    #[serde(default = "default_enforcement_dir")]
    pub enforcement_dir: PathBuf,

    /// Directory holding pre-update / post-update hooks
    #[serde(default = "default_hooks_dir")]
    pub hooks_dir: PathBuf,

    /// Catalog of offered updates
    #[serde(default = "default_catalog")]
    pub catalog: PathBuf,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/patchpilot")
}

fn default_enforcement_dir() -> PathBuf {
    PathBuf::from("/var/lib/patchpilot/enforcement")
}

fn default_hooks_dir() -> PathBuf {
    PathBuf::from("/etc/patchpilot/hooks")
}

fn default_catalog() -> PathBuf {
    PathBuf::from("/var/lib/patchpilot/catalog.json")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            enforcement_dir: default_enforcement_dir(),
            hooks_dir: default_hooks_dir(),
            catalog: default_catalog(),
        }
    }
}

/// Timer periods in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalsConfig {
    #[serde(default = "default_install_interval")]
    pub default_install: u64,

    #[serde(default = "default_window_interval")]
    pub maintenance_window: u64,

    #[serde(default = "default_list_interval")]
    pub list: u64,

    #[serde(default = "default_virus_interval")]
    pub virus_definitions: u64,

    #[serde(default = "default_driver_interval")]
    pub drivers: u64,

    #[serde(default = "default_enforcement_interval")]
    pub enforcement: u64,
}

fn default_install_interval() -> u64 {
    24 * 60 * 60
}

fn default_window_interval() -> u64 {
    5 * 60
}

fn default_list_interval() -> u64 {
    2 * 60 * 60
}

fn default_virus_interval() -> u64 {
    30 * 60
}

fn default_driver_interval() -> u64 {
    72 * 60 * 60
}

fn default_enforcement_interval() -> u64 {
    6 * 60 * 60
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            default_install: default_install_interval(),
            maintenance_window: default_window_interval(),
            list: default_list_interval(),
            virus_definitions: default_virus_interval(),
            drivers: default_driver_interval(),
            enforcement: default_enforcement_interval(),
        }
    }
}

/// Reboot executor and watcher timings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebootConfig {
    /// Time between the final warning and the reboot
    #[serde(default = "default_grace")]
    pub grace_secs: u64,

    /// Back-off before restarting a failed enforcement watcher
    #[serde(default = "default_watcher_retry")]
    pub watcher_retry_secs: u64,
}

fn default_grace() -> u64 {
    20 * 60
}

fn default_watcher_retry() -> u64 {
    15 * 60
}

impl Default for RebootConfig {
    fn default() -> Self {
        Self {
            grace_secs: default_grace(),
            watcher_retry_secs: default_watcher_retry(),
        }
    }
}

/// Complete agent policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Internal update servers used instead of the public service
    #[serde(default)]
    pub update_servers: Vec<String>,

    #[serde(default = "default_required_categories")]
    pub required_categories: Vec<String>,

    #[serde(default)]
    pub update_drivers: bool,

    #[serde(default = "default_true")]
    pub update_virus_definitions: bool,

    #[serde(default)]
    pub enable_third_party: bool,

    /// Delay between install and forced reboot, in seconds
    #[serde(default = "default_reboot_delay")]
    pub reboot_delay_secs: u64,

    /// Age in days after which updates are force-installed; 0 disables deadline runs
    #[serde(default = "default_deadline")]
    pub deadline_days: u64,

    #[serde(default = "default_true")]
    pub notify_available: bool,

    /// Routine (default / maintenance-window) installs
    #[serde(default = "default_true")]
    pub install_monthly_patches: bool,

    /// Reboot at the end of active hours instead of after the base delay
    #[serde(default)]
    pub active_hours_enabled: bool,

    #[serde(default = "default_script_timeout")]
    pub script_timeout_secs: u64,

    #[serde(default)]
    pub maintenance_window: MaintenanceWindowConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub intervals: IntervalsConfig,

    #[serde(default)]
    pub reboot: RebootConfig,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            update_servers: Vec::new(),
            required_categories: default_required_categories(),
            update_drivers: false,
            update_virus_definitions: true,
            enable_third_party: false,
            reboot_delay_secs: default_reboot_delay(),
            deadline_days: default_deadline(),
            notify_available: true,
            install_monthly_patches: true,
            active_hours_enabled: false,
            script_timeout_secs: default_script_timeout(),
            maintenance_window: MaintenanceWindowConfig::default(),
            paths: PathsConfig::default(),
            intervals: IntervalsConfig::default(),
            reboot: RebootConfig::default(),
        }
    }
}

impl Policy {
    /// Load policy from the standard locations, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from_path(Path::new(CONFIG_PATH))
            .or_else(|_| Self::load_from_path(Path::new(DEFAULT_CONFIG_PATH)))
            .unwrap_or_else(|e| {
                warn!("Config not found or invalid, using defaults: {:#}", e);
                Self::default()
            })
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let policy: Policy = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!("Loaded policy from {}", path.display());
        Ok(policy)
    }

    /// Write the policy back to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Delay between an install needing a reboot and the reboot itself.
    pub fn reboot_delay(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reboot_delay_secs as i64)
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout_secs)
    }

    pub fn deadline(&self) -> chrono::Duration {
        chrono::Duration::days(self.deadline_days as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let policy = Policy::default();
        assert_eq!(policy.reboot_delay_secs, 21_600);
        assert_eq!(policy.deadline_days, 14);
        assert_eq!(policy.script_timeout_secs, 600);
        assert!(policy.update_virus_definitions);
        assert!(policy.notify_available);
        assert!(!policy.update_drivers);
        assert!(!policy.maintenance_window.enabled);
        assert_eq!(policy.maintenance_window.port, 9119);
        assert_eq!(
            policy.required_categories,
            vec!["Critical Updates", "Definition Updates", "Security Updates"]
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let policy: Policy = toml::from_str(
            r#"
            update_drivers = true
            deadline_days = 7

            [maintenance_window]
            enabled = true
            "#,
        )
        .unwrap();

        assert!(policy.update_drivers);
        assert_eq!(policy.deadline_days, 7);
        assert!(policy.maintenance_window.enabled);
        assert_eq!(policy.maintenance_window.name, "patchpilot");
        assert_eq!(policy.reboot_delay_secs, 21_600);
        assert_eq!(policy.intervals.virus_definitions, 1800);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "deadline_days = \"soon\"").unwrap();
        assert!(Policy::load_from_path(&path).is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let policy = Policy {
            update_servers: vec!["https://updates.corp.example".to_string()],
            ..Default::default()
        };
        policy.save(&path).unwrap();
        assert_eq!(Policy::load_from_path(&path).unwrap(), policy);
    }
}
