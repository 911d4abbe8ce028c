//! Host power control.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;
use tokio::process::Command;
use tracing::info;

/// Marker file package managers drop when a reboot is needed.
pub const REBOOT_REQUIRED_PATH: &str = "/var/run/reboot-required";

const REBOOT_REQUIRED_TEXT: &str = "*** System restart required ***\n";

#[derive(Error, Debug)]
pub enum PowerError {
    #[error("reboot command failed: {0}")]
    CommandFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait PowerControl: Send + Sync {
    /// Whether the host is waiting for a reboot.
    async fn reboot_pending(&self) -> bool;

    /// Record that the host needs a reboot. Idempotent.
    async fn mark_pending(&self) -> Result<(), PowerError>;

    async fn reboot(&self) -> Result<(), PowerError>;
}

/// systemd-managed host.
pub struct SystemPower {
    marker: PathBuf,
}

impl SystemPower {
    pub fn new() -> Self {
        Self {
            marker: PathBuf::from(REBOOT_REQUIRED_PATH),
        }
    }

    pub fn with_marker(marker: impl Into<PathBuf>) -> Self {
        Self {
            marker: marker.into(),
        }
    }
}

impl Default for SystemPower {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PowerControl for SystemPower {
    async fn reboot_pending(&self) -> bool {
        tokio::fs::try_exists(&self.marker).await.unwrap_or(false)
    }

    async fn mark_pending(&self) -> Result<(), PowerError> {
        if self.reboot_pending().await {
            return Ok(());
        }
        if let Some(parent) = self.marker.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.marker, REBOOT_REQUIRED_TEXT).await?;
        info!("Marked reboot required at {}", self.marker.display());
        Ok(())
    }

    async fn reboot(&self) -> Result<(), PowerError> {
        info!("Rebooting host");
        let output = Command::new("systemctl").arg("reboot").output().await?;
        if !output.status.success() {
            return Err(PowerError::CommandFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Fake Power (tests)
// ============================================================================

#[derive(Default)]
pub struct FakePower {
    pending: AtomicBool,
    reboots: AtomicUsize,
}

impl FakePower {
    pub fn new(pending: bool) -> Self {
        Self {
            pending: AtomicBool::new(pending),
            reboots: AtomicUsize::new(0),
        }
    }

    pub fn set_pending(&self, pending: bool) {
        self.pending.store(pending, Ordering::SeqCst);
    }

    pub fn reboots(&self) -> usize {
        self.reboots.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PowerControl for FakePower {
    async fn reboot_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    async fn mark_pending(&self) -> Result<(), PowerError> {
        self.pending.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn reboot(&self) -> Result<(), PowerError> {
        self.reboots.fetch_add(1, Ordering::SeqCst);
        self.pending.store(false, Ordering::SeqCst);
        Ok(())
    }
}
