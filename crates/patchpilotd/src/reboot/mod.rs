//! Reboot lifecycle
//!
//! NoRebootPending -> PendingUnscheduled -> Scheduled -> Executing -> NoRebootPending
//!
//! Pending detection is always live (asked of the power collaborator). The
//! scheduled time is durable. At most one reboot sequence runs at a time; a
//! request arriving while one is active is dropped.

pub mod schedule;
pub mod store;

pub use schedule::compute_reboot_time;
pub use store::{FileRebootStore, MemoryRebootStore, RebootRecord, RebootStore};

use chrono::{DateTime, Utc};
use patchpilot_common::Policy;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::notifier::Notifier;
use crate::power::{PowerControl, PowerError};
use crate::window::{MaintenanceWindows, ACTIVE_HOURS_LABEL};

/// Capacity of the reboot request queue.
pub const REBOOT_QUEUE_CAPACITY: usize = 10;

#[derive(Error, Debug)]
pub enum RebootError {
    #[error("reboot record {path}: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("reboot record is not valid JSON: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Power(#[from] PowerError),
}

/// Ask the dispatch loop to start the reboot sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebootRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootState {
    NoRebootPending,
    PendingUnscheduled,
    Scheduled(DateTime<Utc>),
    Executing(DateTime<Utc>),
}

impl fmt::Display for RebootState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebootState::NoRebootPending => f.write_str("no reboot pending"),
            RebootState::PendingUnscheduled => f.write_str("reboot pending, not scheduled"),
            RebootState::Scheduled(at) => write!(f, "reboot scheduled for {}", at.to_rfc3339()),
            RebootState::Executing(at) => write!(f, "reboot in progress (scheduled {})", at.to_rfc3339()),
        }
    }
}

/// Timing knobs taken from the policy.
#[derive(Debug, Clone)]
pub struct RebootSettings {
    pub base_delay: chrono::Duration,
    pub grace: Duration,
    pub active_hours_enabled: bool,
}

impl RebootSettings {
    pub fn from_policy(policy: &Policy) -> Self {
        Self {
            base_delay: policy.reboot_delay(),
            grace: Duration::from_secs(policy.reboot.grace_secs),
            active_hours_enabled: policy.active_hours_enabled,
        }
    }
}

/// Resets the in-flight slot when the sequence ends, however it ends.
struct ExecutionGuard {
    slot: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }
}

pub struct RebootLifecycle {
    power: Arc<dyn PowerControl>,
    store: Arc<dyn RebootStore>,
    notifier: Arc<dyn Notifier>,
    windows: Arc<dyn MaintenanceWindows>,
    settings: RebootSettings,
    requests: mpsc::Sender<RebootRequest>,
    executing: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl RebootLifecycle {
    pub fn new(
        power: Arc<dyn PowerControl>,
        store: Arc<dyn RebootStore>,
        notifier: Arc<dyn Notifier>,
        windows: Arc<dyn MaintenanceWindows>,
        settings: RebootSettings,
        requests: mpsc::Sender<RebootRequest>,
    ) -> Self {
        Self {
            power,
            store,
            notifier,
            windows,
            settings,
            requests,
            executing: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn reboot_pending(&self) -> bool {
        self.power.reboot_pending().await
    }

    /// Stored reboot time. Clears the record when no reboot is pending anymore.
    pub async fn scheduled_time(&self) -> Result<Option<DateTime<Utc>>, RebootError> {
        let record = self.store.load().await?;
        let Some(at) = record.reboot_time else {
            return Ok(None);
        };
        if !self.power.reboot_pending().await {
            debug!("Stored reboot time {} is stale, clearing", at);
            self.store.clear().await?;
            return Ok(None);
        }
        Ok(Some(at))
    }

    pub async fn status(&self) -> Result<RebootState, RebootError> {
        if let Some(at) = self.executing_since() {
            return Ok(RebootState::Executing(at));
        }
        match self.scheduled_time().await? {
            Some(at) => Ok(RebootState::Scheduled(at)),
            None if self.power.reboot_pending().await => Ok(RebootState::PendingUnscheduled),
            None => Ok(RebootState::NoRebootPending),
        }
    }

    pub fn is_executing(&self) -> bool {
        self.executing_since().is_some()
    }

    fn executing_since(&self) -> Option<DateTime<Utc>> {
        self.executing.lock().ok().and_then(|slot| *slot)
    }

    /// Queue a reboot request for the dispatch loop.
    pub fn request(&self) {
        match self.requests.try_send(RebootRequest) {
            Ok(()) => debug!("Reboot request queued"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Reboot request queue full, request dropped")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Reboot request queue closed, request dropped")
            }
        }
    }

    /// Mark the reboot pending, persist `at`, tell the user and queue a request.
    pub async fn schedule(&self, at: DateTime<Utc>) -> Result<(), RebootError> {
        // A stored time without a pending reboot is treated as stale.
        self.power.mark_pending().await?;
        self.store.set_reboot_time(at).await?;
        info!("Reboot scheduled for {}", at.to_rfc3339());
        self.notifier.reboot_scheduled(at).await;
        self.request();
        Ok(())
    }

    /// Reboot time for an install finishing now.
    pub async fn compute_reboot_time(&self) -> DateTime<Utc> {
        let close = if self.settings.active_hours_enabled {
            self.active_hours_close().await
        } else {
            None
        };
        compute_reboot_time(Utc::now(), self.settings.base_delay, close)
    }

    async fn active_hours_close(&self) -> Option<DateTime<Utc>> {
        match self.windows.label(ACTIVE_HOURS_LABEL).await {
            Ok(schedules) => schedules.first().map(|s| s.closes),
            Err(e) => {
                error!("Could not read the {} window: {}", ACTIVE_HOURS_LABEL, e);
                None
            }
        }
    }

    /// Record the updates that need a reboot and schedule one.
    pub async fn record_and_schedule(&self, kb_ids: &[String]) -> Result<DateTime<Utc>, RebootError> {
        if let Err(e) = self.store.add_reboot_updates(kb_ids).await {
            error!("Failed to record updates requiring reboot: {}", e);
        }
        let at = self.compute_reboot_time().await;
        self.schedule(at).await?;
        Ok(at)
    }

    /// Forget any scheduled reboot.
    pub async fn clear(&self) -> Result<(), RebootError> {
        self.store.clear().await
    }

    /// React to a reboot request: start the sequence if a time is scheduled
    /// and none is already running.
    pub async fn handle_request(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.is_executing() {
            debug!("Reboot sequence already active, request dropped");
            return None;
        }

        let at = match self.scheduled_time().await {
            Ok(Some(at)) => at,
            Ok(None) => {
                info!("No reboot time defined, nothing to do");
                return None;
            }
            Err(e) => {
                error!("Error getting reboot time: {}", e);
                return None;
            }
        };

        let guard = self.try_begin(at)?;
        info!("Reboot sequence started for {}", at.to_rfc3339());
        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = this.execute(at).await {
                error!("Reboot failed: {}", e);
            }
        }))
    }

    fn try_begin(&self, at: DateTime<Utc>) -> Option<ExecutionGuard> {
        let mut slot = self.executing.lock().ok()?;
        if slot.is_some() {
            debug!("Reboot sequence already active, request dropped");
            return None;
        }
        *slot = Some(at);
        Some(ExecutionGuard {
            slot: Arc::clone(&self.executing),
        })
    }

    async fn execute(&self, at: DateTime<Utc>) -> Result<(), RebootError> {
        let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;

        let minutes = self.settings.grace.as_secs() / 60;
        warn!("Rebooting in {} minutes", minutes);
        self.notifier.reboot_imminent(minutes).await;
        tokio::time::sleep(self.settings.grace).await;

        self.store.clear().await?;
        self.power.reboot().await?;
        Ok(())
    }
}
