//! Orchestration scheduler
//!
//! A single dispatch loop over six timers and two event sources (enforcement
//! file changes, reboot requests). One event is handled at a time and runs to
//! completion before the next is taken. Shutdown is honored between events.

use patchpilot_common::enforcement::load_all_with_skipped;
use patchpilot_common::{KbSet, Policy, Trigger};
use std::future::pending;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::context::AgentContext;
use crate::install::list::ListedUpdate;
use crate::install::{hide, list_updates, InstallRequest};
use crate::reboot::RebootRequest;
use crate::watcher::WatcherSupervisor;

/// Capacity of the enforcement change queue.
const ENFORCEMENT_QUEUE_CAPACITY: usize = 16;

/// Something the dispatch loop reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    DefaultInstall,
    MaintenanceWindowPoll,
    ListUpdates,
    VirusDefinitions,
    Drivers,
    EnforcementSweep,
    EnforcementChanged(PathBuf),
    RebootRequested,
}

/// Timer periods; `None` disables a timer.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerPlan {
    pub default_install: Option<Duration>,
    pub maintenance_window: Option<Duration>,
    pub list: Option<Duration>,
    pub virus_definitions: Option<Duration>,
    pub drivers: Option<Duration>,
    pub enforcement: Option<Duration>,
}

fn period(secs: u64, enabled: bool) -> Option<Duration> {
    (enabled && secs > 0).then(|| Duration::from_secs(secs))
}

impl TimerPlan {
    pub fn from_policy(policy: &Policy) -> Self {
        let intervals = &policy.intervals;
        let window = policy.maintenance_window.enabled;
        Self {
            default_install: period(intervals.default_install, !window),
            maintenance_window: period(intervals.maintenance_window, window),
            list: period(intervals.list, true),
            virus_definitions: period(intervals.virus_definitions, policy.update_virus_definitions),
            drivers: period(intervals.drivers, policy.update_drivers),
            enforcement: period(intervals.enforcement, true),
        }
    }
}

fn ticker(period: Option<Duration>) -> Option<Interval> {
    period.map(|p| {
        let mut interval = interval_at(Instant::now() + p, p);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    })
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending::<()>().await,
    }
}

pub struct Scheduler {
    ctx: AgentContext,
    reboot_rx: mpsc::Receiver<RebootRequest>,
}

impl Scheduler {
    pub fn new(ctx: AgentContext, reboot_rx: mpsc::Receiver<RebootRequest>) -> Self {
        Self { ctx, reboot_rx }
    }

    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    /// One-time work before the loop starts.
    pub async fn startup(&self) {
        if self.ctx.policy.enable_third_party {
            info!("Enabling third-party updates");
            if let Err(e) = self.ctx.source.enable_third_party().await {
                error!("Failed to enable third-party updates: {}", e);
            }
        }

        if self.ctx.reboot.reboot_pending().await {
            info!("Reboot pending at start-up");
            self.ctx.reboot.request();
        }
    }

    /// Run until `shutdown` flips to true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        self.startup().await;

        let (enforcement_tx, mut enforcement_rx) = mpsc::channel(ENFORCEMENT_QUEUE_CAPACITY);
        let watcher = WatcherSupervisor::new(
            self.ctx.policy.paths.enforcement_dir.clone(),
            Duration::from_secs(self.ctx.policy.reboot.watcher_retry_secs),
        )
        .spawn(enforcement_tx);

        let plan = TimerPlan::from_policy(&self.ctx.policy);
        info!("Timer plan: {:?}", plan);
        let mut default_install = ticker(plan.default_install);
        let mut window = ticker(plan.maintenance_window);
        let mut list = ticker(plan.list);
        let mut virus = ticker(plan.virus_definitions);
        let mut drivers = ticker(plan.drivers);
        let mut enforcement = ticker(plan.enforcement);

        loop {
            let event = tokio::select! {
                _ = tick(&mut default_install) => SchedulerEvent::DefaultInstall,
                _ = tick(&mut window) => SchedulerEvent::MaintenanceWindowPoll,
                _ = tick(&mut list) => SchedulerEvent::ListUpdates,
                _ = tick(&mut virus) => SchedulerEvent::VirusDefinitions,
                _ = tick(&mut drivers) => SchedulerEvent::Drivers,
                _ = tick(&mut enforcement) => SchedulerEvent::EnforcementSweep,
                Some(path) = enforcement_rx.recv() => {
                    // Coalesce the burst of events a single write produces.
                    while enforcement_rx.try_recv().is_ok() {}
                    SchedulerEvent::EnforcementChanged(path)
                }
                Some(_) = self.reboot_rx.recv() => SchedulerEvent::RebootRequested,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown requested, leaving dispatch loop");
                        break;
                    }
                    continue;
                }
            };

            debug!("Dispatching {:?}", event);
            self.dispatch(event).await;
        }

        watcher.abort();
    }

    /// Handle one event to completion.
    pub async fn dispatch(&self, event: SchedulerEvent) {
        match event {
            SchedulerEvent::DefaultInstall => {
                self.install(InstallRequest::new(Trigger::Default)).await;
            }
            SchedulerEvent::MaintenanceWindowPoll => self.poll_window().await,
            SchedulerEvent::ListUpdates => self.list_and_notify().await,
            SchedulerEvent::VirusDefinitions => {
                self.install(InstallRequest::new(Trigger::VirusDefinitions))
                    .await;
            }
            SchedulerEvent::Drivers => {
                self.install(InstallRequest::new(Trigger::Drivers)).await;
            }
            SchedulerEvent::EnforcementSweep => self.enforce().await,
            SchedulerEvent::EnforcementChanged(path) => {
                info!("Enforcement file {} changed", path.display());
                self.enforce().await;
            }
            SchedulerEvent::RebootRequested => {
                // The sequence runs in its own task; the loop keeps going.
                let _ = self.ctx.reboot.handle_request().await;
            }
        }
    }

    async fn install(&self, request: InstallRequest) {
        let trigger = request.trigger.clone();
        match self.ctx.engine.run(request).await {
            Ok(report) => debug!("Run {} ({}) ended: {:?}", report.run_id, trigger, report.outcome),
            Err(e) => error!("Install run ({}) failed: {}", trigger, e),
        }
    }

    async fn poll_window(&self) {
        let label = &self.ctx.policy.maintenance_window.name;
        let schedules = match self.ctx.windows.label(label).await {
            Ok(schedules) => schedules,
            Err(e) => {
                error!("Error getting maintenance window {:?}: {}", label, e);
                return;
            }
        };
        let Some(first) = schedules.first() else {
            error!("Maintenance window label {:?} not found, skipping update check", label);
            return;
        };
        debug!("Maintenance window {:?} is {}", label, first.state);
        if first.is_open() {
            self.install(InstallRequest::new(Trigger::MaintenanceWindowOpen))
                .await;
        }
    }

    async fn list_and_notify(&self) {
        let listing =
            match list_updates(self.ctx.source.as_ref(), &self.ctx.policy, false).await {
                Ok(listing) => listing,
                Err(e) => {
                    error!("Error getting the list of updates: {}", e);
                    return;
                }
            };

        if !listing.device_patched {
            warn!("Required updates older than the patch age limit are waiting");
        }
        if listing.required.is_empty() {
            info!("No required updates needed to install");
            return;
        }

        let titles = |list: &[ListedUpdate]| {
            list.iter()
                .map(|u| u.title.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        };
        info!(
            "Found {} required updates.\nRequired updates:\n{}\nOptional updates:\n{}",
            listing.required.len(),
            titles(&listing.required),
            titles(&listing.optional)
        );

        if self.ctx.policy.notify_available {
            self.ctx
                .notifier
                .updates_available(listing.required.len())
                .await;
        }

        if self.ctx.policy.deadline_days != 0 {
            self.install(InstallRequest::new(Trigger::Deadline)).await;
        }
    }

    /// Apply the enforcement directives: hide, then install what is required.
    async fn enforce(&self) {
        let dir = &self.ctx.policy.paths.enforcement_dir;
        let (set, skipped) = match load_all_with_skipped(dir) {
            Ok(loaded) => loaded,
            Err(e) => {
                error!("Error gathering required updates from {}: {}", dir.display(), e);
                return;
            }
        };
        if !skipped.is_empty() {
            warn!("{} enforcement files skipped", skipped.len());
        }

        if !set.hidden.is_empty() {
            let kbs = KbSet::from_ids(&set.hidden);
            match hide(self.ctx.source.as_ref(), &kbs).await {
                Ok(report) if !report.changed.is_empty() => {
                    info!("Hid {} updates: {}", report.changed.len(), kbs)
                }
                Ok(_) => debug!("No visible updates match hidden directives {}", kbs),
                Err(e) => error!("Error hiding updates {}: {}", kbs, e),
            }
        }

        if set.required.is_empty() {
            info!("No required updates in enforcement directives");
            return;
        }
        let kbs = KbSet::from_ids(&set.required);
        info!("Enforcing required updates {}", kbs);
        self.install(InstallRequest::new(Trigger::Enforcement(kbs)))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_plan() {
        let plan = TimerPlan::from_policy(&Policy::default());
        assert_eq!(plan.default_install, Some(Duration::from_secs(86_400)));
        assert_eq!(plan.maintenance_window, None);
        assert_eq!(plan.list, Some(Duration::from_secs(7_200)));
        assert_eq!(plan.virus_definitions, Some(Duration::from_secs(1_800)));
        assert_eq!(plan.drivers, None);
        assert_eq!(plan.enforcement, Some(Duration::from_secs(21_600)));
    }

    #[test]
    fn test_window_replaces_default_timer() {
        let mut policy = Policy::default();
        policy.maintenance_window.enabled = true;
        policy.update_drivers = true;
        policy.update_virus_definitions = false;

        let plan = TimerPlan::from_policy(&policy);
        assert_eq!(plan.default_install, None);
        assert_eq!(plan.maintenance_window, Some(Duration::from_secs(300)));
        assert_eq!(plan.drivers, Some(Duration::from_secs(259_200)));
        assert_eq!(plan.virus_definitions, None);
    }
}
