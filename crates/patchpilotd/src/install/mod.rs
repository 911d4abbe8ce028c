//! Install decision engine.
//!
//! One run: gate on the monthly-patches toggle and pending reboots, search
//! the source with the trigger's criteria, filter candidates, then download
//! and install each survivor on its own. A failure on one candidate is
//! recorded and the run moves on. Updates needing a reboot are recorded and
//! a reboot is scheduled.

pub mod filter;
pub mod hide;
pub mod list;

pub use filter::{past_deadline, CandidateFilter, SkipReason};
pub use hide::{hide, unhide, HideReport};
pub use list::{list_updates, UpdateListing};

use chrono::{DateTime, Utc};
use patchpilot_common::{criteria_for, DriverExclusionRule, Policy, Trigger, UpdateCandidate};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::hooks::{HookKind, Hooks};
use crate::reboot::RebootLifecycle;
use crate::source::{SourceError, UpdateSource};

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("failed to open an update session: {0}")]
    SessionCreateFailed(#[source] SourceError),

    #[error("failed to search for updates: {0}")]
    SearchFailed(#[source] SourceError),

    #[error("failed to download {candidate}: {reason}")]
    DownloadFailed { candidate: String, reason: String },

    #[error("failed to install {candidate}: {reason}")]
    InstallFailed { candidate: String, reason: String },
}

/// What to install and how.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallRequest {
    pub trigger: Trigger,
    /// Only updates past the deadline, regardless of trigger
    pub deadline_only: bool,
    /// Started by an operator rather than a timer
    pub interactive: bool,
}

impl InstallRequest {
    pub fn new(trigger: Trigger) -> Self {
        Self {
            trigger,
            deadline_only: false,
            interactive: false,
        }
    }

    pub fn deadline_only(mut self, deadline_only: bool) -> Self {
        self.deadline_only = deadline_only;
        self
    }

    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    fn deadline_gated(&self) -> bool {
        self.deadline_only || self.trigger.is_deadline_gated()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Search, filter and installs ran
    Completed,
    /// Routine installs are turned off
    Disabled,
    /// A reboot was already pending; nothing was installed
    RebootPending,
}

/// Summary of one install run.
#[derive(Debug)]
pub struct InstallReport {
    pub run_id: Uuid,
    pub trigger: Trigger,
    pub outcome: RunOutcome,
    pub found: usize,
    pub skipped: Vec<(String, SkipReason)>,
    pub installed: Vec<String>,
    pub failures: Vec<InstallError>,
    pub reboot_required: bool,
    pub reboot_time: Option<DateTime<Utc>>,
}

impl InstallReport {
    fn new(run_id: Uuid, trigger: Trigger, outcome: RunOutcome) -> Self {
        Self {
            run_id,
            trigger,
            outcome,
            found: 0,
            skipped: Vec::new(),
            installed: Vec::new(),
            failures: Vec::new(),
            reboot_required: false,
            reboot_time: None,
        }
    }
}

pub struct InstallEngine {
    policy: Arc<Policy>,
    source: Arc<dyn UpdateSource>,
    reboot: Arc<RebootLifecycle>,
    hooks: Hooks,
}

impl InstallEngine {
    pub fn new(
        policy: Arc<Policy>,
        source: Arc<dyn UpdateSource>,
        reboot: Arc<RebootLifecycle>,
    ) -> Self {
        let hooks = Hooks::new(policy.paths.hooks_dir.clone(), policy.script_timeout());
        Self {
            policy,
            source,
            reboot,
            hooks,
        }
    }

    pub fn source(&self) -> &Arc<dyn UpdateSource> {
        &self.source
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub async fn run(&self, request: InstallRequest) -> Result<InstallReport, InstallError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("install", trigger = %request.trigger, run_id = %run_id);
        self.run_inner(request, run_id).instrument(span).await
    }

    async fn run_inner(
        &self,
        request: InstallRequest,
        run_id: Uuid,
    ) -> Result<InstallReport, InstallError> {
        let trigger = request.trigger.clone();

        if trigger.is_routine() && !self.policy.install_monthly_patches {
            info!("Routine installs are disabled, skipping run");
            return Ok(InstallReport::new(run_id, trigger, RunOutcome::Disabled));
        }

        if trigger != Trigger::VirusDefinitions && self.reboot.reboot_pending().await {
            self.hand_off_pending_reboot(request.interactive).await;
            let mut report = InstallReport::new(run_id, trigger, RunOutcome::RebootPending);
            report.reboot_required = true;
            return Ok(report);
        }

        self.source
            .connect()
            .await
            .map_err(InstallError::SessionCreateFailed)?;

        let (criteria, required) = criteria_for(&trigger, &self.policy);
        info!("Using search criteria: {}", criteria);
        let search = self
            .source
            .search(&criteria)
            .await
            .map_err(InstallError::SearchFailed)?;
        info!(
            "Found {} updates (result code {})",
            search.candidates.len(),
            search.result_code
        );

        let mut report = InstallReport::new(run_id, trigger, RunOutcome::Completed);
        report.found = search.candidates.len();

        let exclusions = load_driver_exclusions(&self.policy.paths.enforcement_dir);
        let filter = CandidateFilter {
            exclusions: &exclusions,
            required_categories: &required,
            kbs: request.trigger.kb_filter(),
            deadline: request.deadline_gated().then(|| self.policy.deadline()),
            now: Utc::now(),
        };

        let mut survivors = Vec::new();
        for candidate in search.candidates {
            match filter.evaluate(&candidate) {
                Ok(()) => survivors.push(candidate),
                Err(reason) => {
                    info!("Skipping update {}: {}", candidate.title, reason);
                    report.skipped.push((candidate.title, reason));
                }
            }
        }

        self.accept_eulas(&survivors).await;

        let mut hooks_ran = false;
        let mut reboot_kbs: Vec<String> = Vec::new();
        for candidate in &survivors {
            if !hooks_ran && !candidate.is_definition_update() {
                hooks_ran = true;
                self.run_hook(HookKind::PreUpdate).await;
            }

            match self.install_one(candidate).await {
                Ok(reboot_required) => {
                    report.installed.push(candidate.title.clone());
                    if reboot_required && !candidate.is_definition_update() {
                        info!("Adding KB {:?} to reboot list", candidate.kb_ids);
                        report.reboot_required = true;
                        reboot_kbs.extend(candidate.kb_ids.iter().cloned());
                    }
                }
                Err(e) => {
                    error!("{}", e);
                    report.failures.push(e);
                }
            }
        }

        if hooks_ran {
            self.run_hook(HookKind::PostUpdate).await;
        }

        if report.reboot_required {
            match self.reboot.record_and_schedule(&reboot_kbs).await {
                Ok(at) => report.reboot_time = Some(at),
                Err(e) => error!("Failed to schedule reboot: {}", e),
            }
        }

        info!(
            "Run finished: {} installed, {} failed, {} skipped",
            report.installed.len(),
            report.failures.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    async fn hand_off_pending_reboot(&self, interactive: bool) {
        if interactive {
            info!("Reboot pending, requesting reboot");
            self.reboot.request();
            return;
        }
        match self.reboot.scheduled_time().await {
            Ok(Some(at)) => {
                info!("Reboot pending and scheduled for {}", at.to_rfc3339());
                self.reboot.request();
            }
            Ok(None) => info!("Reboot pending but not scheduled, skipping run"),
            Err(e) => error!("Error getting reboot time: {}", e),
        }
    }

    async fn accept_eulas(&self, candidates: &[UpdateCandidate]) {
        for candidate in candidates.iter().filter(|c| !c.eula_accepted) {
            info!("Accepting EULA for update: {}", candidate.title);
            if let Err(e) = self.source.accept_eula(candidate).await {
                error!("Failed to accept EULA for update {}: {}", candidate.title, e);
            }
        }
    }

    /// Download and install a single update. Returns whether it needs a reboot.
    async fn install_one(&self, candidate: &UpdateCandidate) -> Result<bool, InstallError> {
        info!("Downloading update: {}", candidate);
        let status = self
            .source
            .download(candidate)
            .await
            .map_err(|e| InstallError::DownloadFailed {
                candidate: candidate.title.clone(),
                reason: e.to_string(),
            })?;
        if !status.is_success() {
            return Err(InstallError::DownloadFailed {
                candidate: candidate.title.clone(),
                reason: format!("status {}", status),
            });
        }

        info!("Installing update: {}", candidate);
        let outcome = self
            .source
            .install(candidate)
            .await
            .map_err(|e| InstallError::InstallFailed {
                candidate: candidate.title.clone(),
                reason: e.to_string(),
            })?;
        if !outcome.status.is_success() {
            return Err(InstallError::InstallFailed {
                candidate: candidate.title.clone(),
                reason: format!("status {}, result code {}", outcome.status, outcome.result_code),
            });
        }

        info!(
            "Installed {} (result code {}, reboot required: {})",
            candidate.title, outcome.result_code, outcome.reboot_required
        );
        Ok(outcome.reboot_required)
    }

    async fn run_hook(&self, kind: HookKind) {
        if let Err(e) = self.hooks.run(kind).await {
            error!("{}", e);
        }
    }
}

/// Driver exclusion rules currently in force. Read fresh each run.
pub fn load_driver_exclusions(dir: &Path) -> Vec<DriverExclusionRule> {
    match patchpilot_common::load_all(dir) {
        Ok(set) => {
            debug!("{} driver exclusion rules in force", set.excluded_drivers.len());
            set.excluded_drivers
        }
        Err(e) => {
            warn!("Could not read enforcement directory {}: {}", dir.display(), e);
            Vec::new()
        }
    }
}
