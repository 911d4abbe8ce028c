//! Update source abstraction.
//!
//! The engine only consumes an update source: search, per-update download and
//! install, EULA acceptance, hiding and history. [`CatalogSource`] is the
//! production implementation; [`FakeSource`] gives tests full control over
//! every call's outcome without touching the system.

pub mod catalog;

pub use catalog::CatalogSource;

use async_trait::async_trait;
use patchpilot_common::{HistoryEntry, OperationStatus, SearchCriteria, UpdateCandidate};
use std::collections::HashSet;
use std::sync::Mutex;
use thiserror::Error;

/// Raw result code reported for a clean search.
pub const RESULT_OK: &str = "0x00000000";

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("session error: {0}")]
    Session(String),

    #[error("search failed: {0}")]
    Search(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("install failed: {0}")]
    Install(String),

    #[error("unknown update: {0}")]
    UnknownUpdate(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result of a search: candidates plus the raw result code.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub candidates: Vec<UpdateCandidate>,
    pub result_code: String,
}

/// Result of installing a single update.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallOutcome {
    pub status: OperationStatus,
    pub result_code: String,
    pub reboot_required: bool,
}

/// Operations the engine needs from the platform's update service.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Open a session with the update service.
    async fn connect(&self) -> Result<(), SourceError>;

    async fn search(&self, criteria: &SearchCriteria) -> Result<SearchOutcome, SourceError>;

    async fn accept_eula(&self, candidate: &UpdateCandidate) -> Result<(), SourceError>;

    /// Download a single update.
    async fn download(&self, candidate: &UpdateCandidate) -> Result<OperationStatus, SourceError>;

    /// Install a single, already downloaded update.
    async fn install(&self, candidate: &UpdateCandidate) -> Result<InstallOutcome, SourceError>;

    async fn set_hidden(&self, candidate: &UpdateCandidate, hidden: bool) -> Result<(), SourceError>;

    async fn history(&self) -> Result<Vec<HistoryEntry>, SourceError>;

    /// Register the third-party update feed.
    async fn enable_third_party(&self) -> Result<(), SourceError>;
}

// ============================================================================
// Fake Source (tests)
// ============================================================================

/// In-memory source with scripted failures.
#[derive(Default)]
pub struct FakeSource {
    candidates: Mutex<Vec<UpdateCandidate>>,
    installed: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    fail_connect: bool,
    fail_search: bool,
    fail_download: HashSet<String>,
    fail_install: HashSet<String>,
    fail_eula: HashSet<String>,
    needs_reboot: HashSet<String>,
}

impl FakeSource {
    pub fn new(candidates: Vec<UpdateCandidate>) -> Self {
        Self {
            candidates: Mutex::new(candidates),
            ..Default::default()
        }
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn failing_search(mut self) -> Self {
        self.fail_search = true;
        self
    }

    pub fn failing_download(mut self, update_id: &str) -> Self {
        self.fail_download.insert(update_id.to_string());
        self
    }

    pub fn failing_install(mut self, update_id: &str) -> Self {
        self.fail_install.insert(update_id.to_string());
        self
    }

    pub fn failing_eula(mut self, update_id: &str) -> Self {
        self.fail_eula.insert(update_id.to_string());
        self
    }

    pub fn requiring_reboot(mut self, update_id: &str) -> Self {
        self.needs_reboot.insert(update_id.to_string());
        self
    }

    /// Every call made so far, as `operation:update_id`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_for(&self, operation: &str) -> Vec<String> {
        let prefix = format!("{}:", operation);
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    pub fn is_hidden(&self, update_id: &str) -> bool {
        self.candidates
            .lock()
            .map(|c| c.iter().any(|u| u.update_id == update_id && u.hidden))
            .unwrap_or(false)
    }

    fn record(&self, operation: &str, update_id: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(format!("{}:{}", operation, update_id));
        }
    }
}

#[async_trait]
impl UpdateSource for FakeSource {
    async fn connect(&self) -> Result<(), SourceError> {
        self.record("connect", "");
        if self.fail_connect {
            return Err(SourceError::Session("update service unavailable".to_string()));
        }
        Ok(())
    }

    async fn search(&self, criteria: &SearchCriteria) -> Result<SearchOutcome, SourceError> {
        self.record("search", &criteria.query());
        if self.fail_search {
            return Err(SourceError::Search("0x80072EE2".to_string()));
        }
        let installed = self.installed.lock().map(|i| i.clone()).unwrap_or_default();
        let candidates = self
            .candidates
            .lock()
            .map(|c| {
                c.iter()
                    .filter(|u| criteria.admits(u, installed.contains(&u.update_id)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(SearchOutcome {
            candidates,
            result_code: RESULT_OK.to_string(),
        })
    }

    async fn accept_eula(&self, candidate: &UpdateCandidate) -> Result<(), SourceError> {
        self.record("eula", &candidate.update_id);
        if self.fail_eula.contains(&candidate.update_id) {
            return Err(SourceError::Install("EULA rejected".to_string()));
        }
        Ok(())
    }

    async fn download(&self, candidate: &UpdateCandidate) -> Result<OperationStatus, SourceError> {
        self.record("download", &candidate.update_id);
        if self.fail_download.contains(&candidate.update_id) {
            return Err(SourceError::Download(format!(
                "payload for {} unavailable",
                candidate.update_id
            )));
        }
        Ok(OperationStatus::Succeeded)
    }

    async fn install(&self, candidate: &UpdateCandidate) -> Result<InstallOutcome, SourceError> {
        self.record("install", &candidate.update_id);
        if self.fail_install.contains(&candidate.update_id) {
            return Ok(InstallOutcome {
                status: OperationStatus::Failed,
                result_code: "0x80240022".to_string(),
                reboot_required: false,
            });
        }
        if let Ok(mut installed) = self.installed.lock() {
            installed.insert(candidate.update_id.clone());
        }
        Ok(InstallOutcome {
            status: OperationStatus::Succeeded,
            result_code: RESULT_OK.to_string(),
            reboot_required: self.needs_reboot.contains(&candidate.update_id),
        })
    }

    async fn set_hidden(&self, candidate: &UpdateCandidate, hidden: bool) -> Result<(), SourceError> {
        self.record(if hidden { "hide" } else { "unhide" }, &candidate.update_id);
        let mut candidates = self
            .candidates
            .lock()
            .map_err(|_| SourceError::Session("poisoned".to_string()))?;
        match candidates
            .iter_mut()
            .find(|u| u.update_id == candidate.update_id)
        {
            Some(u) => {
                u.hidden = hidden;
                Ok(())
            }
            None => Err(SourceError::UnknownUpdate(candidate.update_id.clone())),
        }
    }

    async fn history(&self) -> Result<Vec<HistoryEntry>, SourceError> {
        Ok(Vec::new())
    }

    async fn enable_third_party(&self) -> Result<(), SourceError> {
        self.record("third_party", "");
        Ok(())
    }
}
