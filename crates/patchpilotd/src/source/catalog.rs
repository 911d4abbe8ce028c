//! Catalog-backed update source.
//!
//! Offered updates are read from a JSON catalog: the local catalog file, or
//! `{server}/catalog.json` from the first configured update server that
//! answers. Per-host state (installed,
//! hidden, accepted EULAs, history) lives in `state_dir/source_state.json`.
//! Payloads are fetched over HTTP into `state_dir/cache` and installed by
//! running the entry's install command with `sh -c`.

use super::{InstallOutcome, SearchOutcome, SourceError, UpdateSource, RESULT_OK};
use async_trait::async_trait;
use chrono::Utc;
use patchpilot_common::{HistoryEntry, OperationStatus, SearchCriteria, UpdateCandidate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const STATE_FILE: &str = "source_state.json";
const CACHE_DIR: &str = "cache";

/// Catalog resource served by update servers.
pub const SERVER_CATALOG: &str = "catalog.json";

/// Environment variable pointing the install command at its payload.
pub const PAYLOAD_ENV: &str = "PATCHPILOT_PAYLOAD";

/// One offered update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(flatten)]
    pub candidate: UpdateCandidate,

    #[serde(default)]
    pub download_url: Option<String>,

    /// Shell command performing the install
    #[serde(default)]
    pub install_command: Option<String>,

    #[serde(default)]
    pub reboot_required: bool,
}

/// Per-host view of the catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceState {
    #[serde(default)]
    pub installed: BTreeSet<String>,
    #[serde(default)]
    pub hidden: BTreeSet<String>,
    #[serde(default)]
    pub eula_accepted: BTreeSet<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub third_party_enabled: bool,
}

pub struct CatalogSource {
    catalog: PathBuf,
    /// Update servers tried in order; the local catalog is used when empty
    servers: Vec<String>,
    state_dir: PathBuf,
    client: reqwest::Client,
    state_lock: Mutex<()>,
}

impl CatalogSource {
    pub fn new(catalog: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_default();
        Self {
            catalog: catalog.into(),
            servers: Vec::new(),
            state_dir: state_dir.into(),
            client,
            state_lock: Mutex::new(()),
        }
    }

    /// Fetch the catalog from `servers` instead of the local file.
    pub fn with_servers(mut self, servers: Vec<String>) -> Self {
        self.servers = servers;
        self
    }

    /// Catalog URL on an update server.
    pub fn server_catalog_url(server: &str) -> String {
        format!("{}/{}", server.trim_end_matches('/'), SERVER_CATALOG)
    }

    /// Where the catalog comes from, for logs and errors.
    fn origin(&self) -> String {
        if self.servers.is_empty() {
            self.catalog.display().to_string()
        } else {
            self.servers.join(", ")
        }
    }

    fn state_path(&self) -> PathBuf {
        self.state_dir.join(STATE_FILE)
    }

    /// Cached payload location for an update.
    pub fn payload_path(&self, update_id: &str) -> PathBuf {
        self.state_dir.join(CACHE_DIR).join(update_id)
    }

    async fn load_catalog(&self) -> Result<Vec<CatalogEntry>, SourceError> {
        if self.servers.is_empty() {
            let contents = fs::read_to_string(&self.catalog).await?;
            return Ok(serde_json::from_str(&contents)?);
        }

        let mut last_error = None;
        for server in &self.servers {
            match self.fetch_catalog(server).await {
                Ok(entries) => return Ok(entries),
                Err(e) => {
                    warn!("Update server {} unavailable: {}", server, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| SourceError::Session("no update server".to_string())))
    }

    async fn fetch_catalog(&self, server: &str) -> Result<Vec<CatalogEntry>, SourceError> {
        let url = Self::server_catalog_url(server);
        debug!("Fetching catalog from {}", url);
        let entries: Vec<CatalogEntry> = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(entries)
    }

    async fn entry(&self, update_id: &str) -> Result<CatalogEntry, SourceError> {
        self.load_catalog()
            .await?
            .into_iter()
            .find(|e| e.candidate.update_id == update_id)
            .ok_or_else(|| SourceError::UnknownUpdate(update_id.to_string()))
    }

    async fn load_state(&self) -> Result<SourceState, SourceError> {
        let path = self.state_path();
        if !path.exists() {
            return Ok(SourceState::default());
        }
        let contents = fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&contents)?)
    }

    async fn save_state(&self, state: &SourceState) -> Result<(), SourceError> {
        fs::create_dir_all(&self.state_dir).await?;
        let json = serde_json::to_string_pretty(state)?;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(self.state_path())
            .await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
        debug!("Saved source state ({} installed)", state.installed.len());
        Ok(())
    }

    /// Read-modify-write of the source state under the state lock.
    async fn update_state<F>(&self, f: F) -> Result<(), SourceError>
    where
        F: FnOnce(&mut SourceState) + Send,
    {
        let _guard = self.state_lock.lock().await;
        let mut state = self.load_state().await?;
        f(&mut state);
        self.save_state(&state).await
    }

    async fn record_history(
        &self,
        candidate: &UpdateCandidate,
        status: OperationStatus,
    ) -> Result<(), SourceError> {
        let entry = HistoryEntry {
            update_id: candidate.update_id.clone(),
            title: candidate.title.clone(),
            date: Utc::now(),
            status,
            kb_ids: candidate.kb_ids.clone(),
        };
        let update_id = candidate.update_id.clone();
        self.update_state(move |state| {
            if status.is_success() {
                state.installed.insert(update_id);
            }
            state.history.push(entry);
        })
        .await
    }
}

#[async_trait]
impl UpdateSource for CatalogSource {
    async fn connect(&self) -> Result<(), SourceError> {
        let entries = self
            .load_catalog()
            .await
            .map_err(|e| SourceError::Session(format!("{}: {}", self.origin(), e)))?;
        debug!("Catalog {} offers {} updates", self.origin(), entries.len());
        Ok(())
    }

    async fn search(&self, criteria: &SearchCriteria) -> Result<SearchOutcome, SourceError> {
        let entries = self
            .load_catalog()
            .await
            .map_err(|e| SourceError::Search(e.to_string()))?;
        let state = self.load_state().await?;

        let candidates = entries
            .into_iter()
            .map(|e| {
                let mut c = e.candidate;
                c.hidden = state.hidden.contains(&c.update_id);
                c.eula_accepted = c.eula_accepted || state.eula_accepted.contains(&c.update_id);
                c
            })
            .filter(|c| criteria.admits(c, state.installed.contains(&c.update_id)))
            .collect();

        Ok(SearchOutcome {
            candidates,
            result_code: RESULT_OK.to_string(),
        })
    }

    async fn accept_eula(&self, candidate: &UpdateCandidate) -> Result<(), SourceError> {
        let update_id = candidate.update_id.clone();
        self.update_state(move |state| {
            state.eula_accepted.insert(update_id);
        })
        .await
    }

    async fn download(&self, candidate: &UpdateCandidate) -> Result<OperationStatus, SourceError> {
        let entry = self.entry(&candidate.update_id).await?;
        let Some(url) = entry.download_url else {
            debug!("{} has no payload to download", candidate.title);
            return Ok(OperationStatus::Succeeded);
        };

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            warn!("Download of {} returned {}", url, response.status());
            return Ok(OperationStatus::Failed);
        }
        let bytes = response.bytes().await?;

        let path = self.payload_path(&candidate.update_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, &bytes).await?;
        info!("Downloaded {} ({} bytes)", candidate.title, bytes.len());
        Ok(OperationStatus::Succeeded)
    }

    async fn install(&self, candidate: &UpdateCandidate) -> Result<InstallOutcome, SourceError> {
        let entry = self.entry(&candidate.update_id).await?;

        let (status, result_code) = match entry.install_command.as_deref() {
            None => (OperationStatus::Succeeded, RESULT_OK.to_string()),
            Some(cmd) => {
                let output = Command::new("sh")
                    .arg("-c")
                    .arg(cmd)
                    .env(PAYLOAD_ENV, self.payload_path(&candidate.update_id))
                    .output()
                    .await
                    .map_err(|e| SourceError::Install(format!("{}: {}", cmd, e)))?;
                if output.status.success() {
                    (OperationStatus::Succeeded, RESULT_OK.to_string())
                } else {
                    warn!(
                        "Install command for {} failed: {}",
                        candidate.title,
                        String::from_utf8_lossy(&output.stderr).trim()
                    );
                    (OperationStatus::Failed, output.status.to_string())
                }
            }
        };

        self.record_history(candidate, status).await?;
        Ok(InstallOutcome {
            status,
            result_code,
            reboot_required: status.is_success() && entry.reboot_required,
        })
    }

    async fn set_hidden(&self, candidate: &UpdateCandidate, hidden: bool) -> Result<(), SourceError> {
        // Ensure the update exists before recording it.
        self.entry(&candidate.update_id).await?;
        let update_id = candidate.update_id.clone();
        self.update_state(move |state| {
            if hidden {
                state.hidden.insert(update_id);
            } else {
                state.hidden.remove(&update_id);
            }
        })
        .await
    }

    async fn history(&self) -> Result<Vec<HistoryEntry>, SourceError> {
        Ok(self.load_state().await?.history)
    }

    async fn enable_third_party(&self) -> Result<(), SourceError> {
        self.update_state(|state| state.third_party_enabled = true).await
    }
}
