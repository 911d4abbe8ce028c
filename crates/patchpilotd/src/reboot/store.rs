//! Durable reboot record.
//!
//! Holds the scheduled reboot time and the KB ids of the updates that asked
//! for it. Survives agent restarts so a scheduled reboot is not lost.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::RebootError;

const RECORD_FILE: &str = "reboot.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RebootRecord {
    #[serde(default)]
    pub reboot_time: Option<DateTime<Utc>>,

    /// KB ids of installed updates waiting for the reboot
    #[serde(default)]
    pub updates: Vec<String>,
}

#[async_trait]
pub trait RebootStore: Send + Sync {
    async fn load(&self) -> Result<RebootRecord, RebootError>;

    async fn set_reboot_time(&self, at: DateTime<Utc>) -> Result<(), RebootError>;

    /// Forget the scheduled time and the pending update list.
    async fn clear(&self) -> Result<(), RebootError>;

    /// Append KB ids, skipping ones already recorded.
    async fn add_reboot_updates(&self, kb_ids: &[String]) -> Result<(), RebootError>;
}

/// JSON file under the state directory.
pub struct FileRebootStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileRebootStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: state_dir.into().join(RECORD_FILE),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    async fn read(&self) -> Result<RebootRecord, RebootError> {
        if !self.path.exists() {
            return Ok(RebootRecord::default());
        }
        let contents = fs::read_to_string(&self.path)
            .await
            .map_err(|source| RebootError::Store {
                path: self.path.clone(),
                source,
            })?;
        Ok(serde_json::from_str(&contents)?)
    }

    async fn write(&self, record: &RebootRecord) -> Result<(), RebootError> {
        let io_err = |source| RebootError::Store {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .await
            .map_err(io_err)?;
        file.write_all(json.as_bytes()).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        debug!("Saved reboot record to {}", self.path.display());
        Ok(())
    }

    async fn modify<F>(&self, f: F) -> Result<(), RebootError>
    where
        F: FnOnce(&mut RebootRecord) + Send,
    {
        let _guard = self.lock.lock().await;
        let mut record = self.read().await?;
        f(&mut record);
        self.write(&record).await
    }
}

#[async_trait]
impl RebootStore for FileRebootStore {
    async fn load(&self) -> Result<RebootRecord, RebootError> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    async fn set_reboot_time(&self, at: DateTime<Utc>) -> Result<(), RebootError> {
        self.modify(move |r| r.reboot_time = Some(at)).await
    }

    async fn clear(&self) -> Result<(), RebootError> {
        self.modify(|r| *r = RebootRecord::default()).await
    }

    async fn add_reboot_updates(&self, kb_ids: &[String]) -> Result<(), RebootError> {
        let kb_ids = kb_ids.to_vec();
        self.modify(move |r| {
            for id in kb_ids {
                if !r.updates.contains(&id) {
                    r.updates.push(id);
                }
            }
        })
        .await
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryRebootStore {
    record: Mutex<RebootRecord>,
}

impl MemoryRebootStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RebootStore for MemoryRebootStore {
    async fn load(&self) -> Result<RebootRecord, RebootError> {
        Ok(self.record.lock().await.clone())
    }

    async fn set_reboot_time(&self, at: DateTime<Utc>) -> Result<(), RebootError> {
        self.record.lock().await.reboot_time = Some(at);
        Ok(())
    }

    async fn clear(&self) -> Result<(), RebootError> {
        *self.record.lock().await = RebootRecord::default();
        Ok(())
    }

    async fn add_reboot_updates(&self, kb_ids: &[String]) -> Result<(), RebootError> {
        let mut record = self.record.lock().await;
        for id in kb_ids {
            if !record.updates.contains(id) {
                record.updates.push(id.clone());
            }
        }
        Ok(())
    }
}
