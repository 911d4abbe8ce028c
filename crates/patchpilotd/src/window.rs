//! Maintenance-window service client.
//!
//! The window service runs on localhost and answers
//! `GET /status/{label}` with the schedules registered under that label.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// Label of the window describing the user's active hours.
pub const ACTIVE_HOURS_LABEL: &str = "active_hours";

/// State reported for a window that currently allows work.
pub const STATE_OPEN: &str = "open";

#[derive(Error, Debug)]
pub enum WindowError {
    #[error("window service request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("window service returned {0}")]
    Status(reqwest::StatusCode),
}

/// One schedule as reported by the window service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WindowSchedule {
    pub name: String,
    pub state: String,
    pub opens: DateTime<Utc>,
    pub closes: DateTime<Utc>,
}

impl WindowSchedule {
    pub fn is_open(&self) -> bool {
        self.state == STATE_OPEN
    }
}

#[async_trait]
pub trait MaintenanceWindows: Send + Sync {
    /// Schedules registered under `label`, in service order.
    async fn label(&self, label: &str) -> Result<Vec<WindowSchedule>, WindowError>;
}

/// HTTP client for the local window service.
pub struct WindowClient {
    base_url: String,
    client: reqwest::Client,
}

impl WindowClient {
    pub fn new(port: u16) -> Self {
        Self::with_base_url(format!("http://localhost:{}", port))
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    fn status_url(&self, label: &str) -> String {
        format!("{}/status/{}", self.base_url.trim_end_matches('/'), label)
    }
}

#[async_trait]
impl MaintenanceWindows for WindowClient {
    async fn label(&self, label: &str) -> Result<Vec<WindowSchedule>, WindowError> {
        let response = self.client.get(self.status_url(label)).send().await?;
        if !response.status().is_success() {
            return Err(WindowError::Status(response.status()));
        }
        Ok(response.json().await?)
    }
}

// ============================================================================
// Fake Windows (tests)
// ============================================================================

#[derive(Default)]
pub struct FakeWindows {
    labels: Mutex<HashMap<String, Vec<WindowSchedule>>>,
}

impl FakeWindows {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, label: &str, schedules: Vec<WindowSchedule>) {
        if let Ok(mut labels) = self.labels.lock() {
            labels.insert(label.to_string(), schedules);
        }
    }
}

#[async_trait]
impl MaintenanceWindows for FakeWindows {
    async fn label(&self, label: &str) -> Result<Vec<WindowSchedule>, WindowError> {
        Ok(self
            .labels
            .lock()
            .ok()
            .and_then(|l| l.get(label).cloned())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_wire_format() {
        let body = r#"[{
            "Name": "patchpilot",
            "State": "open",
            "Opens": "2024-03-01T02:00:00Z",
            "Closes": "2024-03-01T05:00:00Z"
        }]"#;
        let schedules: Vec<WindowSchedule> = serde_json::from_str(body).unwrap();
        assert_eq!(schedules.len(), 1);
        assert!(schedules[0].is_open());
        assert_eq!(schedules[0].closes.to_rfc3339(), "2024-03-01T05:00:00+00:00");
    }

    #[test]
    fn test_status_url() {
        let client = WindowClient::with_base_url("http://localhost:9119/");
        assert_eq!(
            client.status_url("active_hours"),
            "http://localhost:9119/status/active_hours"
        );
    }
}
