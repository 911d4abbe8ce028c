//! Update candidates as offered by the update source.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category names used by the decision table.
pub mod category {
    pub const CRITICAL: &str = "Critical Updates";
    pub const DEFINITION: &str = "Definition Updates";
    pub const SECURITY: &str = "Security Updates";
    pub const DRIVERS: &str = "Drivers";
    pub const UPGRADES: &str = "Upgrades";
}

/// An update being evaluated for installation.
///
/// Built field by field by the update source; never persisted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateCandidate {
    /// Source-specific unique id
    pub update_id: String,
    pub title: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub kb_ids: Vec<String>,
    #[serde(default)]
    pub eula_accepted: bool,
    /// Driver class, set only for driver updates
    #[serde(default)]
    pub driver_class: Option<String>,
    /// Driver version date, set only for driver updates
    #[serde(default)]
    pub driver_version_date: Option<NaiveDate>,
    pub last_deployment: DateTime<Utc>,
    #[serde(default)]
    pub hidden: bool,
}

impl UpdateCandidate {
    /// True when the candidate is in one of `categories`. An empty filter admits everything.
    pub fn in_categories<S: AsRef<str>>(&self, categories: &[S]) -> bool {
        if categories.is_empty() {
            return true;
        }
        self.categories
            .iter()
            .any(|c| categories.iter().any(|wanted| wanted.as_ref() == c))
    }

    pub fn is_driver(&self) -> bool {
        self.driver_class.as_deref().is_some_and(|c| !c.is_empty())
    }

    pub fn is_definition_update(&self) -> bool {
        self.in_categories(&[category::DEFINITION])
    }

    pub fn is_upgrade(&self) -> bool {
        self.in_categories(&[category::UPGRADES])
    }
}

impl fmt::Display for UpdateCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (categories: [{}], kbs: [{}], eula accepted: {})",
            self.title,
            self.categories.join(", "),
            self.kb_ids.join(", "),
            self.eula_accepted
        )
    }
}

/// Outcome code of a download or install operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    NotStarted,
    InProgress,
    Succeeded,
    SucceededWithErrors,
    Failed,
    Aborted,
}

impl OperationStatus {
    /// Map a raw numeric result code (0..=5) onto a status.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::NotStarted,
            1 => Self::InProgress,
            2 => Self::Succeeded,
            3 => Self::SucceededWithErrors,
            5 => Self::Aborted,
            _ => Self::Failed,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::NotStarted => 0,
            Self::InProgress => 1,
            Self::Succeeded => 2,
            Self::SucceededWithErrors => 3,
            Self::Failed => 4,
            Self::Aborted => 5,
        }
    }

    /// Only a clean success counts.
    pub fn is_success(self) -> bool {
        self == Self::Succeeded
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not started",
            Self::InProgress => "in progress",
            Self::Succeeded => "succeeded",
            Self::SucceededWithErrors => "succeeded with errors",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

/// One entry of the installed-update history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub update_id: String,
    pub title: String,
    pub date: DateTime<Utc>,
    pub status: OperationStatus,
    #[serde(default)]
    pub kb_ids: Vec<String>,
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\n  date: {}\n  status: {}\n  kbs: [{}]",
            self.title,
            self.date.to_rfc3339(),
            self.status,
            self.kb_ids.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(categories: &[&str]) -> UpdateCandidate {
        UpdateCandidate {
            update_id: "id".to_string(),
            title: "title".to_string(),
            categories: categories.iter().map(|c| c.to_string()).collect(),
            kb_ids: vec![],
            eula_accepted: true,
            driver_class: None,
            driver_version_date: None,
            last_deployment: Utc::now(),
            hidden: false,
        }
    }

    #[test]
    fn test_empty_category_filter_admits_everything() {
        let c = candidate(&["Feature Packs"]);
        assert!(c.in_categories::<&str>(&[]));
        assert!(!c.in_categories(&[category::SECURITY]));
    }

    #[test]
    fn test_definition_and_driver_flags() {
        let mut c = candidate(&[category::DEFINITION]);
        assert!(c.is_definition_update());
        assert!(!c.is_driver());

        c.driver_class = Some(String::new());
        assert!(!c.is_driver());
        c.driver_class = Some("Net".to_string());
        assert!(c.is_driver());
    }

    #[test]
    fn test_operation_status_codes() {
        assert_eq!(OperationStatus::from_code(2), OperationStatus::Succeeded);
        assert_eq!(OperationStatus::from_code(4), OperationStatus::Failed);
        assert_eq!(OperationStatus::from_code(99), OperationStatus::Failed);
        assert!(!OperationStatus::SucceededWithErrors.is_success());
    }
}
