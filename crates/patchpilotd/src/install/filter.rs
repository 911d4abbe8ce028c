//! Per-candidate admission checks.
//!
//! Checks run in a fixed order and the first one that fails decides the
//! reported skip reason: driver exclusion, required category, requested KBs,
//! deadline.

use chrono::{DateTime, Duration, Utc};
use patchpilot_common::{find_exclusion, DriverExclusionRule, KbSet, UpdateCandidate};
use std::fmt;

/// True when `now` is strictly later than `last_deployment + deadline`.
pub fn past_deadline(last_deployment: DateTime<Utc>, deadline: Duration, now: DateTime<Utc>) -> bool {
    now > last_deployment + deadline
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    DriverExcluded { rule: DriverExclusionRule },
    CategoryNotRequired { required: Vec<String> },
    KbNotRequested { requested: String },
    DriverOnDeadlineRun,
    DeadlineNotReached { deployed: DateTime<Utc>, days: i64 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::DriverExcluded { rule } => write!(
                f,
                "driver excluded (class {:?}, date {:?})",
                rule.driver_class(),
                rule.driver_date_version()
            ),
            SkipReason::CategoryNotRequired { required } => {
                write!(f, "not in required categories [{}]", required.join(", "))
            }
            SkipReason::KbNotRequested { requested } => {
                write!(f, "no KB in requested set {}", requested)
            }
            SkipReason::DriverOnDeadlineRun => {
                f.write_str("drivers are only installed outside deadline runs")
            }
            SkipReason::DeadlineNotReached { deployed, days } => write!(
                f,
                "deployed {} has not reached the {} day threshold",
                deployed.to_rfc3339(),
                days
            ),
        }
    }
}

/// Inputs of one run's admission decision.
#[derive(Debug, Clone)]
pub struct CandidateFilter<'a> {
    pub exclusions: &'a [DriverExclusionRule],
    /// Empty admits every category
    pub required_categories: &'a [String],
    /// Set only for KB-filtered runs; an empty set admits nothing
    pub kbs: Option<&'a KbSet>,
    /// Set only for deadline runs
    pub deadline: Option<Duration>,
    pub now: DateTime<Utc>,
}

impl CandidateFilter<'_> {
    pub fn evaluate(&self, candidate: &UpdateCandidate) -> Result<(), SkipReason> {
        if let Some(rule) = find_exclusion(self.exclusions, candidate) {
            return Err(SkipReason::DriverExcluded { rule: rule.clone() });
        }

        if !candidate.in_categories(self.required_categories) {
            return Err(SkipReason::CategoryNotRequired {
                required: self.required_categories.to_vec(),
            });
        }

        if let Some(kbs) = self.kbs {
            if !kbs.matches_any(&candidate.kb_ids) {
                return Err(SkipReason::KbNotRequested {
                    requested: kbs.to_string(),
                });
            }
        }

        if let Some(deadline) = self.deadline {
            if candidate.is_driver() {
                return Err(SkipReason::DriverOnDeadlineRun);
            }
            if !past_deadline(candidate.last_deployment, deadline, self.now) {
                return Err(SkipReason::DeadlineNotReached {
                    deployed: candidate.last_deployment,
                    days: deadline.num_days(),
                });
            }
        }

        Ok(())
    }
}
