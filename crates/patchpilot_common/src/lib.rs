//! Shared types for the patchpilot agent and CLI.
//!
//! Pure decision inputs live here: KB matching, driver exclusion rules,
//! enforcement directives, the trigger/criteria table and the policy.

pub mod candidate;
pub mod driver_exclusion;
pub mod enforcement;
pub mod kbset;
pub mod policy;
pub mod trigger;

pub use candidate::{category, HistoryEntry, OperationStatus, UpdateCandidate};
pub use driver_exclusion::{find_exclusion, DriverExclusionRule};
pub use enforcement::{load_all, load_one, EnforcementError, EnforcementSet, SkippedFile};
pub use kbset::{normalize_kb, KbSet};
pub use policy::Policy;
pub use trigger::{criteria_for, SearchCriteria, Trigger};
