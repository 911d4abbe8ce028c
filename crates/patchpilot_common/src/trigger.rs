//! Install triggers and the criteria table.
//!
//! [`criteria_for`] is the single place that encodes what a trigger searches
//! for and which categories count as required.

use crate::candidate::{category, UpdateCandidate};
use crate::kbset::KbSet;
use crate::policy::Policy;
use std::fmt;

/// Base query for assigned updates that are not installed.
pub const BASIC_SEARCH: &str = "IsInstalled=0 and DeploymentAction='Installation'";

/// Category id of definition updates.
pub const DEFINITION_UPDATES_ID: &str = "E0789628-CE08-4437-BE74-2495B842F43B";

/// Why an install run was started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Default install timer
    Default,
    /// Maintenance window reported open
    MaintenanceWindowOpen,
    /// Listing of available updates, visible or hidden
    ScheduledList { hidden: bool },
    VirusDefinitions,
    Drivers,
    /// Only updates older than the configured deadline
    Deadline,
    /// Required updates from enforcement directives
    Enforcement(KbSet),
    /// KB ids requested by an operator
    ManualKbSet(KbSet),
    /// Everything assigned, drivers included, no category filter
    All,
}

impl Trigger {
    /// Requested KB filter, if the trigger carries one.
    pub fn kb_filter(&self) -> Option<&KbSet> {
        match self {
            Trigger::Enforcement(kbs) | Trigger::ManualKbSet(kbs) => Some(kbs),
            _ => None,
        }
    }

    /// Runs that only consider updates past the deadline.
    pub fn is_deadline_gated(&self) -> bool {
        matches!(self, Trigger::Deadline)
    }

    /// Runs gated by the monthly-patches toggle.
    pub fn is_routine(&self) -> bool {
        matches!(self, Trigger::Default | Trigger::MaintenanceWindowOpen)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Trigger::Default => "default",
            Trigger::MaintenanceWindowOpen => "maintenance_window",
            Trigger::ScheduledList { .. } => "scheduled_list",
            Trigger::VirusDefinitions => "virus_definitions",
            Trigger::Drivers => "drivers",
            Trigger::Deadline => "deadline",
            Trigger::Enforcement(_) => "enforcement",
            Trigger::ManualKbSet(_) => "manual_kbs",
            Trigger::All => "all",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kb_filter() {
            Some(kbs) => write!(f, "{} {}", self.name(), kbs),
            None => f.write_str(self.name()),
        }
    }
}

/// What to ask the update source for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchCriteria {
    /// Not installed and not hidden, plus drivers
    General,
    /// Driver updates only
    Drivers,
    /// Not installed definition updates
    VirusDefinitions,
    /// Everything assigned and not installed, hidden included
    Assigned,
    /// Not installed updates, filtered on the hidden flag
    Listing { hidden: bool },
    /// Hidden updates in any install state
    Hidden,
    /// Visible updates in any install state
    Visible,
}

impl SearchCriteria {
    /// Query string in the update-service search syntax.
    pub fn query(&self) -> String {
        match self {
            SearchCriteria::General => format!("{} AND IsHidden=0 OR Type='Driver'", BASIC_SEARCH),
            SearchCriteria::Drivers => "Type='Driver'".to_string(),
            SearchCriteria::VirusDefinitions => format!(
                "{} AND CategoryIDs contains '{}'",
                BASIC_SEARCH, DEFINITION_UPDATES_ID
            ),
            SearchCriteria::Assigned => BASIC_SEARCH.to_string(),
            SearchCriteria::Listing { hidden } => format!(
                "{} OR {} AND Type='Software' and IsHidden={}",
                BASIC_SEARCH,
                BASIC_SEARCH,
                u8::from(*hidden)
            ),
            SearchCriteria::Hidden => "IsHidden=1".to_string(),
            SearchCriteria::Visible => {
                "IsHidden=0 and IsInstalled=0 or IsHidden=0 and IsInstalled=1".to_string()
            }
        }
    }

    /// Evaluate the criteria against a candidate's state.
    ///
    /// Used by sources that hold their own catalog instead of delegating the
    /// query to a remote service.
    pub fn admits(&self, candidate: &UpdateCandidate, installed: bool) -> bool {
        match self {
            SearchCriteria::General => !installed && (!candidate.hidden || candidate.is_driver()),
            SearchCriteria::Drivers => !installed && candidate.is_driver(),
            SearchCriteria::VirusDefinitions => !installed && candidate.is_definition_update(),
            SearchCriteria::Assigned => !installed,
            SearchCriteria::Listing { hidden } => !installed && candidate.hidden == *hidden,
            SearchCriteria::Hidden => candidate.hidden,
            SearchCriteria::Visible => !candidate.hidden,
        }
    }
}

impl fmt::Display for SearchCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.query())
    }
}

/// Map a trigger to its search criteria and required categories.
///
/// An empty category list means "no category filter".
pub fn criteria_for(trigger: &Trigger, policy: &Policy) -> (SearchCriteria, Vec<String>) {
    match trigger {
        Trigger::All => (SearchCriteria::General, Vec::new()),
        Trigger::Drivers => (SearchCriteria::Drivers, vec![category::DRIVERS.to_string()]),
        Trigger::VirusDefinitions => (
            SearchCriteria::VirusDefinitions,
            vec![category::DEFINITION.to_string()],
        ),
        Trigger::Enforcement(_) | Trigger::ManualKbSet(_) => (SearchCriteria::Assigned, Vec::new()),
        Trigger::ScheduledList { hidden } => (
            SearchCriteria::Listing { hidden: *hidden },
            policy.required_categories.clone(),
        ),
        Trigger::Default | Trigger::MaintenanceWindowOpen | Trigger::Deadline => (
            SearchCriteria::General,
            policy.required_categories.clone(),
        ),
    }
}
