//! Hide and unhide updates by KB.

use patchpilot_common::{KbSet, SearchCriteria};
use tracing::{error, info};

use super::InstallError;
use crate::source::UpdateSource;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct HideReport {
    /// Titles whose hidden flag was changed
    pub changed: Vec<String>,
    /// Titles that matched but could not be changed
    pub failed: Vec<String>,
}

/// Hide every visible update carrying one of `kbs`.
pub async fn hide(source: &dyn UpdateSource, kbs: &KbSet) -> Result<HideReport, InstallError> {
    set_hidden(source, kbs, true).await
}

/// Make every hidden update carrying one of `kbs` visible again.
pub async fn unhide(source: &dyn UpdateSource, kbs: &KbSet) -> Result<HideReport, InstallError> {
    set_hidden(source, kbs, false).await
}

async fn set_hidden(
    source: &dyn UpdateSource,
    kbs: &KbSet,
    hidden: bool,
) -> Result<HideReport, InstallError> {
    let mut report = HideReport::default();
    if kbs.is_empty() {
        return Ok(report);
    }

    source
        .connect()
        .await
        .map_err(InstallError::SessionCreateFailed)?;

    let criteria = if hidden {
        SearchCriteria::Visible
    } else {
        SearchCriteria::Hidden
    };
    let search = source
        .search(&criteria)
        .await
        .map_err(InstallError::SearchFailed)?;
    info!("Found {} candidate updates", search.candidates.len());

    let verb = if hidden { "hide" } else { "unhide" };
    for candidate in search
        .candidates
        .iter()
        .filter(|c| kbs.matches_any(&c.kb_ids))
    {
        info!("Attempting to {} update: {}", verb, candidate.title);
        match source.set_hidden(candidate, hidden).await {
            Ok(()) => report.changed.push(candidate.title.clone()),
            Err(e) => {
                error!("Failed to {} update {}: {}", verb, candidate.title, e);
                report.failed.push(candidate.title.clone());
            }
        }
    }

    Ok(report)
}
