//! Listing of available updates.

use chrono::{DateTime, Duration, Utc};
use patchpilot_common::{criteria_for, find_exclusion, DriverExclusionRule, Policy, Trigger, UpdateCandidate};
use std::fmt;
use tracing::info;

use super::{load_driver_exclusions, InstallError};
use crate::source::UpdateSource;

/// A required update older than this many days means the device is not patched.
pub const PATCH_AGE_LIMIT_DAYS: i64 = 31;

#[derive(Debug, Clone, PartialEq)]
pub struct ListedUpdate {
    pub title: String,
    pub update_id: String,
}

impl ListedUpdate {
    pub fn render(&self, with_id: bool) -> String {
        if with_id {
            format!("{} | {}", self.title, self.update_id)
        } else {
            self.title.clone()
        }
    }
}

impl fmt::Display for ListedUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateListing {
    pub required: Vec<ListedUpdate>,
    pub optional: Vec<ListedUpdate>,
    /// No required update has been waiting longer than the age limit
    pub device_patched: bool,
}

impl UpdateListing {
    /// Split candidates into required and optional updates.
    ///
    /// Excluded drivers are dropped. Definition updates in a required
    /// category are not listed, since there always is one.
    pub fn classify(
        candidates: &[UpdateCandidate],
        exclusions: &[DriverExclusionRule],
        required_categories: &[String],
        now: DateTime<Utc>,
    ) -> Self {
        let mut listing = UpdateListing {
            required: Vec::new(),
            optional: Vec::new(),
            device_patched: true,
        };

        for candidate in candidates {
            if find_exclusion(exclusions, candidate).is_some() {
                info!("Driver update {} excluded from listing", candidate.title);
                continue;
            }

            let entry = ListedUpdate {
                title: candidate.title.clone(),
                update_id: candidate.update_id.clone(),
            };

            if !candidate.in_categories(required_categories) {
                listing.optional.push(entry);
                continue;
            }
            if candidate.is_definition_update() {
                continue;
            }
            if now - candidate.last_deployment > Duration::days(PATCH_AGE_LIMIT_DAYS) {
                listing.device_patched = false;
            }
            listing.required.push(entry);
        }

        listing
    }
}

/// Search the source and classify what is available.
pub async fn list_updates(
    source: &dyn UpdateSource,
    policy: &Policy,
    hidden: bool,
) -> Result<UpdateListing, InstallError> {
    source
        .connect()
        .await
        .map_err(InstallError::SessionCreateFailed)?;

    let (criteria, required) = criteria_for(&Trigger::ScheduledList { hidden }, policy);
    info!("Using search criteria: {}", criteria);
    let search = source
        .search(&criteria)
        .await
        .map_err(InstallError::SearchFailed)?;

    let exclusions = load_driver_exclusions(&policy.paths.enforcement_dir);
    Ok(UpdateListing::classify(
        &search.candidates,
        &exclusions,
        &required,
        Utc::now(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crate::source::FakeSource;
    use patchpilot_common::category;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
    }

    fn update(id: &str, category: &str, age_days: i64) -> UpdateCandidate {
        UpdateCandidate {
            update_id: id.to_string(),
            title: format!("Update {}", id),
            categories: vec![category.to_string()],
            kb_ids: vec![],
            eula_accepted: true,
            driver_class: None,
            driver_version_date: None,
            last_deployment: now() - Duration::days(age_days),
            hidden: false,
        }
    }

    #[test]
    fn test_required_optional_split() {
        let required = vec![
            category::CRITICAL.to_string(),
            category::DEFINITION.to_string(),
        ];
        let mut driver = update("drv", category::DRIVERS, 1);
        driver.driver_class = Some("Net".to_string());
        let candidates = vec![
            update("crit", category::CRITICAL, 3),
            update("def", category::DEFINITION, 1),
            update("feat", "Feature Packs", 90),
            driver,
        ];
        let rules = vec![DriverExclusionRule::for_class("Net")];

        let listing = UpdateListing::classify(&candidates, &rules, &required, now());
        assert_eq!(listing.required.len(), 1);
        assert_eq!(listing.required[0].update_id, "crit");
        assert_eq!(listing.optional.len(), 1);
        assert_eq!(listing.optional[0].render(true), "Update feat | feat");
        assert!(listing.device_patched);
    }

    #[tokio::test]
    async fn test_listing_searches_with_the_list_criteria() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut policy = Policy::default();
        policy.paths.enforcement_dir = dir.path().to_path_buf();
        policy.required_categories = vec![category::CRITICAL.to_string()];

        let mut hidden = update("hid", category::CRITICAL, 1);
        hidden.hidden = true;
        let source = FakeSource::new(vec![
            update("crit", category::CRITICAL, 1),
            update("sec", category::SECURITY, 1),
            hidden,
        ]);

        let listing = list_updates(&source, &policy, false).await.unwrap();
        let ids = |list: &[ListedUpdate]| {
            list.iter().map(|u| u.update_id.clone()).collect::<Vec<_>>()
        };
        assert_eq!(ids(&listing.required), vec!["crit"]);
        assert_eq!(ids(&listing.optional), vec!["sec"]);

        let listing = list_updates(&source, &policy, true).await.unwrap();
        assert_eq!(ids(&listing.required), vec!["hid"]);
        assert!(listing.optional.is_empty());
    }

    #[test]
    fn test_old_required_update_marks_device_unpatched() {
        let required = vec![category::SECURITY.to_string()];
        let on_the_limit = vec![update("a", category::SECURITY, 31)];
        assert!(UpdateListing::classify(&on_the_limit, &[], &required, now()).device_patched);

        let past_limit = vec![update("b", category::SECURITY, 32)];
        assert!(!UpdateListing::classify(&past_limit, &[], &required, now()).device_patched);
    }
}
