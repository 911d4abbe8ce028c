//! Driver exclusion rules.

use crate::candidate::UpdateCandidate;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use tracing::warn;

/// Date format used for driver version dates in directive files.
pub const DRIVER_DATE_FORMAT: &str = "%Y-%m-%d";

/// Fields as they appear in directive files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RuleFields {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    driver_class: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    driver_date_version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    update_id: String,
}

/// A directive excluding driver updates by class and/or version date.
///
/// Two rules are equal when they exclude the same drivers; the informational
/// update id does not take part.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "RuleFields", into = "RuleFields")]
pub struct DriverExclusionRule {
    driver_class: String,
    /// `YYYY-MM-DD`, compared for exact equality
    driver_date_version: String,
    /// Informational only; never used for matching
    update_id: String,
    /// `driver_date_version` parsed once at construction
    date: Option<NaiveDate>,
}

impl From<RuleFields> for DriverExclusionRule {
    fn from(fields: RuleFields) -> Self {
        Self::new(fields.driver_class, fields.driver_date_version, fields.update_id)
    }
}

impl From<DriverExclusionRule> for RuleFields {
    fn from(rule: DriverExclusionRule) -> Self {
        Self {
            driver_class: rule.driver_class,
            driver_date_version: rule.driver_date_version,
            update_id: rule.update_id,
        }
    }
}

impl PartialEq for DriverExclusionRule {
    fn eq(&self, other: &Self) -> bool {
        self.driver_class == other.driver_class
            && self.driver_date_version == other.driver_date_version
    }
}

impl Eq for DriverExclusionRule {}

impl Hash for DriverExclusionRule {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.driver_class.hash(state);
        self.driver_date_version.hash(state);
    }
}

/// Parse a rule's date. Malformed dates are logged and ignored.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    if raw.is_empty() {
        return None;
    }
    match NaiveDate::parse_from_str(raw.trim(), DRIVER_DATE_FORMAT) {
        Ok(date) => Some(date),
        Err(e) => {
            warn!(
                "Ignoring malformed driver date version {:?} in exclusion rule: {}",
                raw, e
            );
            None
        }
    }
}

impl DriverExclusionRule {
    pub fn new(
        driver_class: impl Into<String>,
        driver_date_version: impl Into<String>,
        update_id: impl Into<String>,
    ) -> Self {
        let driver_date_version = driver_date_version.into();
        let date = parse_date(&driver_date_version);
        Self {
            driver_class: driver_class.into(),
            driver_date_version,
            update_id: update_id.into(),
            date,
        }
    }

    pub fn for_class(class: &str) -> Self {
        Self::new(class, "", "")
    }

    pub fn for_date(date: &str) -> Self {
        Self::new("", date, "")
    }

    pub fn driver_class(&self) -> &str {
        &self.driver_class
    }

    pub fn driver_date_version(&self) -> &str {
        &self.driver_date_version
    }

    pub fn update_id(&self) -> &str {
        &self.update_id
    }

    /// Parsed date constraint; `None` when absent or malformed.
    pub fn date_constraint(&self) -> Option<NaiveDate> {
        self.date
    }

    /// True when this rule excludes `candidate`.
    ///
    /// A rule with neither a class nor a (valid) date is inert and matches nothing.
    pub fn matches(&self, candidate: &UpdateCandidate) -> bool {
        let active = !self.driver_class.is_empty() || self.date.is_some();
        if !active {
            return false;
        }

        let class_match = self.driver_class.is_empty()
            || candidate.driver_class.as_deref() == Some(self.driver_class.as_str());
        let date_match = match self.date {
            None => true,
            Some(d) => candidate.driver_version_date == Some(d),
        };

        class_match && date_match
    }
}

/// First rule in `rules` excluding `candidate`, if any.
pub fn find_exclusion<'a>(
    rules: &'a [DriverExclusionRule],
    candidate: &UpdateCandidate,
) -> Option<&'a DriverExclusionRule> {
    rules.iter().find(|rule| rule.matches(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn driver(class: Option<&str>, date: Option<&str>) -> UpdateCandidate {
        UpdateCandidate {
            update_id: "drv".to_string(),
            title: "Some driver".to_string(),
            categories: vec!["Drivers".to_string()],
            kb_ids: vec![],
            eula_accepted: true,
            driver_class: class.map(str::to_string),
            driver_version_date: date
                .map(|d| NaiveDate::parse_from_str(d, DRIVER_DATE_FORMAT).unwrap()),
            last_deployment: Utc::now(),
            hidden: false,
        }
    }

    #[test]
    fn test_inert_rule_never_matches() {
        let rule = DriverExclusionRule::default();
        assert!(!rule.matches(&driver(Some("Net"), Some("2023-01-01"))));
        assert!(!rule.matches(&driver(None, None)));
    }

    #[test]
    fn test_update_id_alone_is_inert() {
        let rule = DriverExclusionRule::new("", "", "abc");
        assert!(!rule.matches(&driver(Some("Net"), None)));
    }

    #[test]
    fn test_class_match_is_exact() {
        let rule = DriverExclusionRule::for_class("Net");
        assert!(rule.matches(&driver(Some("Net"), None)));
        assert!(rule.matches(&driver(Some("Net"), Some("2020-05-05"))));
        assert!(!rule.matches(&driver(Some("net"), None)));
        assert!(!rule.matches(&driver(Some("Display"), None)));
        assert!(!rule.matches(&driver(None, None)));
    }

    #[test]
    fn test_date_match_is_exact() {
        let rule = DriverExclusionRule::for_date("2023-01-01");
        assert!(rule.matches(&driver(Some("Net"), Some("2023-01-01"))));
        assert!(!rule.matches(&driver(Some("Net"), Some("2022-12-31"))));
        assert!(!rule.matches(&driver(Some("Net"), Some("2023-01-02"))));
        assert!(!rule.matches(&driver(Some("Net"), None)));
    }

    #[test]
    fn test_class_and_date_must_both_match() {
        let rule = DriverExclusionRule::new("Net", "2023-01-01", "");
        assert!(rule.matches(&driver(Some("Net"), Some("2023-01-01"))));
        assert!(!rule.matches(&driver(Some("Display"), Some("2023-01-01"))));
        assert!(!rule.matches(&driver(Some("Net"), Some("2023-02-01"))));
    }

    #[test]
    fn test_malformed_date_means_no_date_constraint() {
        let class_and_bad_date = DriverExclusionRule::new("Net", "01/01/2023", "");
        assert!(class_and_bad_date.date_constraint().is_none());
        assert!(class_and_bad_date.matches(&driver(Some("Net"), Some("2019-01-01"))));

        let only_bad_date = DriverExclusionRule::for_date("not-a-date");
        assert!(!only_bad_date.matches(&driver(Some("Net"), Some("2023-01-01"))));
    }

    #[test]
    fn test_find_exclusion_returns_first_match() {
        let rules = vec![
            DriverExclusionRule::for_class("Display"),
            DriverExclusionRule::for_class("Net"),
        ];
        let found = find_exclusion(&rules, &driver(Some("Net"), None));
        assert_eq!(found, Some(&rules[1]));
        assert!(find_exclusion(&rules, &driver(Some("Audio"), None)).is_none());
    }

    #[test]
    fn test_rule_json_keys() {
        let rule: DriverExclusionRule =
            serde_json::from_str(r#"{"driver-class":"Net","update-id":"1234"}"#).unwrap();
        assert_eq!(rule.driver_class(), "Net");
        assert_eq!(rule.update_id(), "1234");
        assert!(rule.driver_date_version().is_empty());

        let json = serde_json::to_string(&rule).unwrap();
        assert_eq!(json, r#"{"driver-class":"Net","update-id":"1234"}"#);
    }

    #[test]
    fn test_date_is_parsed_when_loaded() {
        let rule: DriverExclusionRule =
            serde_json::from_str(r#"{"driver-date-version":"2023-01-01"}"#).unwrap();
        assert_eq!(
            rule.date_constraint(),
            NaiveDate::from_ymd_opt(2023, 1, 1)
        );
        assert!(rule.matches(&driver(Some("Net"), Some("2023-01-01"))));
    }

    #[test]
    fn test_update_id_does_not_affect_equality() {
        let a = DriverExclusionRule::new("Net", "2023-01-01", "first");
        let b = DriverExclusionRule::new("Net", "2023-01-01", "second");
        assert_eq!(a, b);
        assert_ne!(a, DriverExclusionRule::new("Net", "", "first"));
    }
}
