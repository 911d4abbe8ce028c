//! KB article matching.
//!
//! Update identifiers arrive in many spellings ("KB4018073", "kb4018073",
//! "4018073"). A [`KbSet`] normalizes them once so membership tests are
//! case- and prefix-insensitive.

use std::collections::HashSet;
use std::fmt;

/// Normalize a KB identifier: trim, lower-case, drop a leading "kb".
pub fn normalize_kb(id: &str) -> String {
    let lowered = id.trim().to_lowercase();
    match lowered.strip_prefix("kb") {
        Some(rest) => rest.trim().to_string(),
        None => lowered,
    }
}

/// Immutable set of requested KB identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KbSet {
    /// Ids as requested, for display
    requested: Vec<String>,
    /// Normalized ids used for lookups
    normalized: HashSet<String>,
}

impl KbSet {
    /// Build from a comma-separated list such as `"KB123,456"`.
    pub fn parse(list: &str) -> Self {
        Self::from_ids(list.split(','))
    }

    /// Build from individual identifiers. Blank entries are ignored.
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut requested = Vec::new();
        let mut normalized = HashSet::new();

        for id in ids {
            let id = id.as_ref().trim();
            if id.is_empty() {
                continue;
            }
            let key = normalize_kb(id);
            if key.is_empty() {
                continue;
            }
            requested.push(id.to_string());
            normalized.insert(key);
        }

        Self {
            requested,
            normalized,
        }
    }

    /// Number of requested ids.
    pub fn len(&self) -> usize {
        self.requested.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requested.is_empty()
    }

    /// True if any of `ids` is in the set. An empty set never matches.
    pub fn matches_any<S: AsRef<str>>(&self, ids: &[S]) -> bool {
        if self.normalized.is_empty() {
            return false;
        }
        ids.iter()
            .map(|id| normalize_kb(id.as_ref()))
            .any(|id| !id.is_empty() && self.normalized.contains(&id))
    }

    /// Ids in the order they were requested.
    pub fn ids(&self) -> &[String] {
        &self.requested
    }
}

impl fmt::Display for KbSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.requested.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_is_case_and_prefix_insensitive() {
        let cases: &[(&str, &[&str], bool)] = &[
            ("", &["KB123456"], false),
            ("KB987654,KB123456", &["KB123456"], true),
            ("KB987654", &["KB987654"], true),
            ("KB987654,KB123456", &["KB654321"], false),
            ("KB987654,KB123456", &[""], false),
            ("KB987654", &["kb987654"], true),
            ("123456", &["KB123456"], true),
            ("KB654321", &["654321"], true),
            ("KB123", &["123"], true),
            ("123", &["KB123"], true),
        ];

        for (list, query, expected) in cases {
            let set = KbSet::parse(list);
            assert_eq!(
                set.matches_any(query),
                *expected,
                "KbSet({:?}).matches_any({:?})",
                list,
                query
            );
        }
    }

    #[test]
    fn test_size() {
        assert_eq!(KbSet::parse("").len(), 0);
        assert_eq!(KbSet::parse("KB123456").len(), 1);
        assert_eq!(KbSet::parse("KB123456, KB987654").len(), 2);
        assert_eq!(KbSet::parse(" , ,").len(), 0);
    }

    #[test]
    fn test_empty_set_never_matches() {
        let set = KbSet::parse("");
        assert!(set.is_empty());
        assert!(!set.matches_any(&["KB1"]));
        assert!(!set.matches_any::<&str>(&[]));
    }

    #[test]
    fn test_display_keeps_requested_spelling() {
        assert_eq!(KbSet::parse("").to_string(), "[]");
        assert_eq!(KbSet::parse("KB123456").to_string(), "[KB123456]");
        assert_eq!(
            KbSet::parse("KB123456,kb987654").to_string(),
            "[KB123456 kb987654]"
        );
    }

    #[test]
    fn test_from_ids() {
        let set = KbSet::from_ids(vec!["4018073".to_string(), "KB67891011".to_string()]);
        assert_eq!(set.ids(), &["4018073", "KB67891011"]);
        assert!(set.matches_any(&["kb4018073"]));
        assert!(set.matches_any(&["67891011"]));
    }
}
