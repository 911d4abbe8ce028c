//! Enforcement directives.
//!
//! Fleet tooling drops `*.json` files into the enforcement directory to force
//! updates to install, to hide them, or to exclude driver updates:
//!
//! ```json
//! { "required": ["4018073"], "hidden": ["1234567"],
//!   "excluded-drivers": [{"driver-class": "Net"}] }
//! ```
//!
//! Every file is read again on each aggregation. A bad file is skipped and
//! never poisons the aggregate.

use crate::driver_exclusion::DriverExclusionRule;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum EnforcementError {
    #[error("file is not json: {0}")]
    NotJson(PathBuf),

    #[error("file does not exist: {0}")]
    NotExist(PathBuf),

    #[error("could not parse {path}: {source}")]
    ParseFailure {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Directives from one file, or the de-duplicated union of many.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EnforcementSet {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub hidden: Vec<String>,
    #[serde(default)]
    pub excluded_drivers: Vec<DriverExclusionRule>,
}

impl EnforcementSet {
    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.hidden.is_empty() && self.excluded_drivers.is_empty()
    }

    /// Append another fragment without de-duplicating.
    pub fn extend(&mut self, other: EnforcementSet) {
        self.required.extend(other.required);
        self.hidden.extend(other.hidden);
        self.excluded_drivers.extend(other.excluded_drivers);
    }

    /// Remove duplicates from all three lists, keeping first-seen order.
    pub fn dedupe(&mut self) {
        dedupe_in_place(&mut self.required);
        dedupe_in_place(&mut self.hidden);
        dedupe_in_place(&mut self.excluded_drivers);
    }
}

fn dedupe_in_place<T: Eq + Hash + Clone>(items: &mut Vec<T>) {
    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
}

/// A file left out of an aggregation and why.
#[derive(Debug)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub error: EnforcementError,
}

/// Load a single directive file.
pub fn load_one(path: &Path) -> Result<EnforcementSet, EnforcementError> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        return Err(EnforcementError::NotJson(path.to_path_buf()));
    }
    if !path.exists() {
        return Err(EnforcementError::NotExist(path.to_path_buf()));
    }

    let data = fs::read_to_string(path).map_err(|source| EnforcementError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&data).map_err(|source| EnforcementError::ParseFailure {
        path: path.to_path_buf(),
        source,
    })
}

/// Aggregate every directive file in `dir` (non-recursive).
pub fn load_all(dir: &Path) -> std::io::Result<EnforcementSet> {
    load_all_with_skipped(dir).map(|(set, _)| set)
}

/// Like [`load_all`], also reporting which files were skipped.
///
/// Files are visited in name order so first-seen order is stable across runs.
pub fn load_all_with_skipped(dir: &Path) -> std::io::Result<(EnforcementSet, Vec<SkippedFile>)> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| !path.is_dir())
        .collect();
    paths.sort();

    let mut set = EnforcementSet::default();
    let mut skipped = Vec::new();

    for path in paths {
        match load_one(&path) {
            Ok(fragment) => {
                debug!("Loaded enforcement directives from {}", path.display());
                set.extend(fragment);
            }
            Err(error) => {
                warn!("Skipping enforcement file {}: {}", path.display(), error);
                skipped.push(SkippedFile { path, error });
            }
        }
    }

    set.dedupe();
    Ok((set, skipped))
}
