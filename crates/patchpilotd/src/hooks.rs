//! Pre/post update hook scripts.
//!
//! Hooks are optional shell scripts in the hooks directory. A missing hook is
//! not an error; a failing or hung one is reported but never aborts a run.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    PreUpdate,
    PostUpdate,
}

impl HookKind {
    pub fn file_name(self) -> &'static str {
        match self {
            HookKind::PreUpdate => "pre-update",
            HookKind::PostUpdate => "post-update",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

#[derive(Error, Debug)]
pub enum HookError {
    #[error("{kind} hook could not be started: {source}")]
    Spawn {
        kind: HookKind,
        #[source]
        source: std::io::Error,
    },

    #[error("{kind} hook exited with {status}: {stderr}")]
    Failed {
        kind: HookKind,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("{kind} hook timed out after {timeout:?}")]
    TimedOut { kind: HookKind, timeout: Duration },
}

/// Hook runner bound to a directory and a timeout.
#[derive(Debug, Clone)]
pub struct Hooks {
    dir: PathBuf,
    timeout: Duration,
}

impl Hooks {
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            timeout,
        }
    }

    pub fn path(&self, kind: HookKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    /// Run a hook if present. Returns whether it ran.
    pub async fn run(&self, kind: HookKind) -> Result<bool, HookError> {
        let path = self.path(kind);
        if !path.is_file() {
            debug!("No {} hook at {}", kind, path.display());
            return Ok(false);
        }
        info!("Running {} hook {}", kind, path.display());
        run_script(kind, &path, self.timeout).await?;
        Ok(true)
    }
}

async fn run_script(kind: HookKind, path: &Path, timeout: Duration) -> Result<(), HookError> {
    let child = Command::new("sh").arg(path).kill_on_drop(true).output();

    let output = match tokio::time::timeout(timeout, child).await {
        Ok(result) => result.map_err(|source| HookError::Spawn { kind, source })?,
        Err(_) => return Err(HookError::TimedOut { kind, timeout }),
    };

    if !output.status.success() {
        return Err(HookError::Failed {
            kind,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}
