//! patchpilot daemon library - exposes modules for testing and the CLI.

pub mod context;
pub mod hooks;
pub mod install;
pub mod notifier;
pub mod power;
pub mod reboot;
pub mod scheduler;
pub mod source;
pub mod watcher;
pub mod window;

pub use context::{AgentContext, Collaborators};
pub use install::{InstallEngine, InstallError, InstallReport, InstallRequest, RunOutcome};
pub use reboot::{RebootLifecycle, RebootState};
pub use scheduler::{Scheduler, SchedulerEvent};
