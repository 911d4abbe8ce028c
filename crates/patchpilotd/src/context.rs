//! Agent context: the policy plus every collaborator, built once at start-up
//! and passed explicitly to whoever needs it.

use patchpilot_common::policy::SERVICE_NAME;
use patchpilot_common::Policy;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::install::InstallEngine;
use crate::notifier::{DesktopNotifier, Notifier};
use crate::power::{PowerControl, SystemPower};
use crate::reboot::{
    FileRebootStore, RebootLifecycle, RebootRequest, RebootSettings, RebootStore,
    REBOOT_QUEUE_CAPACITY,
};
use crate::source::{CatalogSource, UpdateSource};
use crate::window::{MaintenanceWindows, WindowClient};

/// External systems the agent talks to.
pub struct Collaborators {
    pub source: Arc<dyn UpdateSource>,
    pub power: Arc<dyn PowerControl>,
    pub store: Arc<dyn RebootStore>,
    pub notifier: Arc<dyn Notifier>,
    pub windows: Arc<dyn MaintenanceWindows>,
}

impl Collaborators {
    /// Production collaborators for `policy`.
    pub fn system(policy: &Policy) -> Self {
        Self {
            source: Arc::new(
                CatalogSource::new(policy.paths.catalog.clone(), policy.paths.state_dir.clone())
                    .with_servers(policy.update_servers.clone()),
            ),
            power: Arc::new(SystemPower::new()),
            store: Arc::new(FileRebootStore::new(policy.paths.state_dir.clone())),
            notifier: Arc::new(DesktopNotifier::new(SERVICE_NAME)),
            windows: Arc::new(WindowClient::new(policy.maintenance_window.port)),
        }
    }
}

pub struct AgentContext {
    pub policy: Arc<Policy>,
    pub source: Arc<dyn UpdateSource>,
    pub notifier: Arc<dyn Notifier>,
    pub windows: Arc<dyn MaintenanceWindows>,
    pub reboot: Arc<RebootLifecycle>,
    pub engine: Arc<InstallEngine>,
}

impl AgentContext {
    /// Wire the context. The returned receiver is the reboot request queue.
    pub fn new(policy: Policy, collaborators: Collaborators) -> (Self, mpsc::Receiver<RebootRequest>) {
        let policy = Arc::new(policy);
        let (reboot_tx, reboot_rx) = mpsc::channel(REBOOT_QUEUE_CAPACITY);

        let reboot = Arc::new(RebootLifecycle::new(
            collaborators.power,
            collaborators.store,
            Arc::clone(&collaborators.notifier),
            Arc::clone(&collaborators.windows),
            RebootSettings::from_policy(&policy),
            reboot_tx,
        ));
        let engine = Arc::new(InstallEngine::new(
            Arc::clone(&policy),
            Arc::clone(&collaborators.source),
            Arc::clone(&reboot),
        ));

        let ctx = Self {
            policy,
            source: collaborators.source,
            notifier: collaborators.notifier,
            windows: collaborators.windows,
            reboot,
            engine,
        };
        (ctx, reboot_rx)
    }

    pub fn system(policy: Policy) -> (Self, mpsc::Receiver<RebootRequest>) {
        let collaborators = Collaborators::system(&policy);
        Self::new(policy, collaborators)
    }
}
