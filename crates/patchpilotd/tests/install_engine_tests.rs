//! Install decision engine tests
//!
//! Every collaborator is a fake, so these runs touch only a temp directory.

use chrono::{Duration, Utc};
use patchpilot_common::{category, KbSet, Policy, Trigger, UpdateCandidate};
use patchpilotd::install::SkipReason;
use patchpilotd::notifier::{Notice, RecordingNotifier};
use patchpilotd::power::FakePower;
use patchpilotd::reboot::{MemoryRebootStore, RebootRequest, RebootStore};
use patchpilotd::source::FakeSource;
use patchpilotd::window::FakeWindows;
use patchpilotd::{
    AgentContext, Collaborators, InstallError, InstallReport, InstallRequest, RunOutcome,
};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;

struct Rig {
    _dir: TempDir,
    ctx: AgentContext,
    source: Arc<FakeSource>,
    power: Arc<FakePower>,
    store: Arc<MemoryRebootStore>,
    notifier: Arc<RecordingNotifier>,
    reboot_rx: mpsc::Receiver<RebootRequest>,
}

impl Rig {
    async fn run(&self, request: InstallRequest) -> Result<InstallReport, InstallError> {
        self.ctx.engine.run(request).await
    }
}

fn rig_with(source: FakeSource, pending: bool, tweak: impl FnOnce(&mut Policy)) -> Rig {
    let dir = TempDir::new().unwrap();
    let mut policy = Policy::default();
    policy.paths.state_dir = dir.path().join("state");
    policy.paths.enforcement_dir = dir.path().join("enforcement");
    policy.paths.hooks_dir = dir.path().join("hooks");
    fs::create_dir_all(&policy.paths.enforcement_dir).unwrap();
    fs::create_dir_all(&policy.paths.hooks_dir).unwrap();
    tweak(&mut policy);

    let source = Arc::new(source);
    let power = Arc::new(FakePower::new(pending));
    let store = Arc::new(MemoryRebootStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let (ctx, reboot_rx) = AgentContext::new(
        policy,
        Collaborators {
            source: source.clone(),
            power: power.clone(),
            store: store.clone(),
            notifier: notifier.clone(),
            windows: Arc::new(FakeWindows::new()),
        },
    );

    Rig {
        _dir: dir,
        ctx,
        source,
        power,
        store,
        notifier,
        reboot_rx,
    }
}

fn rig(source: FakeSource) -> Rig {
    rig_with(source, false, |_| {})
}

fn update(id: &str, category: &str, kb: &str, age_days: i64) -> UpdateCandidate {
    UpdateCandidate {
        update_id: id.to_string(),
        title: format!("Update {}", id),
        categories: vec![category.to_string()],
        kb_ids: vec![kb.to_string()],
        eula_accepted: true,
        driver_class: None,
        driver_version_date: None,
        last_deployment: Utc::now() - Duration::days(age_days),
        hidden: false,
    }
}

fn driver(id: &str, class: &str, age_days: i64) -> UpdateCandidate {
    UpdateCandidate {
        driver_class: Some(class.to_string()),
        ..update(id, category::DRIVERS, "", age_days)
    }
}

// ============================================================================
// Per-candidate isolation
// ============================================================================

#[tokio::test]
async fn test_one_failed_download_does_not_stop_the_run() {
    let source = FakeSource::new(vec![
        update("a", category::SECURITY, "1000001", 1),
        update("b", category::SECURITY, "1000002", 1),
        update("c", category::CRITICAL, "1000003", 1),
    ])
    .failing_download("b");
    let rig = rig(source);

    let report = rig.run(InstallRequest::new(Trigger::Default)).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.found, 3);
    assert_eq!(report.installed, vec!["Update a", "Update c"]);
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(
        &report.failures[0],
        InstallError::DownloadFailed { candidate, .. } if candidate == "Update b"
    ));
    assert_eq!(rig.source.calls_for("download"), vec!["a", "b", "c"]);
    assert_eq!(rig.source.calls_for("install"), vec!["a", "c"]);
}

#[tokio::test]
async fn test_failed_install_is_reported_per_candidate() {
    let source = FakeSource::new(vec![
        update("a", category::SECURITY, "1000001", 1),
        update("b", category::SECURITY, "1000002", 1),
    ])
    .failing_install("a");
    let rig = rig(source);

    let report = rig.run(InstallRequest::new(Trigger::Default)).await.unwrap();
    assert_eq!(report.installed, vec!["Update b"]);
    assert!(matches!(
        &report.failures[0],
        InstallError::InstallFailed { candidate, .. } if candidate == "Update a"
    ));
}

#[tokio::test]
async fn test_session_and_search_failures_end_the_run() {
    let rig_a = rig(FakeSource::new(vec![]).failing_connect());
    assert!(matches!(
        rig_a.run(InstallRequest::new(Trigger::Default)).await,
        Err(InstallError::SessionCreateFailed(_))
    ));

    let rig_b = rig(FakeSource::new(vec![]).failing_search());
    assert!(matches!(
        rig_b.run(InstallRequest::new(Trigger::Default)).await,
        Err(InstallError::SearchFailed(_))
    ));
}

// ============================================================================
// Filters
// ============================================================================

#[tokio::test]
async fn test_deadline_run_skips_recent_updates_and_drivers() {
    let source = FakeSource::new(vec![
        update("recent", category::SECURITY, "1000013", 13),
        update("past-deadline", category::SECURITY, "1000015", 15),
        driver("old-driver", "Net", 400),
    ]);
    let rig = rig_with(source, false, |p| {
        p.required_categories.push(category::DRIVERS.to_string())
    });

    let report = rig.run(InstallRequest::new(Trigger::Deadline)).await.unwrap();

    assert_eq!(report.installed, vec!["Update past-deadline"]);
    let reasons: Vec<_> = report.skipped.iter().map(|(_, r)| r.clone()).collect();
    assert!(matches!(reasons[0], SkipReason::DeadlineNotReached { days: 14, .. }));
    assert_eq!(reasons[1], SkipReason::DriverOnDeadlineRun);
}

#[tokio::test]
async fn test_deadline_only_flag_gates_any_trigger() {
    let source = FakeSource::new(vec![
        update("fresh", category::SECURITY, "1", 2),
        update("stale", category::SECURITY, "2", 20),
    ]);
    let rig = rig(source);

    let report = rig
        .run(InstallRequest::new(Trigger::Default).deadline_only(true))
        .await
        .unwrap();
    assert_eq!(report.installed, vec!["Update stale"]);
}

#[tokio::test]
async fn test_category_filter_follows_trigger() {
    let source = FakeSource::new(vec![
        update("sec", category::SECURITY, "1", 1),
        update("feature", "Feature Packs", "2", 1),
    ]);
    let rig = rig(source);

    let routine = rig.run(InstallRequest::new(Trigger::Default)).await.unwrap();
    assert_eq!(routine.installed, vec!["Update sec"]);
    assert!(matches!(
        routine.skipped[0].1,
        SkipReason::CategoryNotRequired { .. }
    ));

    let all = rig.run(InstallRequest::new(Trigger::All)).await.unwrap();
    assert_eq!(all.installed, vec!["Update feature"]);
}

#[tokio::test]
async fn test_manual_kbs_select_only_matching_updates() {
    let source = FakeSource::new(vec![
        update("a", "Feature Packs", "4018073", 0),
        update("b", category::SECURITY, "5000001", 0),
    ]);
    let rig = rig(source);

    let report = rig
        .run(InstallRequest::new(Trigger::ManualKbSet(KbSet::parse("KB4018073"))).interactive())
        .await
        .unwrap();
    assert_eq!(report.installed, vec!["Update a"]);
    assert!(matches!(
        report.skipped[0].1,
        SkipReason::KbNotRequested { .. }
    ));
}

#[tokio::test]
async fn test_driver_exclusions_are_read_each_run() {
    let source = FakeSource::new(vec![driver("net", "Net", 1), driver("gpu", "Display", 1)]);
    let rig = rig_with(source, false, |p| p.update_drivers = true);

    fs::write(
        rig.ctx.policy.paths.enforcement_dir.join("drivers.json"),
        r#"{"excluded-drivers":[{"driver-class":"Net","update-id":"ignored"}]}"#,
    )
    .unwrap();

    let report = rig.run(InstallRequest::new(Trigger::Drivers)).await.unwrap();
    assert_eq!(report.installed, vec!["Update gpu"]);
    assert!(matches!(
        report.skipped[0].1,
        SkipReason::DriverExcluded { .. }
    ));
}

#[tokio::test]
async fn test_unaccepted_eula_is_accepted_and_failure_is_not_fatal() {
    let mut a = update("a", category::SECURITY, "1", 1);
    a.eula_accepted = false;
    let mut b = update("b", category::SECURITY, "2", 1);
    b.eula_accepted = false;
    let rig = rig(FakeSource::new(vec![a, b]).failing_eula("b"));

    let report = rig.run(InstallRequest::new(Trigger::Default)).await.unwrap();
    assert_eq!(rig.source.calls_for("eula"), vec!["a", "b"]);
    assert_eq!(report.installed, vec!["Update a", "Update b"]);
}

// ============================================================================
// Gates
// ============================================================================

#[tokio::test]
async fn test_monthly_patches_toggle_only_gates_routine_runs() {
    let source = FakeSource::new(vec![update("a", category::SECURITY, "4018073", 1)]);
    let rig = rig_with(source, false, |p| p.install_monthly_patches = false);

    let routine = rig.run(InstallRequest::new(Trigger::Default)).await.unwrap();
    assert_eq!(routine.outcome, RunOutcome::Disabled);
    assert!(rig.source.calls().is_empty());

    let enforced = rig
        .run(InstallRequest::new(Trigger::Enforcement(KbSet::parse("4018073"))))
        .await
        .unwrap();
    assert_eq!(enforced.installed, vec!["Update a"]);
}

#[tokio::test]
async fn test_pending_unscheduled_reboot_skips_run() {
    let source = FakeSource::new(vec![update("a", category::SECURITY, "1", 1)]);
    let mut rig = rig_with(source, true, |_| {});

    let report = rig.run(InstallRequest::new(Trigger::Default)).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::RebootPending);
    assert!(rig.source.calls().is_empty());
    assert!(rig.reboot_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_pending_scheduled_reboot_is_requested() {
    let source = FakeSource::new(vec![update("a", category::SECURITY, "1", 1)]);
    let mut rig = rig_with(source, true, |_| {});
    rig.store
        .set_reboot_time(Utc::now() + Duration::hours(1))
        .await
        .unwrap();

    let report = rig.run(InstallRequest::new(Trigger::Default)).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::RebootPending);
    assert_eq!(rig.reboot_rx.try_recv().unwrap(), RebootRequest);
}

#[tokio::test]
async fn test_interactive_run_requests_reboot_when_pending() {
    let mut rig = rig_with(FakeSource::new(vec![]), true, |_| {});

    let report = rig
        .run(InstallRequest::new(Trigger::All).interactive())
        .await
        .unwrap();
    assert_eq!(report.outcome, RunOutcome::RebootPending);
    assert!(report.reboot_required);
    assert_eq!(rig.reboot_rx.try_recv().unwrap(), RebootRequest);
}

#[tokio::test]
async fn test_definitions_install_despite_pending_reboot() {
    let source = FakeSource::new(vec![update("def", category::DEFINITION, "2267602", 0)]);
    let rig = rig_with(source, true, |_| {});

    let report = rig
        .run(InstallRequest::new(Trigger::VirusDefinitions))
        .await
        .unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.installed, vec!["Update def"]);
}

// ============================================================================
// Reboot bookkeeping and hooks
// ============================================================================

#[tokio::test]
async fn test_reboot_required_updates_are_recorded_and_scheduled() {
    let source = FakeSource::new(vec![
        update("sec", category::SECURITY, "4018073", 1),
        update("def", category::DEFINITION, "2267602", 1),
    ])
    .requiring_reboot("sec")
    .requiring_reboot("def");
    let mut rig = rig(source);

    let before = Utc::now();
    let report = rig.run(InstallRequest::new(Trigger::Default)).await.unwrap();

    assert!(report.reboot_required);
    let at = report.reboot_time.unwrap();
    assert!(at >= before + Duration::seconds(21_600));

    let record = rig.store.load().await.unwrap();
    assert_eq!(record.updates, vec!["4018073"]);
    assert_eq!(record.reboot_time, Some(at));
    assert_eq!(rig.notifier.notices(), vec![Notice::RebootScheduled(at)]);
    assert_eq!(rig.reboot_rx.try_recv().unwrap(), RebootRequest);
    assert_eq!(rig.power.reboots(), 0);
}

#[tokio::test]
async fn test_definition_only_reboot_does_not_schedule() {
    let source = FakeSource::new(vec![update("def", category::DEFINITION, "2267602", 1)])
        .requiring_reboot("def");
    let rig = rig(source);

    let report = rig
        .run(InstallRequest::new(Trigger::VirusDefinitions))
        .await
        .unwrap();
    assert!(!report.reboot_required);
    assert_eq!(rig.store.load().await.unwrap().reboot_time, None);
}

#[tokio::test]
async fn test_hooks_run_once_around_non_definition_installs() {
    let source = FakeSource::new(vec![
        update("a", category::SECURITY, "1", 1),
        update("b", category::SECURITY, "2", 1),
    ]);
    let rig = rig(source);
    let hooks = &rig.ctx.policy.paths.hooks_dir;
    let log = hooks.join("hooks.log");
    fs::write(
        hooks.join("pre-update"),
        format!("echo pre >> {}\n", log.display()),
    )
    .unwrap();
    fs::write(
        hooks.join("post-update"),
        format!("echo post >> {}\nexit 1\n", log.display()),
    )
    .unwrap();

    let report = rig.run(InstallRequest::new(Trigger::Default)).await.unwrap();
    assert_eq!(report.installed.len(), 2);
    assert_eq!(fs::read_to_string(&log).unwrap(), "pre\npost\n");
}

#[tokio::test]
async fn test_definition_runs_skip_hooks() {
    let source = FakeSource::new(vec![update("def", category::DEFINITION, "2267602", 0)]);
    let rig = rig(source);
    let hooks = &rig.ctx.policy.paths.hooks_dir;
    let marker = hooks.join("ran");
    fs::write(
        hooks.join("pre-update"),
        format!("touch {}\n", marker.display()),
    )
    .unwrap();

    rig.run(InstallRequest::new(Trigger::VirusDefinitions))
        .await
        .unwrap();
    assert!(!marker.exists());
}
