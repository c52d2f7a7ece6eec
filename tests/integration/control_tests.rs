//! Scheduler and control surface behavior with a live mock API

use crate::common::{page_body, Harness, FAVORITES_PATH};
use favorites_keeper::control::{ControlError, ControlSurface};
use favorites_keeper::crawler::{Scheduler, TickOutcome};
use favorites_keeper::state::{RunStatus, RunType};
use favorites_keeper::storage::{SqliteStorage, Storage};
use favorites_keeper::KeeperError;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

type Control = ControlSurface<SqliteStorage>;

fn control_for(harness: &Harness) -> (Arc<Scheduler<SqliteStorage>>, Control) {
    let scheduler = Arc::new(Scheduler::new(Arc::new(harness.orchestrator()), 3600));
    let control = ControlSurface::new(Arc::clone(&scheduler));
    (scheduler, control)
}

/// Every page answers slowly so a run stays active for a while
async fn mount_slow_pages(harness: &Harness) {
    Mock::given(method("GET"))
        .and(path(FAVORITES_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page_body(&[]))
                .set_delay(Duration::from_millis(400)),
        )
        .mount(&harness.server)
        .await;
}

#[tokio::test]
async fn test_manual_run_returns_id_before_finishing() {
    let harness = Harness::start("workers = 1").await;
    harness.mount_valid_profile().await;
    mount_slow_pages(&harness).await;
    let (scheduler, control) = control_for(&harness);

    let run_id = control.trigger_manual_run(None).unwrap();
    let opened = control.list_runs(Some(1)).unwrap();
    assert_eq!(opened[0].run_id, run_id);
    assert_eq!(opened[0].run_type, RunType::Manual);

    scheduler.wait_for_active_run().await;

    let finished = control.list_runs(Some(1)).unwrap();
    assert_eq!(finished[0].status, RunStatus::Success);
    assert!(!control.scheduler_status().run_active);
}

#[tokio::test]
async fn test_second_run_rejected_while_active() {
    let harness = Harness::start("workers = 1").await;
    harness.mount_valid_profile().await;
    mount_slow_pages(&harness).await;
    let (scheduler, control) = control_for(&harness);

    control.trigger_manual_run(None).unwrap();
    assert!(control.scheduler_status().run_active);

    let second = control.trigger_manual_run(Some(1));
    assert!(matches!(
        second,
        Err(KeeperError::Control(ControlError::RunActive))
    ));

    control.scheduler_start();
    assert!(matches!(scheduler.tick(), Ok(TickOutcome::SkippedOverlap)));

    scheduler.wait_for_active_run().await;
    assert_eq!(control.list_runs(None).unwrap().len(), 1);
}

#[tokio::test]
async fn test_scheduler_start_and_stop() {
    let harness = Harness::start("").await;
    let (scheduler, control) = control_for(&harness);

    let idle = control.scheduler_status();
    assert!(!idle.running);
    assert!(idle.next_run_at.is_none());
    assert!(matches!(scheduler.tick(), Ok(TickOutcome::Disarmed)));

    control.scheduler_start();
    let armed = control.scheduler_status();
    assert!(armed.running);
    assert_eq!(armed.interval_seconds, 3600);
    assert!(armed.next_run_at.is_some());

    control.scheduler_stop();
    assert!(!control.scheduler_status().running);
    assert!(control.list_runs(None).unwrap().is_empty());
}

#[tokio::test]
async fn test_scheduled_tick_runs_crawl() {
    let harness = Harness::start("workers = 1").await;
    harness.mount_valid_profile().await;
    harness.mount_page(1, &["1", "2"]).await;
    harness.mount_empty_tail().await;
    let (scheduler, control) = control_for(&harness);

    control.scheduler_start();
    let run_id = match scheduler.tick().unwrap() {
        TickOutcome::Started(run_id) => run_id,
        other => panic!("expected a started run, got {:?}", other),
    };
    scheduler.wait_for_active_run().await;

    let runs = control.list_runs(None).unwrap();
    assert_eq!(runs[0].run_id, run_id);
    assert_eq!(runs[0].run_type, RunType::Scheduled);
    assert_eq!(runs[0].items_count, 2);

    let log = control.get_run_log(run_id).unwrap();
    assert!(log.contains("Session valid for alice"));
}

#[tokio::test]
async fn test_unknown_run_log() {
    let harness = Harness::start("").await;
    let (_scheduler, control) = control_for(&harness);

    let result = control.get_run_log(999);
    assert!(matches!(
        result,
        Err(KeeperError::Control(ControlError::RunNotFound(999)))
    ));
}

#[tokio::test]
async fn test_interrupted_runs_recovered_on_startup() {
    let harness = Harness::start("").await;
    let stale = harness
        .storage
        .lock()
        .unwrap()
        .create_run(RunType::Scheduled, chrono::Utc::now(), "old-hash")
        .unwrap();

    let orchestrator = harness.orchestrator();
    assert_eq!(orchestrator.tracker().recover_interrupted().unwrap(), 1);

    let run = orchestrator.tracker().get_run(stale).unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(
        run.error_message.as_deref(),
        Some("interrupted by process exit")
    );
    assert!(orchestrator
        .tracker()
        .get_run_log(stale)
        .unwrap()
        .contains("interrupted"));
}
