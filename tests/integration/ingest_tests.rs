//! End-to-end runs of the ingestion pipeline against a mock API

use crate::common::{Harness, FAVORITES_PATH, PROFILE_PATH};
use favorites_keeper::crawler::RunRequest;
use favorites_keeper::state::{CrawlMode, CrawlState, RunStatus, StopReason};
use favorites_keeper::storage::Storage;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_first_run_archives_until_empty_page() {
    let harness = Harness::start("workers = 2").await;
    harness.mount_valid_profile().await;
    harness.mount_page(1, &["1", "2"]).await;
    harness.mount_page(2, &["3", "4"]).await;
    harness.mount_empty_tail().await;

    let report = harness
        .orchestrator()
        .run(RunRequest::scheduled())
        .await
        .unwrap();

    assert_eq!(report.run.status, RunStatus::Success);
    assert_eq!(report.run.items_count, 4);
    assert_eq!(report.state, CrawlState::Completed);
    assert_eq!(report.stop_reason, Some(StopReason::Exhausted));
    assert!(report.run.end_time.is_some());

    let storage = harness.storage.lock().unwrap();
    assert_eq!(storage.count_favorites().unwrap(), 4);

    let record = storage.get_favorite("3").unwrap().unwrap();
    assert_eq!(record.url, "https://weibo.example/7/M3");
    assert_eq!(record.mblogid, "M3");
    assert_eq!(record.created_at, "2024-03-05 10:00:00");
    assert_eq!(record.text, "post 3");
    assert_eq!(record.text_html, "<p>post 3</p>");
    assert_eq!(record.user_name, "bob");
    assert_eq!(record.links, vec!["https://example.com/3".to_string()]);

    let credential = storage.load_credential().unwrap().unwrap();
    assert!(credential.valid);
    assert_eq!(credential.user_name.as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_incremental_run_stops_at_stored_favorites() {
    let harness = Harness::start("workers = 1").await;
    harness.mount_valid_profile().await;
    harness.mount_page(1, &["1", "2"]).await;
    harness.mount_page(2, &["3", "4"]).await;
    harness.mount_empty_tail().await;

    let orchestrator = harness.orchestrator();
    orchestrator.run(RunRequest::scheduled()).await.unwrap();

    // One new favorite arrives at the top; older pages must not be fetched
    harness.server.reset().await;
    harness.mount_valid_profile().await;
    harness.mount_page(1, &["5", "1", "2"]).await;
    Mock::given(method("GET"))
        .and(path(FAVORITES_PATH))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&harness.server)
        .await;

    let report = orchestrator.run(RunRequest::scheduled()).await.unwrap();

    assert_eq!(report.run.status, RunStatus::Success);
    assert_eq!(report.run.items_count, 1);
    assert_eq!(report.stop_reason, Some(StopReason::CaughtUp));
    assert_eq!(harness.storage.lock().unwrap().count_favorites().unwrap(), 5);
    harness.server.verify().await;
}

#[tokio::test]
async fn test_full_scan_walks_past_stored_favorites() {
    let harness = Harness::start("workers = 1").await;
    harness.mount_valid_profile().await;
    harness.mount_page(1, &["1", "2"]).await;
    harness.mount_page(2, &["3"]).await;
    harness.mount_empty_tail().await;

    let orchestrator = harness.orchestrator();
    orchestrator.run(RunRequest::scheduled()).await.unwrap();

    harness.server.reset().await;
    harness.mount_valid_profile().await;
    harness.mount_page(1, &["1", "2"]).await;
    harness.mount_page(2, &["3", "9"]).await;
    harness.mount_empty_tail().await;

    let request = RunRequest::manual(None).with_mode(CrawlMode::FullScan);
    let report = orchestrator.run(request).await.unwrap();

    assert_eq!(report.run.status, RunStatus::Success);
    assert_eq!(report.run.items_count, 1);
    assert_eq!(report.stop_reason, Some(StopReason::Exhausted));
    assert!(harness
        .storage
        .lock()
        .unwrap()
        .contains_favorite("9")
        .unwrap());
}

#[tokio::test]
async fn test_manual_page_limit() {
    let harness = Harness::start("workers = 2").await;
    harness.mount_valid_profile().await;
    harness.mount_page(1, &["1"]).await;
    harness.mount_page(2, &["2"]).await;
    Mock::given(method("GET"))
        .and(path(FAVORITES_PATH))
        .and(query_param("page", "3"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&harness.server)
        .await;

    let report = harness
        .orchestrator()
        .run(RunRequest::manual(Some(2)))
        .await
        .unwrap();

    assert_eq!(report.run.status, RunStatus::Success);
    assert_eq!(report.run.items_count, 2);
    assert_eq!(report.stop_reason, Some(StopReason::PageLimit));
    harness.server.verify().await;
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let harness = Harness::start("workers = 1\nmax-attempts = 3").await;
    harness.mount_valid_profile().await;
    Mock::given(method("GET"))
        .and(path(FAVORITES_PATH))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&harness.server)
        .await;
    harness.mount_page(1, &["1", "2"]).await;
    harness.mount_empty_tail().await;

    let report = harness
        .orchestrator()
        .run(RunRequest::scheduled())
        .await
        .unwrap();

    assert_eq!(report.run.status, RunStatus::Success);
    assert_eq!(report.run.items_count, 2);
}

#[tokio::test]
async fn test_exhausted_retries_mark_run_warning() {
    let harness = Harness::start("workers = 1\nmax-attempts = 2").await;
    harness.mount_valid_profile().await;
    harness.mount_page(1, &["1"]).await;
    harness.mount_page_status(2, 503).await;
    harness.mount_page(3, &["3"]).await;
    harness.mount_empty_tail().await;

    let report = harness
        .orchestrator()
        .run(RunRequest::scheduled())
        .await
        .unwrap();

    assert_eq!(report.run.status, RunStatus::Warning);
    assert_eq!(report.run.items_count, 2);
    assert_eq!(report.stop_reason, Some(StopReason::Exhausted));

    let log = report.run.log_ref.clone();
    assert_eq!(log, format!("runs/run_{}.log", report.run.run_id));
}

#[tokio::test]
async fn test_malformed_page_stops_with_warning() {
    let harness = Harness::start("workers = 1").await;
    harness.mount_valid_profile().await;
    harness.mount_page(1, &["1"]).await;
    Mock::given(method("GET"))
        .and(path(FAVORITES_PATH))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":0,"msg":"busy"}"#))
        .mount(&harness.server)
        .await;
    harness.mount_empty_tail().await;

    let report = harness
        .orchestrator()
        .run(RunRequest::scheduled())
        .await
        .unwrap();

    assert_eq!(report.run.status, RunStatus::Warning);
    assert_eq!(report.run.items_count, 1);
    assert_eq!(report.stop_reason, Some(StopReason::MalformedPage));
    assert_eq!(report.state, CrawlState::Stopped);
}

#[tokio::test]
async fn test_auth_rejection_mid_run_fails_and_invalidates() {
    let harness = Harness::start("workers = 1").await;
    harness.mount_valid_profile().await;
    harness.mount_page(1, &["1"]).await;
    harness.mount_page_status(2, 401).await;
    harness.mount_empty_tail().await;

    let report = harness
        .orchestrator()
        .run(RunRequest::scheduled())
        .await
        .unwrap();

    assert_eq!(report.run.status, RunStatus::Failed);
    assert_eq!(report.state, CrawlState::Failed);
    assert_eq!(report.stop_reason, Some(StopReason::AuthRejected));
    assert_eq!(report.run.items_count, 1);
    assert!(report
        .run
        .error_message
        .as_deref()
        .unwrap()
        .contains("page 2"));

    let credential = harness.storage.lock().unwrap().load_credential().unwrap().unwrap();
    assert!(!credential.valid);
}

#[tokio::test]
async fn test_rejected_session_never_fetches_pages() {
    let harness = Harness::start("").await;
    Mock::given(method("GET"))
        .and(path(PROFILE_PATH))
        .respond_with(ResponseTemplate::new(401))
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path(FAVORITES_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&harness.server)
        .await;

    let orchestrator = harness.orchestrator();
    let report = orchestrator.run(RunRequest::scheduled()).await.unwrap();

    assert_eq!(report.run.status, RunStatus::Failed);
    assert_eq!(report.stop_reason, None);
    assert_eq!(
        report.run.error_message.as_deref(),
        Some("session credential rejected")
    );

    let log = orchestrator
        .tracker()
        .get_run_log(report.run.run_id)
        .unwrap();
    assert!(log.contains("ERROR session credential rejected"));
    harness.server.verify().await;
}

#[tokio::test]
async fn test_run_log_records_progress() {
    let harness = Harness::start("workers = 1").await;
    harness.mount_valid_profile().await;
    harness.mount_page(1, &["1"]).await;
    harness.mount_empty_tail().await;

    let orchestrator = harness.orchestrator();
    let report = orchestrator.run(RunRequest::scheduled()).await.unwrap();
    let log = orchestrator
        .tracker()
        .get_run_log(report.run.run_id)
        .unwrap();

    assert!(log.contains("Session valid for alice"));
    assert!(log.contains("INFO"));
    assert!(harness
        .dir
        .path()
        .join("logs")
        .join(&report.run.log_ref)
        .exists());
}
