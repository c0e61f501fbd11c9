//! Store operations against the in-memory gateway: merging, sequencing,
//! in-flight flags and error recording.

use std::sync::Arc;
use std::time::Duration;

use crosscheck_client::{
    CheckType, ProcessingStatus, RemoteError, UploadFile, Verdict, WorkflowStage,
};
use crosscheck_core::testing::{self, Call, MockGateway};
use crosscheck_core::{Operation, SessionStore, StoreConfig};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn store_with(mock: &Arc<MockGateway>) -> SessionStore {
    SessionStore::new(mock.clone(), StoreConfig::default())
}

fn pdf(name: &str) -> UploadFile {
    UploadFile::new(name, "application/pdf", vec![0; 2048])
}

fn seeded(session_id: &str) -> Arc<MockGateway> {
    Arc::new(
        MockGateway::new()
            .with_session(testing::session(session_id))
            .with_file(testing::uploaded_file(
                "file-a",
                session_id,
                "traveler.pdf",
                ProcessingStatus::Completed,
            ))
            .with_file(testing::uploaded_file(
                "file-b",
                session_id,
                "board.jpg",
                ProcessingStatus::Completed,
            )),
    )
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_session_becomes_current_with_empty_scope() {
    let mock = seeded("s-1");
    let store = store_with(&mock);
    assert!(store.load_session("s-1").await);
    assert_eq!(store.snapshot().files().len(), 2);

    let created = store.create_session().await.expect("session created");

    let snap = store.snapshot();
    assert_eq!(snap.current_id.as_deref(), Some(created.id.as_str()));
    assert!(snap.files().is_empty());
    assert!(snap.validation_results().is_empty());
    assert!(snap.workflow_status().is_none());
    assert!(!snap.in_flight.is_creating());
    // The session it replaced is released.
    assert!(snap.scope("s-1").is_none());
    assert_eq!(snap.scopes.len(), 1);
}

#[tokio::test]
async fn load_session_merges_session_and_files_together() {
    let mock = seeded("s-1");
    let store = store_with(&mock);
    let rx = store.subscribe();

    assert!(store.load_session("s-1").await);

    let snap = store.snapshot();
    assert_eq!(snap.current_session().map(|s| s.id.as_str()), Some("s-1"));
    assert_eq!(snap.files().len(), 2);
    assert!(!snap.in_flight.is_loading());
    assert_eq!(mock.calls(Call::GetSession), 1);
    assert_eq!(mock.calls(Call::ListSessionFiles), 1);
    assert!(rx.has_changed().unwrap());
}

#[tokio::test]
async fn load_session_failure_merges_nothing() {
    let mock = seeded("s-1");
    let store = store_with(&mock);
    mock.fail(Call::ListSessionFiles, RemoteError::Timeout);

    assert!(!store.load_session("s-1").await);

    let snap = store.snapshot();
    assert!(snap.current_id.is_none());
    assert!(snap.scope("s-1").is_none());
    let error = snap.error.as_ref().expect("error recorded");
    assert_eq!(error.operation, Operation::LoadSession);
    assert_eq!(error.message, "Failed to load session");
    assert!(!snap.in_flight.any());
}

#[tokio::test]
async fn missing_session_reports_server_detail() {
    let mock = Arc::new(MockGateway::new());
    let store = store_with(&mock);

    assert!(!store.load_session("nope").await);

    let snap = store.snapshot();
    assert_eq!(snap.error_message(), Some("Session not found"));
    assert_eq!(snap.error.as_ref().and_then(|e| e.status_code), Some(404));
}

#[tokio::test]
async fn empty_id_is_refused_without_a_call() {
    let mock = Arc::new(MockGateway::new());
    let store = store_with(&mock);

    assert!(!store.load_session("  ").await);
    assert!(!store.run_analysis("").await);

    assert_eq!(mock.total_calls(), 0);
    assert!(store.snapshot().error.is_some());
}

#[tokio::test]
async fn history_listing_is_independent_of_current_session() {
    let mock = Arc::new(
        MockGateway::new()
            .with_session(testing::session("s-1"))
            .with_session(testing::session("s-2")),
    );
    let store = store_with(&mock);

    assert!(store.load_session("s-1").await);
    assert!(store.load_sessions().await);

    let snap = store.snapshot();
    assert_eq!(snap.sessions.len(), 2);
    assert_eq!(snap.sessions_total, 2);
    assert_eq!(snap.current_id.as_deref(), Some("s-1"));
    assert!(!snap.in_flight.is_listing());
}

#[tokio::test]
async fn delete_session_forgets_everything_about_it() {
    let mock = Arc::new(
        MockGateway::new()
            .with_session(testing::session("s-1"))
            .with_session(testing::session("s-2")),
    );
    let store = store_with(&mock);
    assert!(store.load_sessions().await);
    assert!(store.load_session("s-1").await);

    assert!(store.delete_session("s-1").await);

    let snap = store.snapshot();
    assert!(snap.current_id.is_none());
    assert!(snap.scope("s-1").is_none());
    assert_eq!(snap.sessions.len(), 1);
    assert_eq!(snap.sessions_total, 1);
    assert!(!snap.in_flight.is_deleting());
}

#[tokio::test]
async fn clear_session_keeps_history() {
    let mock = seeded("s-1");
    let store = store_with(&mock);
    assert!(store.load_sessions().await);
    assert!(store.load_session("s-1").await);
    store.set_error(Some("stale banner".into()));

    store.clear_session();

    let snap = store.snapshot();
    assert!(snap.current_id.is_none());
    assert!(snap.scopes.is_empty());
    assert!(snap.error.is_none());
    assert_eq!(snap.sessions.len(), 1);
}

// ---------------------------------------------------------------------------
// Sequencing
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn reloading_the_same_data_is_idempotent() {
    let mock = seeded("s-1");
    mock.script_stages("s-1", &[WorkflowStage::Validating]);
    let store = store_with(&mock);

    assert!(store.load_session("s-1").await);
    assert!(store.load_workflow_status("s-1").await);
    let first = store.snapshot();

    assert!(store.load_session("s-1").await);
    assert!(store.load_workflow_status("s-1").await);
    let second = store.snapshot();

    assert_eq!(*first, *second);
}

#[tokio::test(start_paused = true)]
async fn late_status_response_never_overwrites_newer_one() {
    let mock = seeded("s-1");
    mock.script_stages(
        "s-1",
        &[WorkflowStage::ProcessingFiles, WorkflowStage::Validating],
    );
    mock.delay(Call::WorkflowStatus, Duration::from_secs(3));
    let store = store_with(&mock);

    let (slow, fast) = tokio::join!(store.load_workflow_status("s-1"), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.load_workflow_status("s-1").await
    });

    assert!(slow && fast);
    let snap = store.snapshot();
    assert_eq!(
        snap.scope("s-1").and_then(|s| s.stage()),
        Some(WorkflowStage::Validating)
    );
    assert!(!snap.in_flight.is_loading_status());
}

#[tokio::test(start_paused = true)]
async fn later_selection_wins_over_slower_earlier_one() {
    let mock = Arc::new(
        MockGateway::new()
            .with_session(testing::session("s-1"))
            .with_session(testing::session("s-2")),
    );
    mock.delay(Call::GetSession, Duration::from_secs(2));
    let store = store_with(&mock);

    tokio::join!(store.load_session("s-1"), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.load_session("s-2").await
    });

    assert_eq!(store.snapshot().current_id.as_deref(), Some("s-2"));
}

#[tokio::test(start_paused = true)]
async fn slow_selection_keeps_other_sessions_status() {
    let mock = Arc::new(
        MockGateway::new()
            .with_session(testing::session("s-1"))
            .with_session(testing::session("s-2"))
            .with_file(testing::uploaded_file(
                "file-a",
                "s-1",
                "traveler.pdf",
                ProcessingStatus::Completed,
            )),
    );
    mock.script_stages("s-2", &[WorkflowStage::Validating]);
    mock.delay(Call::GetSession, Duration::from_secs(2));
    let store = store_with(&mock);

    let (loaded, status) = tokio::join!(store.load_session("s-1"), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let fetched = store.load_workflow_status("s-2").await;
        let snap = store.snapshot();
        assert!(snap.in_flight.is_loading());
        assert_eq!(snap.scope("s-2").and_then(|s| s.stage()), Some(WorkflowStage::Validating));
        fetched
    });
    assert!(loaded && status);

    let snap = store.snapshot();
    assert_eq!(snap.current_id.as_deref(), Some("s-1"));
    assert_eq!(snap.files().len(), 1);
    let other = snap.scope("s-2").expect("s-2 scope kept");
    assert_eq!(other.stage(), Some(WorkflowStage::Validating));
    assert!(other.session.is_none());
    assert!(other.files.is_empty());
}

#[tokio::test(start_paused = true)]
async fn stale_response_keeps_newer_error() {
    let mock = seeded("s-1");
    mock.script_stages("s-1", &[WorkflowStage::Validating]);
    mock.delay(Call::WorkflowStatus, Duration::from_secs(3));
    let store = store_with(&mock);

    let (slow, _) = tokio::join!(store.load_workflow_status("s-1"), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.load_workflow_status("s-1").await);
        store.set_error(Some("Upload a traveler first".into()));
    });

    assert!(slow);
    let snap = store.snapshot();
    assert_eq!(snap.error_message(), Some("Upload a traveler first"));
    assert_eq!(snap.scope("s-1").and_then(|s| s.stage()), Some(WorkflowStage::Validating));
}

#[tokio::test(start_paused = true)]
async fn response_for_cleared_session_is_discarded() {
    let mock = seeded("s-1");
    let store = store_with(&mock);
    assert!(store.load_session("s-1").await);
    mock.delay(Call::WorkflowStatus, Duration::from_secs(3));

    let pending = tokio::spawn({
        let store = store.clone();
        async move { store.load_workflow_status("s-1").await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    store.clear_session();
    pending.await.unwrap();

    let snap = store.snapshot();
    assert!(snap.scopes.is_empty());
    assert!(!snap.in_flight.any());
}

// ---------------------------------------------------------------------------
// In-flight flags
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn indicator_is_raised_while_request_runs() {
    let mock = seeded("s-1");
    mock.delay(Call::ValidationResults, Duration::from_secs(2));
    let store = store_with(&mock);

    let pending = tokio::spawn({
        let store = store.clone();
        async move { store.load_validation_results("s-1").await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(store.snapshot().in_flight.is_loading_results());

    assert!(pending.await.unwrap());
    assert!(!store.snapshot().in_flight.is_loading_results());
}

#[tokio::test(start_paused = true)]
async fn abandoned_call_lowers_its_indicator() {
    let mock = seeded("s-1");
    mock.delay(Call::ValidationResults, Duration::from_secs(5));
    let store = store_with(&mock);

    let outcome = tokio::time::timeout(
        Duration::from_secs(1),
        store.load_validation_results("s-1"),
    )
    .await;

    assert!(outcome.is_err());
    assert!(!store.snapshot().in_flight.any());
}

#[tokio::test]
async fn failure_lowers_indicator_and_records_error() {
    let mock = seeded("s-1");
    mock.fail(
        Call::UploadFiles,
        RemoteError::Api {
            status: 413,
            detail: Some("File too large".into()),
        },
    );
    let store = store_with(&mock);

    assert!(!store.upload_files("s-1", &[pdf("traveler.pdf")]).await);

    let snap = store.snapshot();
    assert!(!snap.in_flight.is_uploading());
    assert_eq!(snap.error_message(), Some("File too large"));
    assert_eq!(snap.error.as_ref().map(|e| e.operation), Some(Operation::UploadFiles));
}

#[tokio::test]
async fn successful_operation_clears_previous_error() {
    let mock = seeded("s-1");
    let store = store_with(&mock);
    mock.fail(Call::ValidationResults, RemoteError::Timeout);
    assert!(!store.load_validation_results("s-1").await);
    assert!(store.snapshot().error.is_some());

    mock.recover(Call::ValidationResults);
    assert!(store.load_validation_results("s-1").await);
    assert!(store.snapshot().error.is_none());
}

#[tokio::test]
async fn manual_error_can_be_set_and_cleared() {
    let store = store_with(&Arc::new(MockGateway::new()));

    store.set_error(Some("Pick at least one file".into()));
    let snap = store.snapshot();
    assert_eq!(snap.error_message(), Some("Pick at least one file"));
    assert_eq!(snap.error.as_ref().map(|e| e.operation), Some(Operation::Manual));

    store.clear_error();
    assert!(store.snapshot().error.is_none());
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_refreshes_authoritative_file_list() {
    let mock = Arc::new(MockGateway::new());
    let store = store_with(&mock);
    let session = store.create_session().await.expect("session");

    let batch = vec![
        pdf("traveler.pdf"),
        UploadFile::new("board.jpg", "image/jpeg", vec![0; 512]),
        UploadFile::new(
            "bom.xlsx",
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            vec![0; 256],
        ),
    ];
    assert!(store.upload_files(&session.id, &batch).await);

    let snap = store.snapshot();
    assert_eq!(snap.files().len(), 3);
    assert!(snap
        .files()
        .iter()
        .all(|f| f.processing_status == ProcessingStatus::Pending));
    assert_eq!(mock.calls(Call::ListSessionFiles), 1);
}

#[tokio::test]
async fn invalid_selection_is_refused_before_any_call() {
    let mock = seeded("s-1");
    let store = store_with(&mock);

    assert!(!store.upload_files("s-1", &[]).await);
    let too_many: Vec<UploadFile> = (0..11).map(|i| pdf(&format!("t{i}.pdf"))).collect();
    assert!(!store.upload_files("s-1", &too_many).await);
    let unsupported = UploadFile::new("notes.txt", "text/plain", vec![1]);
    assert!(!store.upload_files("s-1", &[unsupported]).await);

    assert_eq!(mock.calls(Call::UploadFiles), 0);
    let snap = store.snapshot();
    assert_eq!(snap.error.as_ref().map(|e| e.operation), Some(Operation::UploadFiles));
    assert!(!snap.in_flight.is_uploading());
}

#[tokio::test]
async fn upload_succeeds_even_if_refresh_fails() {
    let mock = seeded("s-1");
    let store = store_with(&mock);
    mock.fail(Call::ListSessionFiles, RemoteError::Network("connection reset".into()));

    assert!(store.upload_files("s-1", &[pdf("extra.pdf")]).await);

    let snap = store.snapshot();
    assert_eq!(snap.error.as_ref().map(|e| e.operation), Some(Operation::LoadFiles));
    assert!(!snap.in_flight.is_uploading());
    assert_eq!(mock.stored_files("s-1").len(), 3);
}

#[tokio::test]
async fn file_being_processed_cannot_be_deleted() {
    let mock = Arc::new(
        MockGateway::new()
            .with_session(testing::session("s-1"))
            .with_file(testing::uploaded_file(
                "file-a",
                "s-1",
                "traveler.pdf",
                ProcessingStatus::Processing,
            )),
    );
    let store = store_with(&mock);
    assert!(store.load_session("s-1").await);

    assert!(!store.delete_file("file-a").await);

    assert_eq!(mock.calls(Call::DeleteFile), 0);
    let snap = store.snapshot();
    assert_eq!(snap.files().len(), 1);
    assert!(snap
        .error_message()
        .is_some_and(|m| m.contains("still being processed")));

    mock.set_file_status("file-a", ProcessingStatus::Completed);
    assert!(store.load_session("s-1").await);
    assert!(store.delete_file("file-a").await);

    assert_eq!(mock.calls(Call::DeleteFile), 1);
    let snap = store.snapshot();
    assert!(snap.files().is_empty());
    assert!(snap.error.is_none());
    assert!(!snap.in_flight.is_deleting());
}

#[tokio::test]
async fn load_file_replaces_single_entry() {
    let mock = seeded("s-1");
    let store = store_with(&mock);
    assert!(store.load_session("s-1").await);

    mock.set_file_status("file-b", ProcessingStatus::Failed);
    assert!(store.load_file("file-b").await);

    let snap = store.snapshot();
    assert_eq!(snap.files().len(), 2);
    assert!(snap.has_failed_files());
    assert!(snap.can_retry());
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn results_summary_and_clear() {
    let mock = Arc::new(
        MockGateway::new()
            .with_session(testing::session("s-1"))
            .with_results(
                "s-1",
                vec![
                    testing::validation_result("r-1", "s-1", CheckType::JobNumber, Verdict::Pass),
                    testing::validation_result("r-2", "s-1", CheckType::PartNumber, Verdict::Fail),
                    testing::validation_result("r-3", "s-1", CheckType::Revision, Verdict::Warning),
                ],
            ),
    );
    let store = store_with(&mock);
    assert!(store.load_session("s-1").await);

    assert!(store.load_validation_results("s-1").await);
    assert!(store.load_validation_summary("s-1").await);
    let snap = store.snapshot();
    let scope = snap.current().expect("current scope");
    let counts = scope.result_counts();
    assert_eq!((counts.pass, counts.warning, counts.fail), (1, 1, 1));
    assert_eq!(scope.validation_summary.as_ref().map(|s| s.total_checks), Some(3));

    assert!(store.clear_validation_results("s-1").await);
    let snap = store.snapshot();
    assert!(snap.validation_results().is_empty());
    assert!(snap.current().is_some_and(|s| s.validation_summary.is_none()));
}

#[tokio::test]
async fn analyze_now_refreshes_status_and_results() {
    let mock = Arc::new(
        MockGateway::new()
            .with_session(testing::session("s-1"))
            .with_results(
                "s-1",
                vec![testing::validation_result(
                    "r-1",
                    "s-1",
                    CheckType::BoardSerial,
                    Verdict::Pass,
                )],
            ),
    );
    let store = store_with(&mock);
    assert!(store.load_session("s-1").await);

    assert!(store.analyze_now("s-1").await);

    let snap = store.snapshot();
    assert_eq!(snap.stage(), Some(WorkflowStage::Completed));
    assert_eq!(snap.validation_results().len(), 1);
    assert!(!snap.is_analyzing());
    assert!(!store.is_polling("s-1"));
}
