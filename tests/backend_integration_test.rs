mod common;

use basin_hydro::backend::Backend;
use basin_hydro::config::BackendConfig;
use basin_hydro::error::AppError;
use basin_hydro::jobs::{JobRegistry, JobState};
use basin_hydro::request::{build_requests, ExportRequest};
use common::sample_config;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TASKS: &str = "/projects/hydro-test/tasks";

fn backend_for(server: &MockServer) -> Backend {
    Backend::new(&BackendConfig {
        base_url: server.uri(),
        project: "hydro-test".to_string(),
        token: "test-token".to_string(),
        timeout_seconds: 5,
    })
    .expect("Failed to create backend")
}

fn requests() -> Vec<(String, ExportRequest)> {
    let dir = tempfile::tempdir().unwrap();
    build_requests(&sample_config(dir.path())).unwrap()
}

async fn mount_status(server: &MockServer, id: &str, state: &str, times: u64) {
    Mock::given(method("GET"))
        .and(path(format!("{}/{}", TASKS, id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "state": state })))
        .expect(times)
        .mount(server)
        .await;
}

/// Test that an export is posted with auth and its task id returned
#[tokio::test]
async fn test_start_export_returns_task_id() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(TASKS))
        .and(header("authorization", "Bearer test-token"))
        .and(body_partial_json(json!({
            "file_name_prefix": "test_basins",
            "file_format": "CSV",
            "table": { "kind": "basins" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "TASK-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let (_, basins) = &requests()[0];
    let id = backend.start_export(basins).await.unwrap();
    assert_eq!(id, "TASK-1");
}

/// Test that a non-success response surfaces status and body
#[tokio::test]
async fn test_start_export_reports_backend_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(TASKS))
        .respond_with(ResponseTemplate::new(400).set_body_string("max_pixels exceeded"))
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let (_, basins) = &requests()[0];
    match backend.start_export(basins).await.unwrap_err() {
        AppError::Backend { status, message } => {
            assert_eq!(status, 400);
            assert!(message.contains("max_pixels exceeded"));
        }
        e => panic!("Expected Backend error, got: {:?}", e),
    }
}

#[tokio::test]
async fn test_task_status_includes_error_message() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!("{}/TASK-9", TASKS)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "state": "FAILED",
            "error_message": "Computation timed out."
        })))
        .mount(&server)
        .await;

    let status = backend_for(&server).task_status("TASK-9").await.unwrap();
    assert_eq!(status.state, JobState::Failed);
    assert_eq!(status.error_message.as_deref(), Some("Computation timed out."));
}

/// Test that submitting the same run twice never starts a job twice
#[tokio::test]
async fn test_submit_all_never_submits_twice() {
    let server = MockServer::start().await;
    let requests = requests();

    Mock::given(method("POST"))
        .and(path(TASKS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "TASK" })))
        .expect(requests.len() as u64)
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let mut registry = JobRegistry::new();

    let first = registry.submit_all(&backend, &requests).await.unwrap();
    assert_eq!(first.submitted.len(), requests.len());
    assert!(first.skipped.is_empty());

    let second = registry.submit_all(&backend, &requests).await.unwrap();
    assert!(second.submitted.is_empty());
    assert_eq!(second.skipped.len(), requests.len());
    assert_eq!(registry.len(), requests.len());
    assert_eq!(registry.status("water"), Some(JobState::Pending));
}

/// Test that a failing submission keeps the jobs submitted before it
#[tokio::test]
async fn test_submit_all_keeps_earlier_jobs_on_error() {
    let server = MockServer::start().await;
    let requests = requests();

    Mock::given(method("POST"))
        .and(path(TASKS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "TASK-OK" })))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(TASKS))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let mut registry = JobRegistry::new();

    assert!(registry.submit_all(&backend, &requests).await.is_err());
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.get("basins").map(|j| j.id.as_str()), Some("TASK-OK"));
}

/// Test polling with out-of-order completion; terminal jobs are not queried again
#[tokio::test]
async fn test_poll_tolerates_out_of_order_completion() {
    let server = MockServer::start().await;
    let requests: Vec<_> = requests().into_iter().take(2).collect();

    Mock::given(method("POST"))
        .and(path(TASKS))
        .and(body_partial_json(json!({ "description": "test_basins" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "T-BASINS" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TASKS))
        .and(body_partial_json(json!({ "description": "test_water" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "T-WATER" })))
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let mut registry = JobRegistry::new();
    registry.submit_all(&backend, &requests).await.unwrap();

    // The later job finishes first and is only ever queried once
    mount_status(&server, "T-WATER", "COMPLETED", 1).await;
    Mock::given(method("GET"))
        .and(path(format!("{}/T-BASINS", TASKS)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "state": "RUNNING" })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_status(&server, "T-BASINS", "SUCCEEDED", 1).await;

    let first = registry.poll(&backend).await;
    assert_eq!(first.checked, 2);
    assert_eq!(registry.status("water"), Some(JobState::Completed));
    assert_eq!(registry.status("basins"), Some(JobState::Running));
    assert!(!registry.all_completed());

    let second = registry.poll(&backend).await;
    assert_eq!(second.checked, 1);
    assert_eq!(registry.status("basins"), Some(JobState::Completed));
    assert!(registry.all_completed());

    // Nothing left to query; polling again is a no-op
    let third = registry.poll(&backend).await;
    assert_eq!(third.checked, 0);
    assert_eq!(third.changed, 0);
}

/// Test that an unreachable status endpoint leaves the job state untouched
#[tokio::test]
async fn test_poll_keeps_state_when_status_unavailable() {
    let server = MockServer::start().await;
    let requests: Vec<_> = requests().into_iter().take(1).collect();

    Mock::given(method("POST"))
        .and(path(TASKS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "T-1" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{}/T-1", TASKS)))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let mut registry = JobRegistry::new();
    registry.submit_all(&backend, &requests).await.unwrap();

    let summary = registry.poll(&backend).await;
    assert_eq!(summary.unreachable, 1);
    assert_eq!(registry.status("basins"), Some(JobState::Pending));
}

/// Test that only failed jobs can be resubmitted
#[tokio::test]
async fn test_resubmit_only_failed_jobs() {
    let server = MockServer::start().await;
    let requests: Vec<_> = requests().into_iter().take(1).collect();
    let (name, request) = &requests[0];

    Mock::given(method("POST"))
        .and(path(TASKS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "T-1" })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TASKS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "T-2" })))
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    let mut registry = JobRegistry::new();

    assert!(matches!(
        registry.resubmit(&backend, name, request).await,
        Err(AppError::Job(_))
    ));

    registry.submit_all(&backend, &requests).await.unwrap();
    assert!(matches!(
        registry.resubmit(&backend, name, request).await,
        Err(AppError::Job(_))
    ));

    mount_status(&server, "T-1", "FAILED", 1).await;
    registry.poll(&backend).await;
    assert_eq!(registry.status(name), Some(JobState::Failed));
    assert!(registry.get(name).unwrap().error.is_some());

    let job = registry.resubmit(&backend, name, request).await.unwrap();
    assert_eq!(job.id, "T-2");
    assert_eq!(job.state, JobState::Pending);
    assert_eq!(registry.status(name), Some(JobState::Pending));
}
