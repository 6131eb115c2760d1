//! Thumbnail processing integration tests.
//!
//! Run with: `cargo test -p tessera-api --test processing_test`

mod helpers;

use axum_test::TestServer;
use bytes::Bytes;
use helpers::fixtures::create_test_png;
use helpers::{api_path, setup_test_app};
use serde_json::{json, Value};
use std::time::Duration;
use tessera_core::models::{
    JobStatus, ProcessingJob, RegenerateThumbnailResponse, SkipReason,
};
use tessera_db::FileRepository;
use uuid::Uuid;

/// Upload `data` to `uri` in a single chunk and return the stored file id.
async fn upload_file(client: &TestServer, uri: &str, data: &[u8]) -> Uuid {
    let response = client
        .post(&api_path("/uploads/sessions"))
        .json(&json!({ "uri": uri, "size": data.len(), "policy_id": 1 }))
        .await;
    assert_eq!(response.status_code(), 201, "{}", response.text());
    let session_id = response.json::<Value>()["session_id"]
        .as_str()
        .and_then(|s| s.parse::<Uuid>().ok())
        .expect("session id");

    let response = client
        .put(&api_path(&format!("/uploads/sessions/{}/chunks/0", session_id)))
        .bytes(Bytes::copy_from_slice(data))
        .await;
    assert_eq!(response.status_code(), 200, "{}", response.text());

    let response = client
        .post(&api_path(&format!("/uploads/sessions/{}/finalize", session_id)))
        .json(&json!({ "policy_id": 1, "size": data.len() }))
        .await;
    assert_eq!(response.status_code(), 200, "{}", response.text());
    response.json::<Value>()["file_id"]
        .as_str()
        .and_then(|s| s.parse::<Uuid>().ok())
        .expect("file id")
}

async fn regenerate(client: &TestServer, file_id: Uuid) -> RegenerateThumbnailResponse {
    let response = client
        .post(&api_path(&format!("/files/{}/thumbnail", file_id)))
        .await;
    assert_eq!(response.status_code(), 202, "{}", response.text());
    response.json::<RegenerateThumbnailResponse>()
}

/// Poll a job until it reaches a terminal status.
async fn wait_for_job(client: &TestServer, job_id: Uuid) -> ProcessingJob {
    for _ in 0..200 {
        let response = client.get(&api_path(&format!("/jobs/{}", job_id))).await;
        assert_eq!(response.status_code(), 200);
        let job = response.json::<ProcessingJob>();
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("job {} did not finish in time", job_id);
}

#[tokio::test]
async fn test_regenerate_thumbnail_for_png() {
    let app = setup_test_app().await;
    let client = app.client();

    let file_id = upload_file(client, "/photos/beach.png", &create_test_png(1200, 900)).await;

    let queued = regenerate(client, file_id).await;
    assert_eq!(queued.status, JobStatus::Queued);

    let job = wait_for_job(client, queued.job_id).await;
    assert_eq!(job.status, JobStatus::Succeeded, "{:?}", job.last_error);
    let result = job.result.expect("job result");
    assert_eq!(result["generator"], "builtin");
    assert_eq!(result["width"], 400);
    assert_eq!(result["height"], 300);

    let file = app
        .state
        .repositories
        .files
        .get(file_id)
        .await
        .unwrap()
        .unwrap();
    let thumbnail_key = file.thumbnail_key.expect("thumbnail key");
    assert_eq!(result["thumbnail_key"], thumbnail_key.as_str());
    assert!(std::path::Path::new(&app.state.config.local_storage_path)
        .join(&thumbnail_key)
        .exists());
}

#[tokio::test]
async fn test_direct_serve_format_is_skipped() {
    let app = setup_test_app().await;
    let client = app.client();

    let svg = br#"<svg xmlns="http://www.w3.org/2000/svg" width="10" height="10"/>"#;
    let file_id = upload_file(client, "/icons/logo.svg", svg).await;

    let job = wait_for_job(client, regenerate(client, file_id).await.job_id).await;
    assert_eq!(job.status, JobStatus::Skipped);
    assert_eq!(job.skip_reason, Some(SkipReason::DirectServe));
}

#[tokio::test]
async fn test_unsupported_format_has_no_generator() {
    let app = setup_test_app().await;
    let client = app.client();

    let file_id = upload_file(client, "/docs/notes.txt", b"plain text").await;

    let job = wait_for_job(client, regenerate(client, file_id).await.job_id).await;
    assert_eq!(job.status, JobStatus::Skipped);
    assert_eq!(job.skip_reason, Some(SkipReason::NoGeneratorApplicable));
}

#[tokio::test]
async fn test_corrupt_image_is_skipped_as_invalid_source() {
    let app = setup_test_app().await;
    let client = app.client();

    let file_id = upload_file(client, "/photos/broken.png", b"definitely not a png").await;

    let job = wait_for_job(client, regenerate(client, file_id).await.job_id).await;
    assert_eq!(job.status, JobStatus::Skipped);
    assert_eq!(job.skip_reason, Some(SkipReason::InvalidSource));
    assert_eq!(job.attempt, 0);
}

#[tokio::test]
async fn test_job_for_deleted_file_fails_without_retry() {
    let app = setup_test_app().await;
    let client = app.client();

    let job = app.state.queue.enqueue(Uuid::new_v4()).await.unwrap();

    let job = wait_for_job(client, job.id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempt, 0);
    assert!(job.last_error.is_some());
}

#[tokio::test]
async fn test_cancel_finished_job_leaves_it_unchanged() {
    let app = setup_test_app().await;
    let client = app.client();

    let file_id = upload_file(client, "/docs/readme.txt", b"hello").await;
    let job = wait_for_job(client, regenerate(client, file_id).await.job_id).await;

    let response = client.delete(&api_path(&format!("/jobs/{}", job.id))).await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.json::<ProcessingJob>().status, job.status);
}

#[tokio::test]
async fn test_unknown_file_and_job_are_not_found() {
    let app = setup_test_app().await;
    let client = app.client();

    let response = client
        .post(&api_path(&format!("/files/{}/thumbnail", Uuid::new_v4())))
        .await;
    assert_eq!(response.status_code(), 404);
    assert_eq!(response.json::<Value>()["code"], "NOT_FOUND");

    let response = client.get(&api_path(&format!("/jobs/{}", Uuid::new_v4()))).await;
    assert_eq!(response.status_code(), 404);

    let response = client.delete(&api_path(&format!("/jobs/{}", Uuid::new_v4()))).await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_health_and_openapi() {
    let app = setup_test_app().await;
    let client = app.client();

    let response = client.get("/health").await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.json::<Value>(), json!({ "status": "ok" }));

    let response = client.get(&api_path("/openapi.json")).await;
    assert_eq!(response.status_code(), 200);
    let spec = response.json::<Value>();
    assert!(spec["paths"]
        .as_object()
        .unwrap()
        .contains_key("/api/v0/uploads/sessions"));
}
