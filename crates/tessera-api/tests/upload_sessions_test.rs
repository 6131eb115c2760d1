//! Resumable upload session integration tests.
//!
//! Run with: `cargo test -p tessera-api --test upload_sessions_test`

mod helpers;

use axum_test::TestServer;
use bytes::Bytes;
use helpers::fixtures::patterned_bytes;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use helpers::{
    api_path, setup_test_app, setup_test_app_with, setup_test_app_with_repositories, MB,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tessera_api::setup::database::in_memory_repositories;
use tessera_api::state::Repositories;
use tessera_core::models::{
    CreateUploadSessionResponse, FinalizeUploadRequest, FinalizeUploadResponse, UploadChunk,
    UploadSession, UploadSessionProgress, UploadSessionStatus,
};
use tessera_core::AppError;
use tessera_db::{FileRepository, InMemoryUploadSessionRepository, UploadSessionRepository};
use tessera_storage::keys::chunk_key;
use uuid::Uuid;

async fn create_session(
    client: &TestServer,
    uri: &str,
    size: i64,
    overwrite: bool,
) -> CreateUploadSessionResponse {
    let response = client
        .post(&api_path("/uploads/sessions"))
        .json(&json!({ "uri": uri, "size": size, "policy_id": 1, "overwrite": overwrite }))
        .await;
    assert_eq!(response.status_code(), 201, "{}", response.text());
    response.json::<CreateUploadSessionResponse>()
}

async fn put_chunk(client: &TestServer, session_id: Uuid, index: u32, data: &[u8]) -> (u16, Value) {
    let response = client
        .put(&api_path(&format!(
            "/uploads/sessions/{}/chunks/{}",
            session_id, index
        )))
        .bytes(Bytes::copy_from_slice(data))
        .await;
    (response.status_code().as_u16(), response.json::<Value>())
}

async fn progress(client: &TestServer, session_id: Uuid) -> UploadSessionProgress {
    let response = client
        .get(&api_path(&format!("/uploads/sessions/{}", session_id)))
        .await;
    assert_eq!(response.status_code(), 200);
    response.json::<UploadSessionProgress>()
}

async fn finalize(client: &TestServer, session_id: Uuid, size: i64) -> (u16, Value) {
    let response = client
        .post(&api_path(&format!("/uploads/sessions/{}/finalize", session_id)))
        .json(&json!({ "policy_id": 1, "size": size }))
        .await;
    (response.status_code().as_u16(), response.json::<Value>())
}

#[tokio::test]
async fn test_out_of_order_chunks_finalize_into_original_bytes() {
    let app = setup_test_app().await;
    let client = app.client();

    let size = 10 * MB;
    let data = patterned_bytes(size as usize);
    let session = create_session(client, "/videos/2024/clip.bin", size, false).await;
    assert_eq!(session.chunk_size, 4 * MB);
    assert_eq!(session.expected_chunk_count, 3);

    let chunk = |i: usize| {
        let start = i * 4 * MB as usize;
        let end = (start + 4 * MB as usize).min(data.len());
        &data[start..end]
    };
    for index in [1u32, 0, 2] {
        let (status, body) = put_chunk(client, session.session_id, index, chunk(index as usize)).await;
        assert_eq!(status, 200, "{}", body);
        assert_eq!(body, json!({ "received": true }));
    }

    let state = progress(client, session.session_id).await;
    assert_eq!(state.status, UploadSessionStatus::ReadyToFinalize);
    assert_eq!(state.received_chunks, vec![0, 1, 2]);
    assert_eq!(state.total_size, size);

    let (status, body) = finalize(client, session.session_id, size).await;
    assert_eq!(status, 200, "{}", body);
    let finalized: FinalizeUploadResponse = serde_json::from_value(body).unwrap();
    assert_eq!(finalized.name, "clip.bin");
    assert_eq!(finalized.size, size);

    let file = app
        .state
        .repositories
        .files
        .find_by_uri("/videos/2024/clip.bin")
        .await
        .unwrap()
        .expect("stored file");
    assert_eq!(file.id, finalized.file_id);

    let blob = std::fs::read(
        std::path::Path::new(&app.state.config.local_storage_path).join(&file.storage_key),
    )
    .unwrap();
    assert!(blob == data, "assembled file differs from the uploaded bytes");

    assert_eq!(
        progress(client, session.session_id).await.status,
        UploadSessionStatus::Completed
    );
}

#[tokio::test]
async fn test_reuploading_a_chunk_is_idempotent() {
    let app = setup_test_app_with(|c| c.upload_chunk_size_bytes = 4).await;
    let client = app.client();

    let session = create_session(client, "/docs/a.txt", 10, false).await;
    assert_eq!(session.expected_chunk_count, 3);

    for _ in 0..2 {
        let (status, _) = put_chunk(client, session.session_id, 0, b"abcd").await;
        assert_eq!(status, 200);
    }

    let state = progress(client, session.session_id).await;
    assert_eq!(state.received_chunks, vec![0]);
    assert_eq!(state.status, UploadSessionStatus::Uploading);
}

#[tokio::test]
async fn test_chunk_with_wrong_size_or_index_is_rejected() {
    let app = setup_test_app_with(|c| c.upload_chunk_size_bytes = 4).await;
    let client = app.client();

    let session = create_session(client, "/docs/b.txt", 10, false).await;

    let (status, body) = put_chunk(client, session.session_id, 0, b"abc").await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "INVALID_CHUNK");

    // Last chunk is the 2-byte remainder.
    let (status, body) = put_chunk(client, session.session_id, 2, b"abcd").await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "INVALID_CHUNK");

    let (status, body) = put_chunk(client, session.session_id, 3, b"ab").await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "INVALID_CHUNK");
    assert_eq!(body["recoverable"], false);

    assert!(progress(client, session.session_id)
        .await
        .received_chunks
        .is_empty());
}

#[tokio::test]
async fn test_idle_session_expires_and_rejects_chunks() {
    let app = setup_test_app_with(|c| {
        c.upload_chunk_size_bytes = 4;
        c.upload_session_idle_timeout_secs = 1;
    })
    .await;
    let client = app.client();

    let session = create_session(client, "/docs/c.txt", 8, false).await;
    let (status, _) = put_chunk(client, session.session_id, 0, b"abcd").await;
    assert_eq!(status, 200);

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let (status, body) = put_chunk(client, session.session_id, 1, b"efgh").await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "INVALID_CHUNK");
    assert_eq!(
        progress(client, session.session_id).await.status,
        UploadSessionStatus::Expired
    );
}

#[tokio::test]
async fn test_expiry_sweep_expires_idle_sessions() {
    let app = setup_test_app_with(|c| {
        c.upload_session_idle_timeout_secs = 1;
        c.upload_expiry_sweep_interval_secs = 1;
    })
    .await;
    let client = app.client();

    let session = create_session(client, "/docs/d.txt", 8, false).await;
    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert_eq!(
        progress(client, session.session_id).await.status,
        UploadSessionStatus::Expired
    );
}

#[tokio::test]
async fn test_finalize_incomplete_session_conflicts() {
    let app = setup_test_app_with(|c| c.upload_chunk_size_bytes = 4).await;
    let client = app.client();

    let session = create_session(client, "/docs/e.txt", 8, false).await;
    put_chunk(client, session.session_id, 1, b"efgh").await;

    let (status, body) = finalize(client, session.session_id, 8).await;
    assert_eq!(status, 409);
    assert_eq!(body["code"], "CONFLICT");

    let (status, body) = finalize(client, session.session_id, 9).await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "INVALID_INPUT");

    assert_eq!(
        progress(client, session.session_id).await.status,
        UploadSessionStatus::Uploading
    );
}

#[tokio::test]
async fn test_empty_file_finalizes_without_chunks() {
    let app = setup_test_app().await;
    let client = app.client();

    let session = create_session(client, "/docs/empty.txt", 0, false).await;
    assert_eq!(session.expected_chunk_count, 0);

    let (status, body) = finalize(client, session.session_id, 0).await;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["size"], 0);
}

#[tokio::test]
async fn test_cancel_session() {
    let app = setup_test_app_with(|c| c.upload_chunk_size_bytes = 4).await;
    let client = app.client();

    let session = create_session(client, "/docs/f.txt", 8, false).await;
    put_chunk(client, session.session_id, 0, b"abcd").await;

    let response = client
        .delete(&api_path(&format!(
            "/uploads/sessions/{}?uri=/docs/other.txt",
            session.session_id
        )))
        .await;
    assert_eq!(response.status_code(), 400);
    assert_eq!(response.json::<Value>()["code"], "INVALID_INPUT");

    let response = client
        .delete(&api_path(&format!(
            "/uploads/sessions/{}?uri=/docs/f.txt",
            session.session_id
        )))
        .await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.json::<Value>(), json!({ "ok": true }));

    let state = progress(client, session.session_id).await;
    assert_eq!(state.status, UploadSessionStatus::Cancelled);
    assert!(state.received_chunks.is_empty());

    let (status, body) = put_chunk(client, session.session_id, 1, b"efgh").await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "INVALID_CHUNK");

    // Unknown sessions cancel cleanly.
    let response = client
        .delete(&api_path(&format!("/uploads/sessions/{}", Uuid::new_v4())))
        .await;
    assert_eq!(response.status_code(), 200);
}

#[tokio::test]
async fn test_existing_uri_requires_overwrite() {
    let app = setup_test_app().await;
    let client = app.client();

    let first = create_session(client, "/docs/g.txt", 5, false).await;
    put_chunk(client, first.session_id, 0, b"first").await;
    let (status, body) = finalize(client, first.session_id, 5).await;
    assert_eq!(status, 200);
    let first_file: FinalizeUploadResponse = serde_json::from_value(body).unwrap();

    let response = client
        .post(&api_path("/uploads/sessions"))
        .json(&json!({ "uri": "/docs/g.txt", "size": 6, "policy_id": 1 }))
        .await;
    assert_eq!(response.status_code(), 409);
    assert_eq!(response.json::<Value>()["code"], "CONFLICT");

    let second = create_session(client, "/docs/g.txt", 6, true).await;
    put_chunk(client, second.session_id, 0, b"second").await;
    let (status, body) = finalize(client, second.session_id, 6).await;
    assert_eq!(status, 200, "{}", body);

    let files = &app.state.repositories.files;
    assert!(files.get(first_file.file_id).await.unwrap().is_none());
    let current = files.find_by_uri("/docs/g.txt").await.unwrap().unwrap();
    assert_eq!(current.size, 6);
}

#[tokio::test]
async fn test_create_session_rejects_bad_requests() {
    let app = setup_test_app_with(|c| {
        c.policy_max_size_bytes = 100;
        c.policy_allowed_extensions = vec!["txt".to_string()];
    })
    .await;
    let client = app.client();

    let cases: [(Value, u16, &str); 6] = [
        (json!({ "uri": "relative/a.txt", "size": 1, "policy_id": 1 }), 400, "INVALID_INPUT"),
        (json!({ "uri": "/a/../b.txt", "size": 1, "policy_id": 1 }), 400, "INVALID_INPUT"),
        (json!({ "uri": "/a/b.exe", "size": 1, "policy_id": 1 }), 400, "INVALID_INPUT"),
        (json!({ "uri": "/a/b.txt", "size": 101, "policy_id": 1 }), 413, "PAYLOAD_TOO_LARGE"),
        (json!({ "uri": "/a/b.txt", "size": 1, "policy_id": 42 }), 404, "NOT_FOUND"),
        (json!({ "uri": "/a/b.txt" }), 400, "INVALID_INPUT"),
    ];

    for (body, status, code) in cases {
        let response = client.post(&api_path("/uploads/sessions")).json(&body).await;
        assert_eq!(response.status_code(), status, "{}", body);
        assert_eq!(response.json::<Value>()["code"], code, "{}", body);
    }
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let app = setup_test_app().await;
    let client = app.client();

    let response = client
        .get(&api_path(&format!("/uploads/sessions/{}", Uuid::new_v4())))
        .await;
    assert_eq!(response.status_code(), 404);
    assert_eq!(response.json::<Value>()["code"], "NOT_FOUND");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_chunk_uploads_lose_no_updates() {
    let app = setup_test_app_with(|c| c.upload_chunk_size_bytes = 4).await;
    let client = app.client();

    let chunks = 64u32;
    let data = patterned_bytes(chunks as usize * 4);
    let session = create_session(client, "/bulk/many.bin", data.len() as i64, false).await;

    let uploads: Vec<_> = (0..chunks)
        .map(|index| {
            let uploads = app.state.uploads.clone();
            let start = index as usize * 4;
            let body = Bytes::copy_from_slice(&data[start..start + 4]);
            tokio::spawn(async move { uploads.upload_chunk(session.session_id, index, body).await })
        })
        .collect();
    for upload in uploads {
        upload.await.unwrap().unwrap();
    }

    let state = progress(client, session.session_id).await;
    assert_eq!(state.received_chunks.len(), chunks as usize);
    assert_eq!(state.status, UploadSessionStatus::ReadyToFinalize);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_finalize_excludes_concurrent_chunk_uploads() {
    let app = setup_test_app_with(|c| c.upload_chunk_size_bytes = 1024).await;
    let client = app.client();

    let data = patterned_bytes(8 * 1024);
    let size = data.len() as i64;
    let session = create_session(client, "/race/final.bin", size, false).await;
    for index in 0..8u32 {
        let start = index as usize * 1024;
        let (status, body) =
            put_chunk(client, session.session_id, index, &data[start..start + 1024]).await;
        assert_eq!(status, 200, "{}", body);
    }

    let finalize = {
        let uploads = app.state.uploads.clone();
        tokio::spawn(async move {
            uploads
                .finalize(session.session_id, FinalizeUploadRequest { policy_id: 1, size })
                .await
        })
    };
    let reuploads: Vec<_> = (0..16u32)
        .map(|i| {
            let uploads = app.state.uploads.clone();
            let index = i % 8;
            let start = index as usize * 1024;
            let body = Bytes::copy_from_slice(&data[start..start + 1024]);
            tokio::spawn(async move { uploads.upload_chunk(session.session_id, index, body).await })
        })
        .collect();

    let file = finalize.await.unwrap().unwrap();
    for reupload in reuploads {
        match reupload.await.unwrap() {
            Ok(()) | Err(AppError::InvalidChunk(_)) => {}
            Err(e) => panic!("unexpected chunk error: {}", e),
        }
    }

    assert_eq!(
        progress(client, session.session_id).await.status,
        UploadSessionStatus::Completed
    );
    let blob = std::fs::read(
        std::path::Path::new(&app.state.config.local_storage_path).join(&file.storage_key),
    )
    .unwrap();
    assert!(blob == data, "assembled file differs from the uploaded bytes");
}

/// Session store whose `finalizing -> completed` write always fails.
struct FailingCompletion {
    inner: InMemoryUploadSessionRepository,
}

#[async_trait]
impl UploadSessionRepository for FailingCompletion {
    async fn create(&self, session: &UploadSession) -> Result<(), AppError> {
        self.inner.create(session).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<UploadSession>, AppError> {
        self.inner.get(id).await
    }

    async fn record_chunk(&self, chunk: &UploadChunk) -> Result<bool, AppError> {
        self.inner.record_chunk(chunk).await
    }

    async fn get_chunk(
        &self,
        session_id: Uuid,
        index: i32,
    ) -> Result<Option<UploadChunk>, AppError> {
        self.inner.get_chunk(session_id, index).await
    }

    async fn list_chunks(&self, session_id: Uuid) -> Result<Vec<UploadChunk>, AppError> {
        self.inner.list_chunks(session_id).await
    }

    async fn delete_chunks(&self, session_id: Uuid) -> Result<(), AppError> {
        self.inner.delete_chunks(session_id).await
    }

    async fn record_activity(
        &self,
        id: Uuid,
        status: UploadSessionStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        self.inner.record_activity(id, status, now).await
    }

    async fn transition(
        &self,
        id: Uuid,
        from: UploadSessionStatus,
        to: UploadSessionStatus,
    ) -> Result<bool, AppError> {
        self.inner.transition(id, from, to).await
    }

    async fn mark_completed(&self, _id: Uuid, _file_id: Uuid) -> Result<bool, AppError> {
        Err(AppError::Internal("connection reset".to_string()))
    }

    async fn mark_failed(&self, id: Uuid, error_message: &str) -> Result<bool, AppError> {
        self.inner.mark_failed(id, error_message).await
    }

    async fn cancel(&self, id: Uuid) -> Result<bool, AppError> {
        self.inner.cancel(id).await
    }

    async fn expire_idle(&self, cutoff: DateTime<Utc>) -> Result<Vec<UploadSession>, AppError> {
        self.inner.expire_idle(cutoff).await
    }
}

#[tokio::test]
async fn test_failed_completion_rolls_back_the_stored_file() {
    let repositories = Repositories {
        sessions: Arc::new(FailingCompletion {
            inner: InMemoryUploadSessionRepository::new(),
        }),
        ..in_memory_repositories()
    };
    let app =
        setup_test_app_with_repositories(|c| c.upload_chunk_size_bytes = 4, repositories).await;
    let client = app.client();

    let session = create_session(client, "/docs/rollback.txt", 8, false).await;
    put_chunk(client, session.session_id, 0, b"abcd").await;
    put_chunk(client, session.session_id, 1, b"efgh").await;

    let (status, body) = finalize(client, session.session_id, 8).await;
    assert_eq!(status, 500, "{}", body);

    assert_eq!(
        progress(client, session.session_id).await.status,
        UploadSessionStatus::Failed
    );
    assert!(app
        .state
        .repositories
        .files
        .find_by_uri("/docs/rollback.txt")
        .await
        .unwrap()
        .is_none());

    let files_dir = std::path::Path::new(&app.state.config.local_storage_path).join("files");
    let leftovers = std::fs::read_dir(&files_dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|dir| std::fs::read_dir(dir.path()).is_ok_and(|mut d| d.next().is_some()))
                .count()
        })
        .unwrap_or(0);
    assert_eq!(leftovers, 0, "assembled blob was left behind");

    let staged = std::path::Path::new(&app.state.config.chunk_staging_path)
        .join(chunk_key(session.session_id, 0));
    assert!(!staged.exists());

    // The lock entry went with the session.
    assert_eq!(app.state.uploads.locks().prune(), 0);
}
