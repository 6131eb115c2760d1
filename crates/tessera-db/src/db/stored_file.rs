use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tessera_core::models::StoredFile;
use tessera_core::AppError;
use uuid::Uuid;

const FILE_COLUMNS: &str = r#"
    id, uri, name, size, policy_id, storage_key, thumbnail_key, metadata, created_at, updated_at
"#;

#[async_trait]
pub trait FileRepository: Send + Sync {
    /// Fails with `Conflict` when another file already occupies the URI.
    async fn insert(&self, file: &StoredFile) -> Result<(), AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<StoredFile>, AppError>;

    async fn find_by_uri(&self, uri: &str) -> Result<Option<StoredFile>, AppError>;

    async fn delete(&self, id: Uuid) -> Result<bool, AppError>;

    async fn update_processing_result(
        &self,
        id: Uuid,
        thumbnail_key: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> Result<bool, AppError>;
}

#[derive(Clone)]
pub struct PostgresFileRepository {
    pool: PgPool,
}

impl PostgresFileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FileRepository for PostgresFileRepository {
    #[tracing::instrument(skip(self, file), fields(file_id = %file.id, uri = %file.uri))]
    async fn insert(&self, file: &StoredFile) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO stored_files (
                id, uri, name, size, policy_id, storage_key, thumbnail_key, metadata,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(file.id)
        .bind(&file.uri)
        .bind(&file.name)
        .bind(file.size)
        .bind(file.policy_id)
        .bind(&file.storage_key)
        .bind(&file.thumbnail_key)
        .bind(&file.metadata)
        .bind(file.created_at)
        .bind(file.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(AppError::Conflict(
                format!("A file already exists at {}", file.uri),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<StoredFile>, AppError> {
        let query = format!("SELECT {} FROM stored_files WHERE id = $1", FILE_COLUMNS);
        let file = sqlx::query_as::<_, StoredFile>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(file)
    }

    async fn find_by_uri(&self, uri: &str) -> Result<Option<StoredFile>, AppError> {
        let query = format!("SELECT {} FROM stored_files WHERE uri = $1", FILE_COLUMNS);
        let file = sqlx::query_as::<_, StoredFile>(&query)
            .bind(uri)
            .fetch_optional(&self.pool)
            .await?;

        Ok(file)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM stored_files WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_processing_result(
        &self,
        id: Uuid,
        thumbnail_key: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE stored_files
            SET thumbnail_key = COALESCE($2, thumbnail_key),
                metadata = COALESCE($3, metadata),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(thumbnail_key)
        .bind(metadata)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryFileRepository {
    files: Arc<Mutex<HashMap<Uuid, StoredFile>>>,
}

impl InMemoryFileRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, StoredFile>> {
        self.files.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl FileRepository for InMemoryFileRepository {
    async fn insert(&self, file: &StoredFile) -> Result<(), AppError> {
        let mut files = self.lock();
        if files.values().any(|f| f.uri == file.uri) {
            return Err(AppError::Conflict(format!(
                "A file already exists at {}",
                file.uri
            )));
        }
        files.insert(file.id, file.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<StoredFile>, AppError> {
        Ok(self.lock().get(&id).cloned())
    }

    async fn find_by_uri(&self, uri: &str) -> Result<Option<StoredFile>, AppError> {
        Ok(self.lock().values().find(|f| f.uri == uri).cloned())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        Ok(self.lock().remove(&id).is_some())
    }

    async fn update_processing_result(
        &self,
        id: Uuid,
        thumbnail_key: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> Result<bool, AppError> {
        let mut files = self.lock();
        let Some(file) = files.get_mut(&id) else {
            return Ok(false);
        };
        if let Some(key) = thumbnail_key {
            file.thumbnail_key = Some(key.to_string());
        }
        if metadata.is_some() {
            file.metadata = metadata;
        }
        file.updated_at = Utc::now();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(uri: &str) -> StoredFile {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let name = uri.rsplit('/').next().unwrap_or_default().to_string();
        StoredFile {
            id,
            uri: uri.to_string(),
            storage_key: format!("files/{}/{}", id, name),
            name,
            size: 42,
            policy_id: 1,
            thumbnail_key: None,
            metadata: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_uri_is_unique() {
        let repo = InMemoryFileRepository::new();
        repo.insert(&file("/a/photo.jpg")).await.unwrap();

        let err = repo.insert(&file("/a/photo.jpg")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(repo.insert(&file("/b/photo.jpg")).await.is_ok());
    }

    #[tokio::test]
    async fn test_find_and_delete() {
        let repo = InMemoryFileRepository::new();
        let f = file("/docs/report.pdf");
        repo.insert(&f).await.unwrap();

        let found = repo.find_by_uri("/docs/report.pdf").await.unwrap().unwrap();
        assert_eq!(found.id, f.id);
        assert!(repo.delete(f.id).await.unwrap());
        assert!(!repo.delete(f.id).await.unwrap());
        assert!(repo.find_by_uri("/docs/report.pdf").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_processing_result_keeps_existing_values() {
        let repo = InMemoryFileRepository::new();
        let f = file("/p/cat.png");
        repo.insert(&f).await.unwrap();

        repo.update_processing_result(f.id, Some("thumbnails/x.jpg"), None)
            .await
            .unwrap();
        repo.update_processing_result(f.id, None, Some(serde_json::json!({"exif": {}})))
            .await
            .unwrap();

        let stored = repo.get(f.id).await.unwrap().unwrap();
        assert_eq!(stored.thumbnail_key.as_deref(), Some("thumbnails/x.jpg"));
        assert!(stored.metadata.is_some());
        assert!(!repo
            .update_processing_result(Uuid::new_v4(), None, None)
            .await
            .unwrap());
    }
}
