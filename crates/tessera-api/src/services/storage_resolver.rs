//! Storage backend lookup per storage policy

use std::collections::HashMap;
use std::sync::Arc;
use tessera_core::models::StoragePolicy;
use tessera_core::{AppError, StorageBackend};
use tessera_storage::Storage;

/// Blob backends available to this process, keyed by backend type
#[derive(Clone, Default)]
pub struct StorageResolver {
    backends: HashMap<StorageBackend, Arc<dyn Storage>>,
}

impl StorageResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `storage` under the backend type it reports
    pub fn with_backend(mut self, storage: Arc<dyn Storage>) -> Self {
        self.backends.insert(storage.backend_type(), storage);
        self
    }

    pub fn for_policy(&self, policy: &StoragePolicy) -> Result<Arc<dyn Storage>, AppError> {
        self.backends.get(&policy.backend).cloned().ok_or_else(|| {
            AppError::Internal(format!(
                "Storage backend '{}' for policy '{}' is not configured",
                policy.backend, policy.name
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_storage::LocalStorage;

    fn policy(backend: StorageBackend) -> StoragePolicy {
        StoragePolicy {
            id: 1,
            name: "default".to_string(),
            backend,
            max_size: 0,
            allowed_extensions: vec![],
            chunk_size: 1024,
        }
    }

    #[tokio::test]
    async fn test_resolves_registered_backend_only() {
        let dir = tempfile::tempdir().unwrap();
        let local: Arc<dyn Storage> = Arc::new(
            LocalStorage::new(dir.path(), "http://localhost/media".to_string())
                .await
                .unwrap(),
        );
        let resolver = StorageResolver::new().with_backend(local);

        assert!(resolver.for_policy(&policy(StorageBackend::Local)).is_ok());
        assert!(resolver.for_policy(&policy(StorageBackend::S3)).is_err());
    }
}
