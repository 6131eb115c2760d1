use serde::{Deserialize, Serialize};

use crate::storage_types::StorageBackend;

/// Storage backend selection plus the size and extension rules for an upload target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePolicy {
    pub id: i32,
    pub name: String,
    pub backend: StorageBackend,
    /// Maximum file size in bytes; 0 means unlimited.
    pub max_size: u64,
    /// Allowed extensions; empty means any.
    pub allowed_extensions: Vec<String>,
    pub chunk_size: u64,
}

impl StoragePolicy {
    pub fn allows_size(&self, size: u64) -> bool {
        self.max_size == 0 || size <= self.max_size
    }

    pub fn allows_extension(&self, extension: &str) -> bool {
        self.allowed_extensions.is_empty()
            || self
                .allowed_extensions
                .iter()
                .any(|e| e.eq_ignore_ascii_case(extension))
    }
}
