use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::extension_of;

/// A file produced by a completed upload session
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StoredFile {
    pub id: Uuid,
    pub uri: String,
    pub name: String,
    pub size: i64,
    pub policy_id: i32,
    pub storage_key: String,
    pub thumbnail_key: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredFile {
    /// Lowercase extension without the dot; empty when the name has none.
    pub fn extension(&self) -> String {
        extension_of(&self.name)
    }
}
