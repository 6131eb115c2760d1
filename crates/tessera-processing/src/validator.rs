use tessera_core::models::{extension_of, StoragePolicy};
use tessera_core::AppError;

/// Rejections raised before an upload session is created
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid target URI: {0}")]
    InvalidUri(String),

    #[error("File too large: {size} bytes (max: {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Invalid file extension: {extension} (allowed: {allowed:?})")]
    InvalidExtension {
        extension: String,
        allowed: Vec<String>,
    },

    #[error("Too many chunks: {count} (max: {max})")]
    TooManyChunks { count: u64, max: u64 },
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::FileTooLarge { .. } => AppError::PayloadTooLarge(err.to_string()),
            other => AppError::InvalidInput(other.to_string()),
        }
    }
}

/// Check a logical destination path and return its file name (the last segment).
///
/// URIs are absolute, `/`-separated, and may not contain empty, `.` or `..` segments,
/// backslashes or control characters.
pub fn validate_target_uri(uri: &str) -> Result<String, ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidUri(format!("{}: {}", reason, uri));

    let Some(path) = uri.strip_prefix('/') else {
        return Err(invalid("must start with '/'"));
    };
    if uri.contains('\\') || uri.chars().any(char::is_control) {
        return Err(invalid("contains forbidden characters"));
    }

    let segments: Vec<&str> = path.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(invalid("empty path segment"));
    }
    if segments.iter().any(|s| *s == "." || *s == "..") {
        return Err(invalid("relative path segment"));
    }

    match segments.last() {
        Some(name) => Ok(name.to_string()),
        None => Err(invalid("missing file name")),
    }
}

/// Size and extension limits of one storage policy
pub struct UploadValidator<'a> {
    policy: &'a StoragePolicy,
    max_chunk_count: u64,
}

impl<'a> UploadValidator<'a> {
    pub fn new(policy: &'a StoragePolicy, max_chunk_count: u64) -> Self {
        Self {
            policy,
            max_chunk_count,
        }
    }

    pub fn validate_file_size(&self, size: u64) -> Result<(), ValidationError> {
        if !self.policy.allows_size(size) {
            return Err(ValidationError::FileTooLarge {
                size,
                max: self.policy.max_size,
            });
        }
        Ok(())
    }

    pub fn validate_extension(&self, file_name: &str) -> Result<(), ValidationError> {
        let extension = extension_of(file_name);
        if !self.policy.allows_extension(&extension) {
            return Err(ValidationError::InvalidExtension {
                extension,
                allowed: self.policy.allowed_extensions.clone(),
            });
        }
        Ok(())
    }

    pub fn validate_chunk_count(&self, count: u64) -> Result<(), ValidationError> {
        if count > self.max_chunk_count {
            return Err(ValidationError::TooManyChunks {
                count,
                max: self.max_chunk_count,
            });
        }
        Ok(())
    }
}
