//! API constants

/// API version segment used in every route
pub const API_VERSION: &str = "v0";

/// Versioned API path prefix
pub const API_PREFIX: &str = "/api/v0";

/// Content type recorded for assembled uploads
pub const UPLOAD_CONTENT_TYPE: &str = "application/octet-stream";
