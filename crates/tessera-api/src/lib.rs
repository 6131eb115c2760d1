//! Tessera API Library
//!
//! HTTP handlers, the upload session manager, background services and application setup.

mod api_doc;
pub mod constants;
mod handlers;
pub mod services;
pub mod setup;
pub mod telemetry;

pub mod error;
pub mod state;

pub use error::{ErrorResponse, HttpAppError};
pub use services::{ExpirySweeper, MediaJobHandler, StorageResolver, UploadManager};
pub use state::AppState;
