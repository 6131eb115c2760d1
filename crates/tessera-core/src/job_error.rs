//! Processing job error types
//!
//! A job handler reports failure through [`JobError`]. The queue retries recoverable errors
//! under the job's backoff policy and fails unrecoverable ones on the spot.

use std::fmt;

#[derive(Debug)]
pub struct JobError {
    inner: anyhow::Error,
    recoverable: bool,
}

impl JobError {
    /// Error that will not go away on retry (missing executable, corrupt configuration).
    pub fn unrecoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: false,
        }
    }

    /// Transient error (storage hiccup, generator crash) retried with backoff.
    pub fn recoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: true,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }

    pub fn into_inner(self) -> anyhow::Error {
        self.inner
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.inner)
    }
}

impl std::error::Error for JobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        Self::recoverable(err)
    }
}

impl From<crate::AppError> for JobError {
    fn from(err: crate::AppError) -> Self {
        use crate::ErrorMetadata;

        let recoverable = err.is_recoverable();
        let inner = anyhow::Error::new(err);
        Self { inner, recoverable }
    }
}

pub trait JobResultExt<T> {
    /// Mark the error, if any, as unrecoverable
    fn unrecoverable(self) -> Result<T, JobError>;

    /// Mark the error, if any, as recoverable
    fn recoverable(self) -> Result<T, JobError>;
}

impl<T, E: Into<anyhow::Error>> JobResultExt<T> for Result<T, E> {
    fn unrecoverable(self) -> Result<T, JobError> {
        self.map_err(JobError::unrecoverable)
    }

    fn recoverable(self) -> Result<T, JobError> {
        self.map_err(JobError::recoverable)
    }
}
