use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Failure reported by a [`ResourceStore`](crate::ResourceStore).
pub type StoreError = Box<dyn Error + Send + Sync>;

/// A failed fetch, shared by every caller that was waiting on it.
#[derive(Debug, Clone)]
pub struct FetchError(Arc<StoreError>);

impl FetchError {
    /// The provider error that ended the fetch.
    pub fn store_error(&self) -> &(dyn Error + Send + Sync + 'static) {
        &**self.0
    }
}

impl From<StoreError> for FetchError {
    fn from(err: StoreError) -> Self {
        Self(Arc::new(err))
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Error for FetchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.store_error())
    }
}

/// Invalid throttle settings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("throttle interval must be longer than zero")]
    ZeroInterval,
}

/// The plain classification of a [`GatewayError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    Banned,
    ExceptionDuringFetch,
    UpsertFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::Banned => "banned",
            Self::ExceptionDuringFetch => "exception_during_fetch",
            Self::UpsertFailed => "upsert_failed",
        }
    }
}

/// Errors returned by the [`Gateway`](crate::Gateway).
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The client identifier or the resource key was empty.
    #[error("missing {field}")]
    InvalidArgument { field: &'static str },

    /// The client went over its quota for the current window.
    #[error("client is throttled; retry after {retry_after:?}")]
    Banned { retry_after: Duration },

    /// The resource store failed while fetching. Nothing was cached.
    #[error("resource fetch failed: {0}")]
    ExceptionDuringFetch(#[source] FetchError),

    /// The resource store rejected a write. The cache was left untouched.
    #[error("resource upsert failed: {0}")]
    UpsertFailed(#[source] StoreError),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::Banned { .. } => ErrorKind::Banned,
            Self::ExceptionDuringFetch(_) => ErrorKind::ExceptionDuringFetch,
            Self::UpsertFailed(_) => ErrorKind::UpsertFailed,
        }
    }
}

impl From<FetchError> for GatewayError {
    fn from(err: FetchError) -> Self {
        Self::ExceptionDuringFetch(err)
    }
}
