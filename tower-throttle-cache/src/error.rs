use std::time::Duration;

use throttle_cache::ErrorKind;
use throttle_cache::GatewayError;

/// Errors produced by the gateway service.
///
/// Unlike [`GatewayError`] this is `Clone`, so it can be inspected and
/// re-boxed freely once it has crossed a `BoxError` boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayRejection {
    /// The client identifier or resource key was missing.
    ///
    /// When the `axum` feature is enabled, this converts to `400 Bad Request`.
    #[error("Invalid request: {0}")]
    InvalidArgument(String),

    /// The client exceeded its quota.
    ///
    /// When the `axum` feature is enabled, this converts to
    /// `429 Too Many Requests` with a `Retry-After` header.
    #[error("Client is throttled; retry after {retry_after:?}")]
    Banned {
        /// The duration to wait before retrying.
        retry_after: Duration,
    },

    /// The resource store failed to produce the resource.
    ///
    /// When the `axum` feature is enabled, this converts to `502 Bad Gateway`.
    #[error("Resource fetch failed: {0}")]
    Fetch(String),

    /// The resource store rejected a write.
    ///
    /// When the `axum` feature is enabled, this converts to `502 Bad Gateway`.
    #[error("Resource upsert failed: {0}")]
    Upsert(String),
}

impl GatewayRejection {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Banned { .. } => ErrorKind::Banned,
            Self::Fetch(_) => ErrorKind::ExceptionDuringFetch,
            Self::Upsert(_) => ErrorKind::UpsertFailed,
        }
    }
}

impl From<GatewayError> for GatewayRejection {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InvalidArgument { field } => Self::InvalidArgument(format!("missing {field}")),
            GatewayError::Banned { retry_after } => Self::Banned { retry_after },
            GatewayError::ExceptionDuringFetch(err) => Self::Fetch(err.to_string()),
            GatewayError::UpsertFailed(err) => Self::Upsert(err.to_string()),
        }
    }
}

/// A store answered a request with the response meant for the other operation.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("store answered a {operation} request with the wrong response")]
pub struct UnexpectedStoreResponse {
    pub(crate) operation: &'static str,
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for GatewayRejection {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let (status, msg, headers) = match self {
            Self::InvalidArgument(_) => (StatusCode::BAD_REQUEST, self.to_string(), None),
            Self::Banned { retry_after } => {
                let secs = retry_after.as_secs().max(1);
                let val = axum::http::HeaderValue::from(secs);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    self.to_string(),
                    Some((axum::http::header::RETRY_AFTER, val)),
                )
            }
            Self::Fetch(_) | Self::Upsert(_) => (StatusCode::BAD_GATEWAY, self.to_string(), None),
        };

        let mut response = (status, msg).into_response();
        if let Some((name, value)) = headers {
            response.headers_mut().insert(name, value);
        }
        response
    }
}
