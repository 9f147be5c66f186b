use serde::Serialize;
use thiserror::Error;

use crate::model::SourceId;

/// Convenient result alias for the geonl library.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level library error type.
///
/// Upstream failures never surface here; they are recorded per source in the
/// aggregation result. Only conditions that make the whole call meaningless
/// are raised.
#[derive(Debug, Error)]
pub enum Error {
    /// The caller cancelled the call before it completed.
    #[error("call was cancelled")]
    Cancelled,

    /// Raised when a query or its parameters cannot be sent to any upstream.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Raised when an intent selects a source that has no registered adapter.
    #[error("no adapter registered for source {source_id}")]
    AdapterMissing { source_id: SourceId },

    /// Raised when a configuration value could not be parsed.
    #[error("invalid configuration value for {key}: {message}")]
    Config { key: String, message: String },

    /// Wrapper for HTTP client construction errors.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Wrapper for JSON errors.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Failure of a single adapter call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// Network, DNS or TLS failure.
    #[error("upstream unreachable: {0}")]
    Unreachable(String),

    /// The upstream explicitly throttled the request.
    #[error("upstream rate limited the request")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Non-2xx status or a payload that does not match the expected shape.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// The query matched nothing. Not a failure.
    #[error("query matched nothing")]
    NotFound,

    /// The attempt exceeded the source's timeout.
    #[error("upstream did not answer within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// The call was cancelled while this source was in flight.
    #[error("cancelled")]
    Cancelled,
}

/// Failure classification recorded in the per-source status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Unreachable,
    RateLimited,
    UpstreamError,
    NotFound,
    Timeout,
    Cancelled,
}

impl SourceError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SourceError::Unreachable(_) => FailureKind::Unreachable,
            SourceError::RateLimited { .. } => FailureKind::RateLimited,
            SourceError::Upstream(_) => FailureKind::UpstreamError,
            SourceError::NotFound => FailureKind::NotFound,
            SourceError::Timeout { .. } => FailureKind::Timeout,
            SourceError::Cancelled => FailureKind::Cancelled,
        }
    }

    /// Whether another attempt could plausibly succeed.
    ///
    /// Malformed or rejected responses will not change on retry, and an empty
    /// match is an answer, not a failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SourceError::Unreachable(_) | SourceError::RateLimited { .. } | SourceError::Timeout { .. }
        )
    }

    pub(crate) fn malformed(message: impl std::fmt::Display) -> Self {
        SourceError::Upstream(format!("malformed payload: {message}"))
    }
}
