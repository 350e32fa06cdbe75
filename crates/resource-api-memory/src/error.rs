use std::time::Duration;

use proven_resource_api::{MetadataError, ResourceApiError, ResourceApiErrorKind};
use thiserror::Error;

/// Errors returned by the in-memory resource API.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The resource or object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The write carried a stale resource version.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The server is shedding load.
    #[error("throttled: {message}")]
    Throttled {
        /// Human readable reason.
        message: String,

        /// Suggested delay before the next attempt.
        retry_after: Option<Duration>,
    },

    /// A transient failure.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The request was refused and will not succeed if repeated.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The object carried unreadable metadata.
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

impl ResourceApiError for Error {
    fn kind(&self) -> ResourceApiErrorKind {
        match self {
            Self::NotFound(_) => ResourceApiErrorKind::NotFound,
            Self::Conflict(_) => ResourceApiErrorKind::Conflict,
            Self::Throttled { .. } => ResourceApiErrorKind::Throttled,
            Self::Unavailable(_) => ResourceApiErrorKind::Transient,
            Self::Rejected(_) | Self::Metadata(_) => ResourceApiErrorKind::Other,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Throttled { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
