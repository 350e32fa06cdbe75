use std::time::Duration;

use http::StatusCode;
use proven_resource_api::{ResourceApiError, ResourceApiErrorKind};
use thiserror::Error;

/// Errors that can occur when talking to the API server.
#[derive(Debug, Error)]
pub enum Error {
    /// The server answered with a non-success status.
    #[error("{status}: {message}")]
    Status {
        /// The HTTP status returned.
        status: StatusCode,

        /// The server's explanation, taken from the `Status` body when present.
        message: String,

        /// The `Retry-After` delay, if the server sent one.
        retry_after: Option<Duration>,
    },

    /// The request could not be sent or the response could not be read.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// A response body was not the JSON that was expected.
    #[error("invalid response body: {0}")]
    Json(#[from] serde_json::Error),

    /// A request URL could not be built.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// The bearer token cannot be sent as a header.
    #[error("invalid bearer token")]
    InvalidToken,
}

impl ResourceApiError for Error {
    fn kind(&self) -> ResourceApiErrorKind {
        match self {
            Self::Status { status, .. } => match *status {
                StatusCode::NOT_FOUND => ResourceApiErrorKind::NotFound,
                StatusCode::CONFLICT => ResourceApiErrorKind::Conflict,
                StatusCode::TOO_MANY_REQUESTS => ResourceApiErrorKind::Throttled,
                StatusCode::INTERNAL_SERVER_ERROR
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT => ResourceApiErrorKind::Transient,
                _ => ResourceApiErrorKind::Other,
            },
            Self::Request(e) if e.is_timeout() || e.is_connect() => {
                ResourceApiErrorKind::Transient
            }
            Self::Request(_) | Self::Json(_) | Self::Url(_) | Self::InvalidToken => {
                ResourceApiErrorKind::Other
            }
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
