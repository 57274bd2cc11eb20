//! HTTP retry client error types.

use http::StatusCode;
use thiserror::Error;

use crate::classify::AttemptFailure;
use crate::transport::{FailureKind, TransportError};

/// Result type for retrying HTTP client operations.
pub type Result<T> = std::result::Result<T, HttpRetryError>;

/// Errors surfaced to callers of the retrying clients.
///
/// Every variant produced by a request reports how many physical attempts
/// were made, so retries are never masked.
#[derive(Debug, Error)]
pub enum HttpRetryError {
    /// The server answered with a status that must not be retried.
    #[error("HTTP {status} after {attempts} attempt(s): {message}")]
    Status {
        /// HTTP status code.
        status: StatusCode,
        /// Response body (lossy UTF-8).
        message: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// Every attempt failed with a retriable outcome.
    #[error("Request failed after {attempts} attempts: {source}")]
    RetryExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last failure observed.
        #[source]
        source: AttemptFailure,
    },

    /// The transport failed in a way that must not be retried.
    #[error("Transport error after {attempts} attempt(s): {source}")]
    Transport {
        /// Number of attempts made.
        attempts: u32,
        /// Underlying transport failure.
        #[source]
        source: TransportError,
    },

    /// The client was used after `close()`.
    #[error("Client is closed, request rejected")]
    Closed,

    /// The caller cancelled the request.
    #[error("Request cancelled after {attempts} attempt(s)")]
    Cancelled {
        /// Number of attempts started before cancellation.
        attempts: u32,
    },

    /// Invalid client configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Request building error.
    #[error("Failed to build request: {0}")]
    RequestBuild(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// Response body is not valid UTF-8.
    #[error("Failed to decode response body: {0}")]
    Decode(String),
}

impl HttpRetryError {
    /// Number of physical attempts made, when the error came from a request.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Status { attempts, .. }
            | Self::RetryExhausted { attempts, .. }
            | Self::Transport { attempts, .. }
            | Self::Cancelled { attempts } => Some(*attempts),
            _ => None,
        }
    }

    /// Get the HTTP status code if the final failure was a response.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::RetryExhausted {
                source: AttemptFailure::Status(response),
                ..
            } => Some(response.status()),
            _ => None,
        }
    }

    /// Get the transport failure kind if the final failure was a transport error.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Transport { source, .. }
            | Self::RetryExhausted {
                source: AttemptFailure::Transport(source),
                ..
            } => Some(source.kind()),
            _ => None,
        }
    }

    /// Check if the final failure was a timeout of any kind.
    pub fn is_timeout(&self) -> bool {
        self.failure_kind().is_some_and(FailureKind::is_timeout)
    }

    /// Check if the client had already been closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Check if the request was cancelled by the caller.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Check if the retry budget was exhausted.
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }
}

impl From<url::ParseError> for HttpRetryError {
    fn from(e: url::ParseError) -> Self {
        Self::InvalidUrl(e.to_string())
    }
}
