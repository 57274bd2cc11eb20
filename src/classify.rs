//! Classify attempt results into retriable and terminal outcomes.

use http::{header, Method};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::warn;

use crate::retry_after::parse_retry_after;
use crate::status::RetriableStatusTable;
use crate::transport::{FailureKind, TransportError};
use crate::{HttpRetryError, Response};

/// Why a physical attempt did not produce a usable response.
#[derive(Debug, Error)]
pub enum AttemptFailure {
    /// The server answered with a non-success status.
    #[error("server responded with {}", .0.status())]
    Status(Response),
    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Result of classifying one physical attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// A 2xx/3xx response.
    Success(Response),
    /// A failure worth retrying, with an optional server-mandated wait.
    Retriable {
        /// The failure.
        failure: AttemptFailure,
        /// Wait dictated by `Retry-After`.
        server_wait: Option<Duration>,
    },
    /// A failure that must be surfaced immediately.
    Terminal(AttemptFailure),
}

impl AttemptOutcome {
    /// Check if this outcome may be retried.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Retriable { .. })
    }

    /// Convert a final outcome into the caller-visible result.
    pub(crate) fn into_result(self, attempts: u32) -> crate::Result<Response> {
        match self {
            Self::Success(response) => Ok(response),
            Self::Retriable { failure, .. } => Err(HttpRetryError::RetryExhausted {
                attempts,
                source: failure,
            }),
            Self::Terminal(AttemptFailure::Status(response)) => Err(HttpRetryError::Status {
                status: response.status(),
                message: response.text_lossy(),
                attempts,
            }),
            Self::Terminal(AttemptFailure::Transport(source)) => {
                Err(HttpRetryError::Transport { attempts, source })
            }
        }
    }
}

/// Check if a method may be repeated without additional side effects.
pub fn is_idempotent(method: &Method) -> bool {
    [Method::GET, Method::HEAD, Method::PUT, Method::DELETE, Method::OPTIONS].contains(method)
}

/// Maps attempt results onto [`AttemptOutcome`]s.
///
/// Non-idempotent methods are only retried when the failure happened before
/// any request bytes left the client.
#[derive(Debug, Clone, Default)]
pub struct RetryClassifier {
    table: RetriableStatusTable,
}

impl RetryClassifier {
    /// Create a classifier over a status table.
    pub fn new(table: RetriableStatusTable) -> Self {
        Self { table }
    }

    /// Get the status table.
    pub fn table(&self) -> &RetriableStatusTable {
        &self.table
    }

    /// Classify an attempt result using the current time for HTTP-date hints.
    pub fn classify(
        &self,
        method: &Method,
        result: Result<Response, TransportError>,
    ) -> AttemptOutcome {
        self.classify_at(method, result, SystemTime::now())
    }

    /// Classify an attempt result relative to `now`.
    pub fn classify_at(
        &self,
        method: &Method,
        result: Result<Response, TransportError>,
        now: SystemTime,
    ) -> AttemptOutcome {
        match result {
            Ok(response) => self.classify_response(method, response, now),
            Err(error) => self.classify_failure(method, error),
        }
    }

    fn classify_response(&self, method: &Method, response: Response, now: SystemTime) -> AttemptOutcome {
        let status = response.status();
        if status.is_success() || status.is_redirection() {
            return AttemptOutcome::Success(response);
        }

        let policy = self.table.get(status.as_u16());
        if !policy.retriable || !is_idempotent(method) {
            return AttemptOutcome::Terminal(AttemptFailure::Status(response));
        }

        let server_wait = if policy.honors_retry_after {
            retry_after_hint(&response, now)
        } else {
            None
        };

        AttemptOutcome::Retriable {
            failure: AttemptFailure::Status(response),
            server_wait,
        }
    }

    fn classify_failure(&self, method: &Method, error: TransportError) -> AttemptOutcome {
        let retriable = if error.is_committed() {
            is_idempotent(method) && is_retriable_kind(error.kind(), true)
        } else {
            is_retriable_kind(error.kind(), false)
        };

        if retriable {
            AttemptOutcome::Retriable {
                failure: AttemptFailure::Transport(error),
                server_wait: None,
            }
        } else {
            AttemptOutcome::Terminal(AttemptFailure::Transport(error))
        }
    }
}

/// Transport failure kinds retried for idempotent methods.
fn is_retriable_kind(kind: FailureKind, committed: bool) -> bool {
    match kind {
        FailureKind::ConnectTimeout
        | FailureKind::ReadTimeout
        | FailureKind::WriteTimeout
        | FailureKind::PoolTimeout
        | FailureKind::Connect
        | FailureKind::Network => true,
        FailureKind::Protocol => !committed,
        FailureKind::Other => false,
    }
}

fn retry_after_hint(response: &Response, now: SystemTime) -> Option<Duration> {
    let value = response.headers().get(header::RETRY_AFTER)?;
    let parsed = value
        .to_str()
        .map_err(|_| crate::retry_after::MalformedRetryAfter {
            value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
        })
        .and_then(|v| parse_retry_after(v, now));

    match parsed {
        Ok(wait) => Some(wait),
        Err(e) => {
            warn!(error = %e, status = %response.status(), "Ignoring Retry-After header");
            None
        }
    }
}
