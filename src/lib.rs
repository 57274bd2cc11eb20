//! # Armature HTTP Retry
//!
//! HTTP request execution with safe automatic retries, for async and
//! blocking code.
//!
//! ## Features
//!
//! - **Method-aware retries**: GET/HEAD/PUT/DELETE/OPTIONS retry transient
//!   failures; POST/PATCH only retry failures that happened before any bytes
//!   were sent, so side effects are never duplicated
//! - **Jittered exponential backoff**: `[0.8, 1.0) * 2^attempt` seconds
//! - **Retry-After**: integer seconds and HTTP-dates on 429 and 503
//! - **Attempt budget**: a fixed number of physical attempts per request
//! - **Connection pooling**: one pooled transport per client, released exactly once
//! - **Cancellation**: per-request `CancellationToken` support
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use armature_http_retry::{ClientConfig, RetryClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .base_url("https://api.example.com")
//!         .max_attempts(4)
//!         .build();
//!
//!     RetryClient::scoped(config, |client| async move {
//!         let response = client.get("/users").send().await?;
//!         println!("Status: {}", response.status());
//!         Ok(())
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Errors
//!
//! A request yields either a response, [`HttpRetryError::Status`] for the
//! first non-retriable status, [`HttpRetryError::Transport`] for a
//! non-retriable transport failure, or [`HttpRetryError::RetryExhausted`]
//! carrying the last failure and the number of attempts made.

mod attempt;
mod backoff;
mod blocking;
mod classify;
mod client;
mod config;
mod error;
mod pool;
mod request;
mod response;
mod retry_after;
mod status;
mod transport;

pub use attempt::{
    AsyncSleeper, AttemptContext, AttemptLoop, RetryDecision, Sleeper, ThreadSleeper, TokioSleeper,
};
pub use backoff::{BackoffPolicy, JITTER_RANGE};
pub use blocking::{BlockingRequestBuilder, BlockingRetryClient};
pub use classify::{is_idempotent, AttemptFailure, AttemptOutcome, RetryClassifier};
pub use client::RetryClient;
pub use config::{ClientConfig, ClientConfigBuilder, DEFAULT_ENV_PREFIX};
pub use error::{HttpRetryError, Result};
pub use pool::PooledHandle;
pub use request::RequestBuilder;
pub use response::Response;
pub use retry_after::{parse_retry_after, MalformedRetryAfter};
pub use status::{RetriableStatusTable, StatusPolicy};
pub use transport::{
    BlockingReqwestTransport, BlockingTransport, FailureKind, OutgoingRequest, ReqwestTransport,
    Transport, TransportError,
};

// Re-export common types
pub use bytes::Bytes;
pub use http::{header, HeaderMap, HeaderValue, Method, StatusCode};
pub use tokio_util::sync::CancellationToken;
pub use url::Url;

/// Prelude for common imports.
///
/// ```
/// use armature_http_retry::prelude::*;
/// ```
pub mod prelude {
    pub use crate::blocking::BlockingRetryClient;
    pub use crate::client::RetryClient;
    pub use crate::config::{ClientConfig, ClientConfigBuilder};
    pub use crate::error::{HttpRetryError, Result};
    pub use crate::response::Response;
    pub use crate::status::{RetriableStatusTable, StatusPolicy};
    pub use crate::transport::FailureKind;
    pub use http::{header, HeaderMap, HeaderValue, Method, StatusCode};
    pub use tokio_util::sync::CancellationToken;
}
