//! Transport seam between the retry engine and the HTTP stack.
//!
//! The engine only needs one operation from a transport: send a fully
//! described request once and report either a buffered [`Response`] or a
//! [`TransportError`] whose [`FailureKind`] tells timeouts, connect failures
//! and protocol errors apart. The default implementations delegate to
//! `reqwest`; anything else (test doubles, other stacks) can implement
//! [`Transport`] or [`BlockingTransport`].

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::pool::{AsyncGate, BlockingGate};
use crate::{ClientConfig, HttpRetryError, Response, Result};

/// A request ready to be sent, replayable across attempts.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute request URL.
    pub url: url::Url,
    /// Merged default and per-call headers.
    pub headers: HeaderMap,
    /// Request body.
    pub body: Option<Bytes>,
    /// Per-attempt timeout override.
    pub timeout: Option<Duration>,
}

impl OutgoingRequest {
    /// Create a request without headers or body.
    pub fn new(method: Method, url: url::Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        }
    }
}

/// Category of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Establishing the connection timed out.
    ConnectTimeout,
    /// Waiting for response bytes timed out.
    ReadTimeout,
    /// Sending request bytes timed out.
    WriteTimeout,
    /// No pooled connection became available in time.
    PoolTimeout,
    /// The connection could not be established.
    Connect,
    /// The connection failed after it was established.
    Network,
    /// The peer violated the HTTP protocol.
    Protocol,
    /// Anything else (request building, redirects, ...).
    Other,
}

impl FailureKind {
    /// Check if this kind is a timeout.
    pub fn is_timeout(self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout | Self::ReadTimeout | Self::WriteTimeout | Self::PoolTimeout
        )
    }

    /// Whether failures of this kind always happen before request bytes leave the client.
    pub fn is_pre_send(self) -> bool {
        matches!(self, Self::ConnectTimeout | Self::PoolTimeout | Self::Connect)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::ConnectTimeout => "connect timeout",
            Self::ReadTimeout => "read timeout",
            Self::WriteTimeout => "write timeout",
            Self::PoolTimeout => "pool timeout",
            Self::Connect => "connect error",
            Self::Network => "network error",
            Self::Protocol => "protocol error",
            Self::Other => "transport error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed physical attempt, as reported by a transport.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    kind: FailureKind,
    committed: bool,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TransportError {
    /// Create a transport error.
    ///
    /// Connect-phase kinds start out uncommitted, every other kind is
    /// assumed to have sent at least part of the request.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            committed: !kind.is_pre_send(),
            message: message.into(),
            source: None,
        }
    }

    /// Mark the failure as having happened before any request bytes were sent.
    pub fn before_send(mut self) -> Self {
        self.committed = false;
        self
    }

    /// Attach the underlying error.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Failure category.
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Whether request bytes may have reached the server.
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Human readable description.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Map a `reqwest` error onto a failure kind.
    pub fn from_reqwest(error: reqwest::Error) -> Self {
        let kind = if error.is_connect() {
            if error.is_timeout() {
                FailureKind::ConnectTimeout
            } else {
                FailureKind::Connect
            }
        } else if error.is_timeout() {
            // reqwest does not say which phase timed out past connect
            FailureKind::ReadTimeout
        } else if error.is_request() || error.is_body() {
            FailureKind::Network
        } else if error.is_decode() {
            FailureKind::Protocol
        } else {
            FailureKind::Other
        };

        Self::new(kind, error.to_string()).with_source(error)
    }
}

/// Asynchronous transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one physical attempt.
    async fn send(&self, request: &OutgoingRequest) -> std::result::Result<Response, TransportError>;
}

/// Blocking transport.
pub trait BlockingTransport: Send + Sync {
    /// Perform one physical attempt, blocking the calling thread.
    fn send(&self, request: &OutgoingRequest) -> std::result::Result<Response, TransportError>;
}

fn redirect_policy(config: &ClientConfig) -> reqwest::redirect::Policy {
    if config.follow_redirects {
        reqwest::redirect::Policy::limited(config.max_redirects)
    } else {
        reqwest::redirect::Policy::none()
    }
}

/// `reqwest::Client` backed transport with a bounded connection gate.
pub struct ReqwestTransport {
    inner: reqwest::Client,
    gate: AsyncGate,
}

impl ReqwestTransport {
    /// Build the pooled `reqwest` client described by `config`.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .timeout(config.attempt_timeout())
            .pool_idle_timeout(config.keepalive_expiry)
            .pool_max_idle_per_host(config.max_keepalive_connections)
            .user_agent(&config.user_agent)
            .redirect(redirect_policy(config));

        if !config.http2 {
            builder = builder.http1_only();
        }

        let inner = builder
            .build()
            .map_err(|e| HttpRetryError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            inner,
            gate: AsyncGate::new(config.max_connections, config.pool_timeout),
        })
    }

    /// Get the underlying reqwest client.
    pub fn inner(&self) -> &reqwest::Client {
        &self.inner
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &OutgoingRequest) -> std::result::Result<Response, TransportError> {
        let _permit = self.gate.acquire().await?;

        let mut builder = self
            .inner
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(TransportError::from_reqwest)?;
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await.map_err(TransportError::from_reqwest)?;

        Ok(Response::new(status, headers, body, url))
    }
}

/// `reqwest::blocking::Client` backed transport with a bounded connection gate.
///
/// Must not be created or dropped from within an async runtime.
pub struct BlockingReqwestTransport {
    inner: reqwest::blocking::Client,
    gate: BlockingGate,
}

impl BlockingReqwestTransport {
    /// Build the pooled blocking `reqwest` client described by `config`.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut builder = reqwest::blocking::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.attempt_timeout())
            .pool_idle_timeout(config.keepalive_expiry)
            .pool_max_idle_per_host(config.max_keepalive_connections)
            .user_agent(config.user_agent.clone())
            .redirect(redirect_policy(config));

        if !config.http2 {
            builder = builder.http1_only();
        }

        let inner = builder
            .build()
            .map_err(|e| HttpRetryError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            inner,
            gate: BlockingGate::new(config.max_connections, config.pool_timeout),
        })
    }

    /// Get the underlying blocking reqwest client.
    pub fn inner(&self) -> &reqwest::blocking::Client {
        &self.inner
    }
}

impl BlockingTransport for BlockingReqwestTransport {
    fn send(&self, request: &OutgoingRequest) -> std::result::Result<Response, TransportError> {
        let _permit = self.gate.acquire()?;

        let mut builder = self
            .inner
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().map_err(TransportError::from_reqwest)?;
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().map_err(TransportError::from_reqwest)?;

        Ok(Response::new(status, headers, body, url))
    }
}
