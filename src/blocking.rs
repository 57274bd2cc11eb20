//! Blocking retrying HTTP client.
//!
//! Same retry semantics as [`RetryClient`](crate::RetryClient); backoff
//! blocks the calling thread. Do not use from inside an async runtime.

use http::Method;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::attempt::{AttemptContext, Sleeper, ThreadSleeper};
use crate::client::ClientCore;
use crate::pool::PooledHandle;
use crate::request::RequestBuilder;
use crate::transport::{BlockingReqwestTransport, BlockingTransport};
use crate::{ClientConfig, Response, Result};

/// Request builder for [`BlockingRetryClient`].
pub type BlockingRequestBuilder<'a> = RequestBuilder<'a, BlockingRetryClient>;

/// Blocking HTTP client with automatic, method-aware retries.
///
/// ```rust,no_run
/// use armature_http_retry::{BlockingRetryClient, ClientConfig};
///
/// # fn run() -> armature_http_retry::Result<()> {
/// let config = ClientConfig::builder()
///     .base_url("https://jsonplaceholder.typicode.com")
///     .build();
///
/// let title = BlockingRetryClient::scoped(config, |client| {
///     let post: serde_json::Value = client.get("/posts/1").send()?.json()?;
///     Ok(post["title"].to_string())
/// })?;
/// println!("{title}");
/// # Ok(())
/// # }
/// ```
pub struct BlockingRetryClient {
    core: ClientCore,
    transport: PooledHandle<Arc<dyn BlockingTransport>>,
    sleeper: Box<dyn Sleeper>,
}

impl BlockingRetryClient {
    /// Create a client backed by a pooled `reqwest::blocking::Client`.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = BlockingReqwestTransport::new(&config)?;
        Self::with_transport(config, transport)
    }

    /// Create a client over a custom transport.
    pub fn with_transport(config: ClientConfig, transport: impl BlockingTransport + 'static) -> Result<Self> {
        Self::with_parts(config, transport, ThreadSleeper)
    }

    /// Create a client over a custom transport and sleeper.
    pub fn with_parts(
        config: ClientConfig,
        transport: impl BlockingTransport + 'static,
        sleeper: impl Sleeper + 'static,
    ) -> Result<Self> {
        let transport: Arc<dyn BlockingTransport> = Arc::new(transport);
        Ok(Self {
            core: ClientCore::new(config)?,
            transport: PooledHandle::acquire(transport),
            sleeper: Box::new(sleeper),
        })
    }

    /// Run `f` with a fresh client and close it afterwards, whatever the outcome.
    ///
    /// `f` only borrows the client, so no handle can outlive this call: if
    /// `f` panics, unwinding drops the client and releases its pool. Handing
    /// `f` an owned or cloneable client would break that guarantee.
    pub fn scoped<F, T>(config: ClientConfig, f: F) -> Result<T>
    where
        F: FnOnce(&BlockingRetryClient) -> Result<T>,
    {
        let client = Self::new(config)?;
        let result = f(&client);
        client.close();
        result
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.core.config
    }

    /// Create a GET request builder.
    pub fn get(&self, url: impl Into<String>) -> BlockingRequestBuilder<'_> {
        self.request(Method::GET, url)
    }

    /// Create a POST request builder.
    pub fn post(&self, url: impl Into<String>) -> BlockingRequestBuilder<'_> {
        self.request(Method::POST, url)
    }

    /// Create a PUT request builder.
    pub fn put(&self, url: impl Into<String>) -> BlockingRequestBuilder<'_> {
        self.request(Method::PUT, url)
    }

    /// Create a PATCH request builder.
    pub fn patch(&self, url: impl Into<String>) -> BlockingRequestBuilder<'_> {
        self.request(Method::PATCH, url)
    }

    /// Create a DELETE request builder.
    pub fn delete(&self, url: impl Into<String>) -> BlockingRequestBuilder<'_> {
        self.request(Method::DELETE, url)
    }

    /// Create a HEAD request builder.
    pub fn head(&self, url: impl Into<String>) -> BlockingRequestBuilder<'_> {
        self.request(Method::HEAD, url)
    }

    /// Create a request builder with a custom method.
    pub fn request(&self, method: Method, url: impl Into<String>) -> BlockingRequestBuilder<'_> {
        RequestBuilder::new(self, method, url.into())
    }

    /// Release the connection pool. Returns `true` for the call that released it.
    pub fn close(&self) -> bool {
        let released = self.transport.release();
        if released {
            debug!("Closed blocking HTTP client connection pool");
        }
        released
    }

    /// Check whether the client has been closed.
    pub fn is_closed(&self) -> bool {
        self.transport.is_released()
    }

    fn execute(&self, builder: BlockingRequestBuilder<'_>) -> Result<Response> {
        let transport = self.transport.get()?;
        let prepared = builder.prepare(self.core.base_url.as_ref(), self.core.default_headers())?;
        let request = &prepared.request;

        let ctx = AttemptContext {
            method: &request.method,
            url: &request.url,
            cancel: prepared.cancel.as_ref(),
        };

        self.core
            .engine
            .run_blocking(ctx, self.sleeper.as_ref(), || transport.send(request))
    }
}

impl BlockingRequestBuilder<'_> {
    /// Send the request, retrying transient failures.
    pub fn send(self) -> Result<Response> {
        let client = self.client;
        client.execute(self)
    }
}

impl fmt::Debug for BlockingRetryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingRetryClient")
            .field("base_url", &self.core.config.base_url)
            .field("max_attempts", &self.core.engine.max_attempts())
            .field("closed", &self.is_closed())
            .finish()
    }
}
