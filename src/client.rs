//! Async retrying HTTP client.

use http::{HeaderMap, Method};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::attempt::{AsyncSleeper, AttemptContext, AttemptLoop, TokioSleeper};
use crate::backoff::BackoffPolicy;
use crate::classify::RetryClassifier;
use crate::pool::PooledHandle;
use crate::request::RequestBuilder;
use crate::transport::{ReqwestTransport, Transport};
use crate::{ClientConfig, Response, Result};

/// Pieces shared by both client flavours.
pub(crate) struct ClientCore {
    pub(crate) config: ClientConfig,
    pub(crate) base_url: Option<Url>,
    pub(crate) engine: AttemptLoop,
}

impl ClientCore {
    pub(crate) fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let base_url = config.base_url.as_deref().map(Url::parse).transpose()?;
        let mut backoff = BackoffPolicy::default();
        backoff.max_delay = config.max_backoff;
        let engine = AttemptLoop::new(
            config.max_attempts,
            backoff,
            RetryClassifier::new(config.status_table.clone()),
        );

        Ok(Self {
            config,
            base_url,
            engine,
        })
    }

    pub(crate) fn default_headers(&self) -> &HeaderMap {
        &self.config.default_headers
    }
}

struct ClientInner {
    core: ClientCore,
    transport: PooledHandle<Arc<dyn Transport>>,
    sleeper: Arc<dyn AsyncSleeper>,
}

/// Async HTTP client with automatic, method-aware retries.
///
/// Cloning is cheap and every clone shares one connection pool, so a single
/// client can serve many concurrent tasks.
///
/// ```rust,no_run
/// use armature_http_retry::{ClientConfig, RetryClient};
///
/// # async fn run() -> armature_http_retry::Result<()> {
/// let config = ClientConfig::builder()
///     .base_url("https://jsonplaceholder.typicode.com")
///     .build();
/// let client = RetryClient::new(config)?;
///
/// let post: serde_json::Value = client.get("/posts/1").send().await?.json()?;
/// println!("{}", post["title"]);
///
/// client.close();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RetryClient {
    inner: Arc<ClientInner>,
}

impl RetryClient {
    /// Create a client backed by a pooled `reqwest::Client`.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(&config)?;
        Self::with_transport(config, transport)
    }

    /// Create a client over a custom transport.
    pub fn with_transport(config: ClientConfig, transport: impl Transport + 'static) -> Result<Self> {
        Self::with_parts(config, transport, TokioSleeper)
    }

    /// Create a client over a custom transport and sleeper.
    pub fn with_parts(
        config: ClientConfig,
        transport: impl Transport + 'static,
        sleeper: impl AsyncSleeper + 'static,
    ) -> Result<Self> {
        let core = ClientCore::new(config)?;
        let transport: Arc<dyn Transport> = Arc::new(transport);

        Ok(Self {
            inner: Arc::new(ClientInner {
                core,
                transport: PooledHandle::acquire(transport),
                sleeper: Arc::new(sleeper),
            }),
        })
    }

    /// Run `f` with a fresh client and close it afterwards, whatever the outcome.
    ///
    /// The client is closed even if the returned future is dropped before
    /// completing, so clones that escape `f` see a closed client.
    pub async fn scoped<F, Fut, T>(config: ClientConfig, f: F) -> Result<T>
    where
        F: FnOnce(RetryClient) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let guard = CloseOnDrop(Self::new(config)?);
        f(guard.0.clone()).await
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.core.config
    }

    /// Create a GET request builder.
    pub fn get(&self, url: impl Into<String>) -> RequestBuilder<'_, Self> {
        self.request(Method::GET, url)
    }

    /// Create a POST request builder.
    pub fn post(&self, url: impl Into<String>) -> RequestBuilder<'_, Self> {
        self.request(Method::POST, url)
    }

    /// Create a PUT request builder.
    pub fn put(&self, url: impl Into<String>) -> RequestBuilder<'_, Self> {
        self.request(Method::PUT, url)
    }

    /// Create a PATCH request builder.
    pub fn patch(&self, url: impl Into<String>) -> RequestBuilder<'_, Self> {
        self.request(Method::PATCH, url)
    }

    /// Create a DELETE request builder.
    pub fn delete(&self, url: impl Into<String>) -> RequestBuilder<'_, Self> {
        self.request(Method::DELETE, url)
    }

    /// Create a HEAD request builder.
    pub fn head(&self, url: impl Into<String>) -> RequestBuilder<'_, Self> {
        self.request(Method::HEAD, url)
    }

    /// Create a request builder with a custom method.
    pub fn request(&self, method: Method, url: impl Into<String>) -> RequestBuilder<'_, Self> {
        RequestBuilder::new(self, method, url.into())
    }

    /// Release the connection pool.
    ///
    /// Returns `true` for the call that released it. Requests already in
    /// flight complete; new requests fail with
    /// [`HttpRetryError::Closed`](crate::HttpRetryError::Closed).
    pub fn close(&self) -> bool {
        let released = self.inner.transport.release();
        if released {
            debug!("Closed HTTP client connection pool");
        }
        released
    }

    /// Check whether the client has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.transport.is_released()
    }

    async fn execute(&self, builder: RequestBuilder<'_, Self>) -> Result<Response> {
        let transport = self.inner.transport.get()?;
        let core = &self.inner.core;
        let prepared = builder.prepare(core.base_url.as_ref(), core.default_headers())?;
        let request = &prepared.request;

        let ctx = AttemptContext {
            method: &request.method,
            url: &request.url,
            cancel: prepared.cancel.as_ref(),
        };

        core.engine
            .run(ctx, self.inner.sleeper.as_ref(), || transport.send(request))
            .await
    }
}

/// Closes the wrapped client when dropped.
struct CloseOnDrop(RetryClient);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}

impl RequestBuilder<'_, RetryClient> {
    /// Send the request, retrying transient failures.
    pub async fn send(self) -> Result<Response> {
        let client = self.client;
        client.execute(self).await
    }
}

impl fmt::Debug for RetryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryClient")
            .field("base_url", &self.inner.core.config.base_url)
            .field("max_attempts", &self.inner.core.engine.max_attempts())
            .field("closed", &self.is_closed())
            .finish()
    }
}
