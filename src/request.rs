//! Request builder shared by the async and blocking clients.

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::transport::OutgoingRequest;
use crate::{HttpRetryError, Result};

/// HTTP request builder.
///
/// Obtained from [`RetryClient`](crate::RetryClient) or
/// [`BlockingRetryClient`](crate::BlockingRetryClient); `send()` runs the
/// request through the client's retry loop.
pub struct RequestBuilder<'a, C> {
    pub(crate) client: &'a C,
    method: Method,
    url: String,
    headers: HeaderMap,
    query: Vec<(String, String)>,
    body: Option<Bytes>,
    timeout: Option<Duration>,
    cancel: Option<CancellationToken>,
    error: Option<HttpRetryError>,
}

/// A request resolved against the client configuration.
pub(crate) struct PreparedRequest {
    pub(crate) request: OutgoingRequest,
    pub(crate) cancel: Option<CancellationToken>,
}

impl<'a, C> RequestBuilder<'a, C> {
    /// Create a new request builder.
    pub(crate) fn new(client: &'a C, method: Method, url: String) -> Self {
        Self {
            client,
            method,
            url,
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: None,
            timeout: None,
            cancel: None,
            error: None,
        }
    }

    /// Add a header to the request, replacing a default header of the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => self.fail(HttpRetryError::RequestBuild(format!("invalid header {name:?}"))),
        }
        self
    }

    /// Add multiple headers to the request.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Add a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add multiple query parameters.
    pub fn queries<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in params {
            self.query.push((k.into(), v.into()));
        }
        self
    }

    /// Set the request body as raw bytes.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the request body as text.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        self.body = Some(Bytes::from(text.into()));
        self
    }

    /// Set the request body as JSON.
    pub fn json<T: Serialize + ?Sized>(mut self, json: &T) -> Self {
        match serde_json::to_vec(json) {
            Ok(bytes) => {
                self.headers.insert(
                    http::header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                self.body = Some(Bytes::from(bytes));
            }
            Err(e) => self.fail(HttpRetryError::Json(e.to_string())),
        }
        self
    }

    /// Set the request body as form data.
    pub fn form<T: Serialize + ?Sized>(mut self, form: &T) -> Self {
        match serde_urlencoded::to_string(form) {
            Ok(encoded) => {
                self.headers.insert(
                    http::header::CONTENT_TYPE,
                    HeaderValue::from_static("application/x-www-form-urlencoded"),
                );
                self.body = Some(Bytes::from(encoded));
            }
            Err(e) => self.fail(HttpRetryError::RequestBuild(e.to_string())),
        }
        self
    }

    /// Bound each physical attempt of this request by `timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Abort the request, including pending backoff, when `token` is cancelled.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Set bearer authentication.
    pub fn bearer_auth(self, token: impl Into<String>) -> Self {
        self.header("Authorization", format!("Bearer {}", token.into()))
    }

    /// Set basic authentication.
    pub fn basic_auth(
        self,
        username: impl Into<String>,
        password: Option<impl Into<String>>,
    ) -> Self {
        use base64::Engine;
        let credentials = match password {
            Some(p) => format!("{}:{}", username.into(), p.into()),
            None => format!("{}:", username.into()),
        };
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
        self.header("Authorization", format!("Basic {}", encoded))
    }

    fn fail(&mut self, error: HttpRetryError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Resolve the URL and merge headers into a replayable request.
    pub(crate) fn prepare(self, base_url: Option<&Url>, default_headers: &HeaderMap) -> Result<PreparedRequest> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let mut url = resolve_url(base_url, &self.url)?;
        if !self.query.is_empty() {
            let mut query_pairs = url.query_pairs_mut();
            for (key, value) in &self.query {
                query_pairs.append_pair(key, value);
            }
        }

        Ok(PreparedRequest {
            request: OutgoingRequest {
                method: self.method,
                url,
                headers: merge_headers(default_headers, self.headers),
                body: self.body,
                timeout: self.timeout,
            },
            cancel: self.cancel,
        })
    }
}

/// Resolve `target` against `base`.
///
/// Absolute URLs are used as-is. Relative paths are appended to the base
/// path, so `https://host/v1` + `/users` gives `https://host/v1/users`.
pub(crate) fn resolve_url(base: Option<&Url>, target: &str) -> Result<Url> {
    match Url::parse(target) {
        Ok(url) => return Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {}
        Err(e) => return Err(e.into()),
    }

    let base = base.ok_or_else(|| {
        HttpRetryError::InvalidUrl(format!("relative URL {target:?} requires a base URL"))
    })?;

    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base.join(target.trim_start_matches('/'))?)
}

/// Defaults first, then per-call headers replacing any default of the same name.
pub(crate) fn merge_headers(defaults: &HeaderMap, overrides: HeaderMap) -> HeaderMap {
    let mut merged = defaults.clone();
    for name in overrides.keys() {
        merged.remove(name);
    }
    merged.extend(overrides);
    merged
}
