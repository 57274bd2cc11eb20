//! Retrying HTTP client configuration.

use http::{HeaderMap, HeaderName, HeaderValue};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::status::RetriableStatusTable;
use crate::{HttpRetryError, Result};

/// Environment prefix used by [`ClientConfig::from_env`].
pub const DEFAULT_ENV_PREFIX: &str = "ARMATURE_HTTP";

/// Retrying HTTP client configuration.
///
/// Built once and owned by the client; it is never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL for relative request paths.
    pub base_url: Option<String>,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
    /// Timeout waiting for response bytes.
    pub read_timeout: Duration,
    /// Timeout sending request bytes.
    pub write_timeout: Duration,
    /// Timeout waiting for a free connection slot.
    pub pool_timeout: Duration,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Maximum idle connections kept alive per host.
    pub max_keepalive_connections: usize,
    /// How long idle connections are kept alive.
    pub keepalive_expiry: Duration,
    /// Maximum physical attempts per request, including the first.
    pub max_attempts: u32,
    /// Ceiling on computed backoff. Server `Retry-After` values are never capped.
    pub max_backoff: Option<Duration>,
    /// Status codes retried for idempotent methods.
    pub status_table: RetriableStatusTable,
    /// Headers sent with every request.
    pub default_headers: HeaderMap,
    /// User agent string.
    pub user_agent: String,
    /// Negotiate HTTP/2 when the server supports it.
    pub http2: bool,
    /// Follow redirects.
    pub follow_redirects: bool,
    /// Maximum redirects to follow.
    pub max_redirects: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            pool_timeout: Duration::from_secs(2),
            max_connections: 50,
            max_keepalive_connections: 20,
            keepalive_expiry: Duration::from_secs(30),
            max_attempts: 5,
            max_backoff: None,
            status_table: RetriableStatusTable::standard(),
            default_headers: HeaderMap::new(),
            user_agent: format!("armature-http-retry/{}", env!("CARGO_PKG_VERSION")),
            http2: true,
            follow_redirects: true,
            max_redirects: 10,
        }
    }
}

impl ClientConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Load overrides from `ARMATURE_HTTP_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with_prefix(DEFAULT_ENV_PREFIX)
    }

    /// Load overrides from `{prefix}_*` environment variables.
    ///
    /// Durations are given in (fractional) seconds. Unset variables keep
    /// their defaults.
    pub fn from_env_with_prefix(prefix: &str) -> Result<Self> {
        let var = |key: &str| env::var(format!("{}_{}", prefix, key)).ok();
        let mut config = Self::default();

        if let Some(url) = var("BASE_URL") {
            config.base_url = Some(url);
        }
        if let Some(v) = var("CONNECT_TIMEOUT") {
            config.connect_timeout = parse_seconds("CONNECT_TIMEOUT", &v)?;
        }
        if let Some(v) = var("READ_TIMEOUT") {
            config.read_timeout = parse_seconds("READ_TIMEOUT", &v)?;
        }
        if let Some(v) = var("WRITE_TIMEOUT") {
            config.write_timeout = parse_seconds("WRITE_TIMEOUT", &v)?;
        }
        if let Some(v) = var("POOL_TIMEOUT") {
            config.pool_timeout = parse_seconds("POOL_TIMEOUT", &v)?;
        }
        if let Some(v) = var("MAX_CONNECTIONS") {
            config.max_connections = parse_number("MAX_CONNECTIONS", &v)?;
        }
        if let Some(v) = var("MAX_KEEPALIVE_CONNECTIONS") {
            config.max_keepalive_connections = parse_number("MAX_KEEPALIVE_CONNECTIONS", &v)?;
        }
        if let Some(v) = var("KEEPALIVE_EXPIRY") {
            config.keepalive_expiry = parse_seconds("KEEPALIVE_EXPIRY", &v)?;
        }
        if let Some(v) = var("MAX_ATTEMPTS") {
            config.max_attempts = parse_number("MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = var("USER_AGENT") {
            config.user_agent = v;
        }

        Ok(config)
    }

    /// Upper bound on a single physical attempt.
    pub fn attempt_timeout(&self) -> Duration {
        self.connect_timeout
            .saturating_add(self.write_timeout)
            .saturating_add(self.read_timeout)
    }

    /// Check the configuration, failing fast on values no client can use.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts < 1 {
            return Err(invalid("max_attempts must be at least 1"));
        }
        if self.max_connections < 1 {
            return Err(invalid("max_connections must be at least 1"));
        }
        if self.max_keepalive_connections > self.max_connections {
            return Err(invalid("max_keepalive_connections cannot exceed max_connections"));
        }
        for (name, value) in [
            ("connect_timeout", self.connect_timeout),
            ("read_timeout", self.read_timeout),
            ("write_timeout", self.write_timeout),
            ("pool_timeout", self.pool_timeout),
        ] {
            if value.is_zero() {
                return Err(invalid(&format!("{name} must be greater than zero")));
            }
        }
        if let Some(base) = &self.base_url {
            let url = url::Url::parse(base)?;
            if url.cannot_be_a_base() {
                return Err(HttpRetryError::InvalidUrl(format!("{base} cannot be used as a base URL")));
            }
        }
        Ok(())
    }
}

fn invalid(message: &str) -> HttpRetryError {
    HttpRetryError::InvalidConfig(message.to_string())
}

fn parse_seconds(key: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| invalid(&format!("{key}: expected seconds, got {value:?}")))
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(&format!("{key}: expected a number, got {value:?}")))
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Set the base URL for relative paths.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the read timeout.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    /// Set the write timeout.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    /// Set the pool checkout timeout.
    pub fn pool_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool_timeout = timeout;
        self
    }

    /// Derive all timeouts from one request timeout.
    ///
    /// Connect gets `min(timeout / 2, 5s)`; read and write get `timeout`.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = (timeout / 2).min(Duration::from_secs(5));
        self.config.read_timeout = timeout;
        self.config.write_timeout = timeout;
        self
    }

    /// Set the maximum number of concurrent connections.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    /// Set the maximum idle connections kept alive per host.
    pub fn max_keepalive_connections(mut self, max: usize) -> Self {
        self.config.max_keepalive_connections = max;
        self
    }

    /// Set how long idle connections are kept.
    pub fn keepalive_expiry(mut self, expiry: Duration) -> Self {
        self.config.keepalive_expiry = expiry;
        self
    }

    /// Set the attempt budget, including the first attempt.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// Cap computed backoff delays.
    pub fn max_backoff(mut self, max: Duration) -> Self {
        self.config.max_backoff = Some(max);
        self
    }

    /// Replace the retriable status table.
    pub fn status_table(mut self, table: RetriableStatusTable) -> Self {
        self.config.status_table = table;
        self
    }

    /// Add a default header for all requests.
    ///
    /// Invalid names or values are skipped with a warning; a repeated name
    /// replaces the earlier value.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                self.config.default_headers.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "Skipping invalid default header"),
        }
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Enable or disable HTTP/2 negotiation.
    pub fn http2(mut self, enable: bool) -> Self {
        self.config.http2 = enable;
        self
    }

    /// Enable or disable following redirects.
    pub fn follow_redirects(mut self, enable: bool) -> Self {
        self.config.follow_redirects = enable;
        self
    }

    /// Set the maximum number of redirects to follow.
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.config.max_redirects = max;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }
}
