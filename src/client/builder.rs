//! Builder pattern for client configuration.
//!
//! Provides a fluent API for configuring and creating [`QueryClient`]
//! instances.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use query_spool::QueryClient;
//!
//! # async fn example() -> query_spool::Result<()> {
//! let client = QueryClient::builder()
//!     .endpoint("127.0.0.1:1351")
//!     .max_size(3)
//!     .acquire_timeout(Duration::from_secs(5))
//!     .build()?;
//!
//! let result = client.query("{ scopes { name } }", None).await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::{Connection, ConnectionHook, ConnectionPool, Endpoint};

use super::core::QueryClient;
use super::options::{PoolOptions, ProxyConfig};

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for configuring a [`QueryClient`].
///
/// Use [`QueryClient::builder()`] to create a new builder. Individual
/// setters override whatever [`options`](Self::options) supplied, and
/// [`host`](Self::host) / [`port`](Self::port) override
/// [`endpoint`](Self::endpoint).
#[derive(Default, Clone)]
pub struct ClientBuilder {
    /// Base options, if supplied wholesale.
    options: Option<PoolOptions>,
    /// Unparsed `host:port`.
    endpoint: Option<String>,
    /// Target host.
    host: Option<String>,
    /// Target port.
    port: Option<u16>,
    /// Forward proxy.
    proxy: Option<ProxyConfig>,
    /// Acquire timeout.
    acquire_timeout: Option<Duration>,
    /// Pool size.
    max_size: Option<usize>,
    /// Per-dial bound.
    connect_timeout: Option<Duration>,
    /// Per-query bound.
    query_timeout: Option<Duration>,
    /// Creation hook.
    on_connection_created: Option<ConnectionHook>,
}

// ============================================================================
// ClientBuilder Implementation
// ============================================================================

impl ClientBuilder {
    /// Creates a new builder with no configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from a complete set of options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: PoolOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Sets the target as a `host:port` string.
    ///
    /// Parsed at build time; a malformed value fails [`build`](Self::build).
    #[inline]
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the target host.
    #[inline]
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the target port.
    #[inline]
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Routes every connection through an HTTP `CONNECT` proxy.
    #[inline]
    #[must_use]
    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Sets how long an acquire may wait for a free connection.
    #[inline]
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Sets the maximum number of pooled connections.
    #[inline]
    #[must_use]
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    /// Bounds each connection attempt.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Bounds each request/response exchange.
    #[inline]
    #[must_use]
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    /// Registers a hook called once for every newly created connection.
    #[must_use]
    pub fn on_connection_created<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.on_connection_created = Some(Arc::new(hook));
        self
    }

    /// Builds only the pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is incomplete or invalid.
    pub fn build_pool(self) -> Result<Arc<ConnectionPool>> {
        let options = self.resolve_options()?;
        ConnectionPool::new(options, self.on_connection_created)
    }

    /// Builds the client.
    ///
    /// No connection is opened until the first query.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is incomplete or invalid.
    pub fn build(self) -> Result<QueryClient> {
        Ok(QueryClient::from_pool(self.build_pool()?))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ClientBuilder {
    /// Merges every setter into one validated [`PoolOptions`].
    fn resolve_options(&self) -> Result<PoolOptions> {
        let mut options = self
            .options
            .clone()
            .unwrap_or_else(|| PoolOptions::new(String::new(), 0));

        if let Some(raw) = &self.endpoint {
            let endpoint: Endpoint = raw.parse()?;
            options.host = endpoint.host;
            options.port = endpoint.port;
        }
        if let Some(host) = &self.host {
            options.host.clone_from(host);
        }
        if let Some(port) = self.port {
            options.port = port;
        }
        if let Some(proxy) = &self.proxy {
            options.proxy = Some(proxy.clone());
        }
        if let Some(timeout) = self.acquire_timeout {
            options.timeout_ms = millis(timeout);
        }
        if let Some(max_size) = self.max_size {
            options.max_size = max_size;
        }
        if let Some(timeout) = self.connect_timeout {
            options.connect_timeout_ms = Some(millis(timeout));
        }
        if let Some(timeout) = self.query_timeout {
            options.query_timeout_ms = Some(millis(timeout));
        }

        if options.host.is_empty() {
            return Err(Error::config(
                "Target host is required. Use .endpoint() or .host() to set it.\n\
                 Example: QueryClient::builder().endpoint(\"127.0.0.1:1351\")",
            ));
        }

        options.validate()?;
        Ok(options)
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("options", &self.options)
            .field("endpoint", &self.endpoint)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("max_size", &self.max_size)
            .field("hook", &self.on_connection_created.is_some())
            .finish_non_exhaustive()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_creates_empty_builder() {
        let builder = ClientBuilder::new();
        assert!(builder.endpoint.is_none());
        assert!(builder.options.is_none());
        assert!(builder.on_connection_created.is_none());
    }

    #[test]
    fn test_endpoint_string() {
        let options = ClientBuilder::new()
            .endpoint("127.0.0.1:1351")
            .resolve_options()
            .expect("resolve");
        assert_eq!(options.host, "127.0.0.1");
        assert_eq!(options.port, 1351);
        assert_eq!(options.max_size, 10);
        assert_eq!(options.timeout_ms, 3000);
    }

    #[test]
    fn test_setters_override_endpoint_and_options() {
        let mut base = PoolOptions::new("base", 1);
        base.max_size = 7;

        let options = ClientBuilder::new()
            .options(base)
            .endpoint("db:9090")
            .port(9191)
            .max_size(2)
            .acquire_timeout(Duration::from_millis(250))
            .query_timeout(Duration::from_secs(1))
            .resolve_options()
            .expect("resolve");

        assert_eq!(options.host, "db");
        assert_eq!(options.port, 9191);
        assert_eq!(options.max_size, 2);
        assert_eq!(options.timeout_ms, 250);
        assert_eq!(options.query_timeout_ms, Some(1000));
        assert_eq!(options.connect_timeout_ms, None);
    }

    #[test]
    fn test_missing_host_is_config_error() {
        let err = ClientBuilder::new().port(1351).build().expect_err("no host");
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains(".endpoint()"));
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        let cases = [
            ClientBuilder::new().endpoint("no-port"),
            ClientBuilder::new().host("db"),
            ClientBuilder::new().endpoint("db:1").max_size(0),
            ClientBuilder::new().endpoint("db:1").acquire_timeout(Duration::ZERO),
            ClientBuilder::new()
                .endpoint("db:1")
                .proxy(ProxyConfig::new("", 8080)),
        ];

        for builder in cases {
            let err = builder.resolve_options().expect_err("invalid");
            assert!(matches!(err, Error::Config { .. }), "got {err:?}");
        }
    }

    #[tokio::test]
    async fn test_build_pool_is_lazy() {
        let pool = ClientBuilder::new()
            .endpoint("127.0.0.1:9")
            .on_connection_created(|_| {})
            .build_pool()
            .expect("build");
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.status().max_size, 10);
    }

    #[test]
    fn test_debug_hides_hook() {
        let builder = ClientBuilder::new().on_connection_created(|_| {});
        assert!(format!("{builder:?}").contains("hook: true"));
    }
}
