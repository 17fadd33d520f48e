//! Pool and proxy configuration.
//!
//! Options are plain serde structs so they can come from a config file as
//! well as from [`ClientBuilder`](super::ClientBuilder).
//!
//! # Example
//!
//! ```
//! use query_spool::PoolOptions;
//!
//! let options = PoolOptions::from_json(r#"{
//!     "host": "127.0.0.1",
//!     "port": 1351,
//!     "maxSize": 3,
//!     "proxy": { "host": "172.16.8.12", "port": 39741 }
//! }"#).unwrap();
//!
//! assert_eq!(options.timeout_ms, 3000);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transport::Endpoint;

// ============================================================================
// Constants
// ============================================================================

/// Default pool size.
pub const DEFAULT_MAX_SIZE: usize = 10;

/// Default acquire timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 3000;

// ============================================================================
// ProxyConfig
// ============================================================================

/// Forward proxy reached with an HTTP `CONNECT` tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Proxy hostname.
    pub host: String,

    /// Proxy port.
    pub port: u16,

    /// Body sent after the `CONNECT` header for proxy-specific negotiation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handshake: Option<String>,
}

impl ProxyConfig {
    /// Creates a proxy configuration.
    #[inline]
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            handshake: None,
        }
    }

    /// Sets the handshake body.
    #[inline]
    #[must_use]
    pub fn with_handshake(mut self, body: impl Into<String>) -> Self {
        self.handshake = Some(body.into());
        self
    }

    /// Returns the validated proxy endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if host or port is missing.
    pub fn endpoint(&self) -> Result<Endpoint> {
        Endpoint::new(self.host.clone(), self.port)
            .map_err(|e| Error::config(format!("proxy: {e}")))
    }
}

// ============================================================================
// PoolOptions
// ============================================================================

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolOptions {
    /// Target host.
    pub host: String,

    /// Target port.
    pub port: u16,

    /// Optional forward proxy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyConfig>,

    /// How long an acquire may wait for a connection, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum number of connections.
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    /// Bound on a single connection attempt, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,

    /// Bound on one request/response exchange, in milliseconds.
    ///
    /// Unset means a query may wait for its response indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_timeout_ms: Option<u64>,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_max_size() -> usize {
    DEFAULT_MAX_SIZE
}

// ============================================================================
// PoolOptions - Constructors
// ============================================================================

impl PoolOptions {
    /// Creates options for `host:port` with defaults for everything else.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            proxy: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_size: DEFAULT_MAX_SIZE,
            connect_timeout_ms: None,
            query_timeout_ms: None,
        }
    }

    /// Parses options from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] on malformed input, [`Error::Config`] if invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }
}

// ============================================================================
// PoolOptions - Accessors
// ============================================================================

impl PoolOptions {
    /// Returns the target endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if host or port is missing.
    pub fn endpoint(&self) -> Result<Endpoint> {
        Endpoint::new(self.host.clone(), self.port)
    }

    /// Acquire timeout as a [`Duration`].
    #[inline]
    #[must_use]
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Connect timeout as a [`Duration`].
    #[inline]
    #[must_use]
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    /// Query timeout as a [`Duration`].
    #[inline]
    #[must_use]
    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }

    /// Checks every field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        self.endpoint()?;

        if let Some(proxy) = &self.proxy {
            proxy.endpoint()?;
        }
        if self.max_size == 0 {
            return Err(Error::config("maxSize must be at least 1"));
        }
        if self.timeout_ms == 0 {
            return Err(Error::config("timeoutMs must be greater than 0"));
        }
        if self.connect_timeout_ms == Some(0) {
            return Err(Error::config("connectTimeoutMs must be greater than 0"));
        }
        if self.query_timeout_ms == Some(0) {
            return Err(Error::config("queryTimeoutMs must be greater than 0"));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = PoolOptions::new("127.0.0.1", 1351);
        assert_eq!(options.max_size, 10);
        assert_eq!(options.timeout_ms, 3000);
        assert_eq!(options.acquire_timeout(), Duration::from_secs(3));
        assert!(options.proxy.is_none());
        assert!(options.query_timeout().is_none());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_from_json_applies_defaults() {
        let options = PoolOptions::from_json(r#"{"host":"db","port":9090,"maxSize":3}"#)
            .expect("parse");
        assert_eq!(options.max_size, 3);
        assert_eq!(options.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(options.endpoint().expect("endpoint").to_string(), "db:9090");
    }

    #[test]
    fn test_from_json_with_proxy() {
        let options = PoolOptions::from_json(
            r#"{"host":"db","port":9090,"proxy":{"host":"172.16.8.12","port":39741,"handshake":"x"}}"#,
        )
        .expect("parse");

        let proxy = options.proxy.expect("proxy");
        assert_eq!(proxy.port, 39741);
        assert_eq!(proxy.handshake.as_deref(), Some("x"));
    }

    #[test]
    fn test_missing_host_or_port() {
        assert!(matches!(
            PoolOptions::new("", 1351).validate(),
            Err(Error::Config { .. })
        ));
        assert!(matches!(
            PoolOptions::new("db", 0).validate(),
            Err(Error::Config { .. })
        ));
        assert!(matches!(
            PoolOptions::from_json(r#"{"port":1}"#),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn test_rejects_zero_limits() {
        let mut options = PoolOptions::new("db", 1);
        options.max_size = 0;
        assert!(options.validate().is_err());

        let mut options = PoolOptions::new("db", 1);
        options.timeout_ms = 0;
        assert!(options.validate().is_err());

        let mut options = PoolOptions::new("db", 1);
        options.query_timeout_ms = Some(0);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_invalid_proxy() {
        let mut options = PoolOptions::new("db", 1);
        options.proxy = Some(ProxyConfig::new("proxy", 0));

        let err = options.validate().expect_err("invalid proxy");
        assert!(err.to_string().contains("proxy"));
    }
}
