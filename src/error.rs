//! Error types for the query spool.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use query_spool::{QueryClient, Result};
//!
//! async fn example(client: &QueryClient) -> Result<()> {
//!     let users = client.query("{ users { id } }", None).await?;
//!     println!("{users}");
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::ConnectionRefused`], [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`], [`Error::ProxyRejected`] |
//! | Pool | [`Error::AcquireTimeout`], [`Error::PoolClosed`] |
//! | Protocol | [`Error::AlreadyReleased`], [`Error::UnknownConnection`], [`Error::Protocol`], [`Error::FrameTooLarge`] |
//! | Execution | [`Error::Executor`], [`Error::QueryTimeout`] |
//! | External | [`Error::Io`], [`Error::Json`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::{Error as IoError, ErrorKind};
use std::result::Result as StdResult;

use thiserror::Error;

use crate::identifiers::ConnectionId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when pool or client configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// The remote end refused the connection.
    ///
    /// The pool rolls back its created count; the pool stays usable.
    #[error("Connection refused by {endpoint}")]
    ConnectionRefused {
        /// `host:port` that refused.
        endpoint: String,
    },

    /// Connection could not be established or broke mid-use.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection attempt exceeded the configured connect timeout.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Peer closed the stream before a frame completed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Forward proxy did not confirm the tunnel.
    #[error("Proxy rejected tunnel: {response}")]
    ProxyRejected {
        /// Raw response text from the proxy.
        response: String,
    },

    // ========================================================================
    // Pool Errors
    // ========================================================================
    /// Waited in the acquire queue past the deadline.
    #[error("Acquire timeout after {timeout_ms}ms")]
    AcquireTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Pool has been shut down.
    #[error("Connection pool closed")]
    PoolClosed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Connection released while already idle.
    #[error("Connection {connection_id} already released")]
    AlreadyReleased {
        /// The connection released twice.
        connection_id: ConnectionId,
    },

    /// Connection does not belong to the pool (or was removed).
    #[error("Connection {connection_id} is not managed by this pool")]
    UnknownConnection {
        /// The unrecognized connection.
        connection_id: ConnectionId,
    },

    /// Malformed frame or framing state violation.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Accumulated frame exceeded the size limit.
    #[error("Frame of {len} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge {
        /// Bytes buffered so far.
        len: usize,
        /// Configured limit.
        limit: usize,
    },

    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// Executor failed for a well-formed request.
    #[error("Executor error: {message}")]
    Executor {
        /// Error message from the executor.
        message: String,
    },

    /// No response arrived within the query timeout.
    #[error("Query timed out after {timeout_ms}ms")]
    QueryTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection refused error.
    #[inline]
    pub fn connection_refused(endpoint: impl Into<String>) -> Self {
        Self::ConnectionRefused {
            endpoint: endpoint.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a proxy rejection error.
    #[inline]
    pub fn proxy_rejected(response: impl Into<String>) -> Self {
        Self::ProxyRejected {
            response: response.into(),
        }
    }

    /// Creates an acquire timeout error.
    #[inline]
    pub fn acquire_timeout(timeout_ms: u64) -> Self {
        Self::AcquireTimeout { timeout_ms }
    }

    /// Creates an already released error.
    #[inline]
    pub fn already_released(connection_id: ConnectionId) -> Self {
        Self::AlreadyReleased { connection_id }
    }

    /// Creates an unknown connection error.
    #[inline]
    pub fn unknown_connection(connection_id: ConnectionId) -> Self {
        Self::UnknownConnection { connection_id }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a frame too large error.
    #[inline]
    pub fn frame_too_large(len: usize, limit: usize) -> Self {
        Self::FrameTooLarge { len, limit }
    }

    /// Creates an executor error.
    #[inline]
    pub fn executor(message: impl Into<String>) -> Self {
        Self::Executor {
            message: message.into(),
        }
    }

    /// Creates a query timeout error.
    #[inline]
    pub fn query_timeout(timeout_ms: u64) -> Self {
        Self::QueryTimeout { timeout_ms }
    }

    /// Maps an IO error raised while connecting to `endpoint`.
    ///
    /// Refusals are tagged distinctly so the pool can tell them apart.
    pub fn from_connect(endpoint: impl Into<String>, err: IoError) -> Self {
        match err.kind() {
            ErrorKind::ConnectionRefused => Self::connection_refused(endpoint),
            _ => Self::connection(format!("{}: {err}", endpoint.into())),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::AcquireTimeout { .. } | Self::QueryTimeout { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionRefused { .. }
                | Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::ProxyRejected { .. }
        )
    }

    /// Returns `true` if this error signals misuse of the pool or a broken frame.
    #[inline]
    #[must_use]
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::AlreadyReleased { .. }
                | Self::UnknownConnection { .. }
                | Self::Protocol { .. }
                | Self::FrameTooLarge { .. }
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionRefused { .. }
                | Self::ConnectionTimeout { .. }
                | Self::AcquireTimeout { .. }
                | Self::QueryTimeout { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::connection("failed to connect");
        assert_eq!(err.to_string(), "Connection failed: failed to connect");
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("host is required");
        assert_eq!(err.to_string(), "Configuration error: host is required");
    }

    #[test]
    fn test_from_connect_tags_refusal() {
        let refused = IoError::new(ErrorKind::ConnectionRefused, "refused");
        let err = Error::from_connect("127.0.0.1:1351", refused);
        assert!(matches!(err, Error::ConnectionRefused { ref endpoint } if endpoint == "127.0.0.1:1351"));

        let reset = IoError::new(ErrorKind::ConnectionReset, "reset");
        let err = Error::from_connect("127.0.0.1:1351", reset);
        assert!(matches!(err, Error::Connection { .. }));
    }

    #[test]
    fn test_is_timeout() {
        assert!(Error::acquire_timeout(3000).is_timeout());
        assert!(Error::query_timeout(100).is_timeout());
        assert!(!Error::connection("test").is_timeout());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::connection_refused("h:1").is_connection_error());
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(Error::proxy_rejected("HTTP/1.1 403 Forbidden").is_connection_error());
        assert!(!Error::acquire_timeout(1).is_connection_error());
    }

    #[test]
    fn test_is_protocol_violation() {
        let id = ConnectionId::next();
        assert!(Error::already_released(id).is_protocol_violation());
        assert!(Error::unknown_connection(id).is_protocol_violation());
        assert!(Error::frame_too_large(10, 5).is_protocol_violation());
        assert!(!Error::executor("boom").is_protocol_violation());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::acquire_timeout(1000).is_recoverable());
        assert!(!Error::config("test").is_recoverable());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
        assert!(!err.is_timeout());
        assert!(!err.is_connection_error());
    }
}
