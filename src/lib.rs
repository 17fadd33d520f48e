//! Query Spool - pooled, delimiter-framed query channel over TCP.
//!
//! This library carries queries between a client and a query server over a
//! small number of persistent TCP connections instead of one connection per
//! request.
//!
//! # Architecture
//!
//! The channel follows a client-server model:
//!
//! - **Client**: [`QueryClient`] acquires a [`Connection`] from a bounded
//!   [`ConnectionPool`], writes one framed request and reads one framed
//!   response
//! - **Server**: [`QueryServer`] accepts connections, decodes request frames
//!   and answers each through an [`Executor`]
//!
//! Key design principles:
//!
//! - Callers queue in arrival order when the pool is saturated
//! - Frames are delimited by markers, not length-prefixed
//! - Query semantics live entirely behind the [`Executor`] trait
//! - Connections can be tunneled through an HTTP `CONNECT` proxy
//!
//! # Quick Start
//!
//! ```no_run
//! use std::net::{IpAddr, Ipv4Addr};
//! use std::sync::Arc;
//!
//! use query_spool::{QueryClient, QueryServer, Result, executor::executor_fn};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let executor = Arc::new(executor_fn(|request| async move {
//!         Ok(json!({ "data": { "echo": request.query } }))
//!     }));
//!     let server = QueryServer::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 1351, executor).await?;
//!
//!     let client = QueryClient::connect("127.0.0.1:1351")?;
//!     let data = client.query_data("{ scopes }", None).await?;
//!     println!("{data}");
//!
//!     client.shutdown().await;
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | Client façade and configuration |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`executor`] | Executor seam used by the server |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire framing and request types |
//! | [`transport`] | Pool, connections and listener |

// ============================================================================
// Modules
// ============================================================================

/// Client façade and configuration.
///
/// Use [`QueryClient::builder()`] to create a configured client.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Executor seam.
pub mod executor;

/// Type-safe identifiers.
pub mod identifiers;

/// Wire framing and request types.
pub mod protocol;

/// TCP transport layer.
///
/// Connection pool, pooled connections, dialing and the listener.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{ClientBuilder, PoolOptions, ProxyConfig, QueryClient};

// Error types
pub use error::{Error, Result};

// Executor types
pub use executor::{Executor, FnExecutor, executor_fn};

// Identifier types
pub use identifiers::ConnectionId;

// Protocol types
pub use protocol::QueryRequest;

// Transport types
pub use transport::{
    Connection, ConnectionHook, ConnectionPool, Endpoint, PoolStatus, PooledConnection, QueryServer,
};
