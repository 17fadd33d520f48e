//! Client side of the query channel.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`QueryClient`] | Façade that sends queries over pooled connections |
//! | [`ClientBuilder`] | Fluent configuration builder |
//! | [`PoolOptions`] | Serializable pool configuration |
//! | [`ProxyConfig`] | Forward proxy reached via HTTP `CONNECT` |
//!
//! # Example
//!
//! ```no_run
//! use query_spool::{ProxyConfig, QueryClient, Result};
//!
//! # async fn example() -> Result<()> {
//! let client = QueryClient::builder()
//!     .endpoint("10.0.0.7:1351")
//!     .proxy(ProxyConfig::new("172.16.8.12", 39741))
//!     .max_size(3)
//!     .build()?;
//!
//! let data = client.query_data("{ scopes { name } }", None).await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for client configuration.
pub mod builder;

/// Query client façade.
pub mod core;

/// Pool and proxy options.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ClientBuilder;
pub use core::QueryClient;
pub use options::{DEFAULT_MAX_SIZE, DEFAULT_TIMEOUT_MS, PoolOptions, ProxyConfig};
