//! TCP transport layer.
//!
//! This module handles both ends of the query channel: pooled outbound
//! connections on the client side and the accepting listener on the
//! server side.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                              ┌──────────────────┐
//! │  QueryClient     │                              │  QueryServer     │
//! │                  │      framed TCP stream       │                  │
//! │  ConnectionPool  │◄────────────────────────────►│  accept loop     │
//! │  → Connection    │   direct or CONNECT tunnel   │  → Executor      │
//! │                  │                              │                  │
//! └──────────────────┘                              └──────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `ConnectionPool::acquire` - reuse an idle connection or dial a new one
//! 2. `Connection::round_trip` - write a request frame, read a response frame
//! 3. `ConnectionPool::release` - hand back to the next waiter or park idle
//! 4. `ConnectionPool::remove` - destroy after a broken exchange
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `endpoint` | `host:port` addressing |
//! | `dial` | Direct and proxied stream creation |
//! | `connection` | Pooled connection handle |
//! | `pool` | Bounded pool with FIFO waiters |
//! | `server` | Listener and request state machine |

// ============================================================================
// Submodules
// ============================================================================

/// Pooled connection handle.
pub mod connection;

/// Direct and proxied stream creation.
pub mod dial;

/// Remote endpoint addressing.
pub mod endpoint;

/// Bounded connection pool.
pub mod pool;

/// Listener and request state machine.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connection, ConnectionHook};
pub use dial::{Dialed, Dialer};
pub use endpoint::Endpoint;
pub use pool::{ConnectionPool, PoolStatus, PooledConnection};
pub use server::QueryServer;
