//! Query client façade.
//!
//! The [`QueryClient`] hides the pool: every call acquires a connection,
//! performs one framed exchange and hands the connection back.
//!
//! # Connection Outcome
//!
//! | Exchange result | Connection |
//! |-----------------|------------|
//! | Response parsed | released |
//! | Response not valid JSON | released (frame was complete) |
//! | I/O, framing or query timeout | removed |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::{QueryRequest, into_data};
use crate::transport::ConnectionPool;

use super::builder::ClientBuilder;

// ============================================================================
// QueryClient
// ============================================================================

/// Sends queries over pooled connections.
///
/// Cheap to clone; clones share the pool.
///
/// # Example
///
/// ```no_run
/// use query_spool::QueryClient;
/// use serde_json::json;
///
/// # async fn example() -> query_spool::Result<()> {
/// let client = QueryClient::connect("127.0.0.1:1351")?;
///
/// let result = client
///     .query("query($scope: String) { scope(name: $scope) }", Some(json!({ "scope": "expo" })))
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct QueryClient {
    /// Shared pool.
    pool: Arc<ConnectionPool>,
}

// ============================================================================
// QueryClient - Constructors
// ============================================================================

impl QueryClient {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Creates a client for `host:port` with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `endpoint` is not a valid `host:port`.
    pub fn connect(endpoint: &str) -> Result<Self> {
        ClientBuilder::new().endpoint(endpoint).build()
    }

    /// Wraps an existing pool.
    #[inline]
    #[must_use]
    pub fn from_pool(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }
}

// ============================================================================
// QueryClient - Public API
// ============================================================================

impl QueryClient {
    /// Returns the underlying pool.
    #[inline]
    #[must_use]
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Sends a query and returns the raw response payload.
    ///
    /// `variables` must be a JSON object or `null`; `null` is sent as no
    /// variables.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if `variables` is neither an object nor `null`
    /// - [`Error::AcquireTimeout`] if no connection frees up in time
    /// - connection errors if a new connection cannot be opened
    /// - [`Error::QueryTimeout`] if a query timeout is set and elapses
    /// - [`Error::Json`] if the response is not valid JSON
    pub async fn query(&self, query: impl Into<String>, variables: Option<Value>) -> Result<Value> {
        let mut request = QueryRequest::new(query);
        if let Some(variables) = variables {
            request = request.with_variables(variables)?;
        }
        self.send(request).await
    }

    /// Sends a query and deserializes the response into `T`.
    ///
    /// # Errors
    ///
    /// Same as [`query`](Self::query), plus [`Error::Json`] if the payload
    /// does not match `T`.
    pub async fn query_as<T: DeserializeOwned>(
        &self,
        query: impl Into<String>,
        variables: Option<Value>,
    ) -> Result<T> {
        let response = self.query(query, variables).await?;
        Ok(serde_json::from_value(response)?)
    }

    /// Sends a query and unwraps the `{data, errors}` envelope.
    ///
    /// # Errors
    ///
    /// Same as [`query`](Self::query), plus [`Error::Executor`] if the
    /// response carries errors.
    pub async fn query_data(
        &self,
        query: impl Into<String>,
        variables: Option<Value>,
    ) -> Result<Value> {
        into_data(self.query(query, variables).await?)
    }

    /// Sends a prepared request.
    ///
    /// If the returned future is dropped mid-exchange the connection is
    /// removed from the pool rather than reused.
    ///
    /// # Errors
    ///
    /// See [`query`](Self::query).
    pub async fn send(&self, request: QueryRequest) -> Result<Value> {
        let connection = self.pool.checkout().await?;

        let outcome = match self.pool.options().query_timeout() {
            Some(limit) => timeout(limit, connection.round_trip(&request))
                .await
                .unwrap_or_else(|_| {
                    Err(Error::query_timeout(
                        u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    ))
                }),
            None => connection.round_trip(&request).await,
        };

        match &outcome {
            Ok(_) | Err(Error::Json(_)) => connection.release()?,
            Err(e) => {
                if e.is_timeout() {
                    warn!(connection_id = %connection.id(), error = %e, "Query timed out");
                } else {
                    debug!(connection_id = %connection.id(), error = %e, "Query failed");
                }
                connection.remove()?;
            }
        }

        outcome
    }

    /// Shuts down the pool.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

impl fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryClient")
            .field("status", &self.pool.status())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
