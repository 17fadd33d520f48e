//! Executor seam.
//!
//! The server hands every complete request to an [`Executor`] and frames
//! whatever it returns. Query semantics live entirely behind this trait.
//!
//! # Example
//!
//! ```
//! use query_spool::executor::executor_fn;
//! use serde_json::json;
//!
//! let executor = executor_fn(|request| async move {
//!     Ok(json!({ "data": { "echo": request.query } }))
//! });
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::protocol::QueryRequest;

// ============================================================================
// Executor
// ============================================================================

/// Turns a parsed request into a result payload.
///
/// Returning `Err` does not tear down the connection; the server answers
/// with an error payload instead.
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    /// Executes one request.
    async fn execute(&self, request: QueryRequest) -> Result<Value>;
}

// ============================================================================
// FnExecutor
// ============================================================================

/// [`Executor`] backed by an async closure.
pub struct FnExecutor<F> {
    f: F,
}

/// Wraps an async closure as an [`Executor`].
#[inline]
#[must_use]
pub fn executor_fn<F, Fut>(f: F) -> FnExecutor<F>
where
    F: Fn(QueryRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    FnExecutor { f }
}

#[async_trait]
impl<F, Fut> Executor for FnExecutor<F>
where
    F: Fn(QueryRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn execute(&self, request: QueryRequest) -> Result<Value> {
        (self.f)(request).await
    }
}

// ============================================================================
// Tests
// ============================================================================
