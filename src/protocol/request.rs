//! Request and response payload types.
//!
//! Payloads travel as compact JSON between the frame markers.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{Error, Result};

// ============================================================================
// QueryRequest
// ============================================================================

/// A query request from client to server.
///
/// # Format
///
/// ```json
/// {
///   "query": "query users($scope: String!) { ... }",
///   "variables": { "scope": "expo" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Query source text. Opaque to this crate.
    pub query: String,

    /// Variable bindings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Map<String, Value>>,
}

impl QueryRequest {
    /// Creates a request without variables.
    #[inline]
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: None,
        }
    }

    /// Sets the variables from a JSON object. `null` clears them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for any other JSON value.
    pub fn with_variables(mut self, variables: Value) -> Result<Self> {
        self.variables = match variables {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                return Err(Error::config(format!(
                    "Query variables must be a JSON object, got {other}"
                )));
            }
        };
        Ok(self)
    }

    /// Adds a single variable binding.
    #[inline]
    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables
            .get_or_insert_with(Map::new)
            .insert(name.into(), value.into());
        self
    }

    /// Serializes to compact JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a request payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] on malformed JSON or a missing `query`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

// ============================================================================
// Response helpers
// ============================================================================

/// Builds the payload sent back when a request cannot be answered.
///
/// Shape: `{"errors":[{"message":"..."}]}`.
#[must_use]
pub fn error_payload(message: impl AsRef<str>) -> Value {
    json!({ "errors": [{ "message": message.as_ref() }] })
}

/// Splits a `{data, errors}` envelope.
///
/// Returns `data` (or `null`) when `errors` is absent or empty.
///
/// # Errors
///
/// Returns [`Error::Executor`] carrying the joined error messages.
pub fn into_data(response: Value) -> Result<Value> {
    let mut envelope = match response {
        Value::Object(envelope) => envelope,
        other => return Ok(other),
    };

    if let Some(Value::Array(errors)) = envelope.get("errors")
        && !errors.is_empty()
    {
        let messages: Vec<&str> = errors
            .iter()
            .map(|e| {
                e.get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
            })
            .collect();
        return Err(Error::executor(messages.join("; ")));
    }

    Ok(envelope.remove("data").unwrap_or(Value::Null))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = QueryRequest::new("Q").with_variable("a", 1);
        let json = String::from_utf8(request.to_bytes().expect("serialize")).expect("utf8");
        assert_eq!(json, r#"{"query":"Q","variables":{"a":1}}"#);
    }

    #[test]
    fn test_request_without_variables_omits_field() {
        let json = serde_json::to_string(&QueryRequest::new("{ scopes }")).expect("serialize");
        assert_eq!(json, r#"{"query":"{ scopes }"}"#);
    }

    #[test]
    fn test_request_from_bytes() {
        let request = QueryRequest::from_bytes(br#"{"query":"Q","variables":{"a":1}}"#)
            .expect("parse");
        assert_eq!(request.query, "Q");
        assert_eq!(request.variables.and_then(|v| v.get("a").cloned()), Some(json!(1)));
    }

    #[test]
    fn test_request_from_bytes_malformed() {
        let err = QueryRequest::from_bytes(b"{\"query\":").expect_err("malformed");
        assert!(matches!(err, Error::Json(_)));

        let err = QueryRequest::from_bytes(br#"{"variables":{}}"#).expect_err("no query");
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_with_variables_rejects_non_object() {
        let err = QueryRequest::new("Q")
            .with_variables(json!([1, 2]))
            .expect_err("array");
        assert!(matches!(err, Error::Config { .. }));

        let err = QueryRequest::new("Q")
            .with_variables(json!("scope"))
            .expect_err("string");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_with_variables_null_clears() {
        let request = QueryRequest::new("Q")
            .with_variable("a", 1)
            .with_variables(Value::Null)
            .expect("null");
        assert!(request.variables.is_none());

        let request = QueryRequest::new("Q")
            .with_variables(json!({ "a": 1 }))
            .expect("object");
        assert_eq!(request.variables.expect("set")["a"], 1);
    }

    #[test]
    fn test_error_payload_shape() {
        assert_eq!(
            error_payload("boom"),
            json!({ "errors": [{ "message": "boom" }] })
        );
    }

    #[test]
    fn test_into_data() {
        let data = into_data(json!({ "data": { "scope": { "users": [] } } })).expect("data");
        assert_eq!(data, json!({ "scope": { "users": [] } }));

        let data = into_data(json!({ "data": 1, "errors": [] })).expect("empty errors");
        assert_eq!(data, json!(1));

        let err = into_data(error_payload("no scope")).expect_err("errors");
        assert_eq!(err.to_string(), "Executor error: no scope");
    }
}
