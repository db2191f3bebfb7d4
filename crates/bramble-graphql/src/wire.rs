// SPDX-License-Identifier: Apache-2.0
//! HTTP wire types for the GraphQL endpoint.
//!
//! One request body shape, one response envelope. The transport POSTs
//! [`GraphqlRequest`] as JSON and decodes [`GraphqlResponse`]; partial data
//! beside errors is legal and preserved.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request body: `{query, variables}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphqlRequest {
    /// Rendered operation source text.
    pub query: String,
    /// Variables object (may be an empty object).
    pub variables: Value,
}

impl GraphqlRequest {
    /// Builds a request body for `query` with `variables`.
    #[must_use]
    pub const fn new(query: String, variables: Value) -> Self {
        Self { query, variables }
    }
}

/// Response envelope: `{data?, errors?}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphqlResponse {
    /// Root data object; absent or null on total failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Structured server-side errors, possibly beside partial data.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphqlError>,
}

impl GraphqlResponse {
    /// Returns `true` when the server reported at least one error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// A single structured server error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphqlError {
    /// Human-readable message.
    pub message: String,
    /// Optional machine-readable details (e.g. an error code).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl GraphqlError {
    /// Builds an error with just a message.
    #[must_use]
    pub const fn new(message: String) -> Self {
        Self {
            message,
            extensions: None,
        }
    }
}

impl fmt::Display for GraphqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_data_and_errors_together() {
        let body = r#"{
            "data": {"projects": []},
            "errors": [{"message": "boom", "extensions": {"code": "INTERNAL"}}]
        }"#;
        let resp: GraphqlResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.data, Some(json!({"projects": []})));
        assert!(resp.has_errors());
        assert_eq!(resp.errors[0].message, "boom");
    }

    #[test]
    fn missing_errors_decodes_to_empty() {
        let resp: GraphqlResponse = serde_json::from_str(r#"{"data": null}"#).unwrap();
        assert!(!resp.has_errors());
        assert_eq!(resp.data, Some(Value::Null));
    }

    #[test]
    fn request_serializes_query_and_variables() {
        let req = GraphqlRequest::new("query Q { x }".into(), json!({"a": 1}));
        let body = serde_json::to_value(&req).unwrap();
        assert_eq!(body, json!({"query": "query Q { x }", "variables": {"a": 1}}));
    }
}
