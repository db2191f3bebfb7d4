// SPDX-License-Identifier: Apache-2.0
//! Client configuration.

use serde::{Deserialize, Serialize};

/// Endpoint used when neither the environment nor the caller supplies one.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8000/graphql/";

/// Environment variable that overrides the endpoint.
pub const ENDPOINT_ENV_VAR: &str = "BRAMBLE_GRAPHQL_URL";

/// Process-level client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// GraphQL endpoint receiving every request.
    pub endpoint: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

impl ClientConfig {
    /// Builds a config from the environment, falling back to the default
    /// endpoint.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            endpoint: std::env::var(ENDPOINT_ENV_VAR)
                .unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string()),
        }
    }
}
