// SPDX-License-Identifier: Apache-2.0
//! Client error taxonomy.
//!
//! `NetworkError` is a transport failure with no server response;
//! GraphQL-level errors arrive inside the response envelope and surface
//! through [`MutationError::Graphql`] or a query event's error list. No
//! failure is fatal to the process — each is local to one operation and the
//! store is left in a previously valid state.

use bramble_cache::StoreError;
use bramble_graphql::GraphqlError;
use thiserror::Error;

/// Transport-level failure: the request never produced a usable response.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// The HTTP layer failed (connect, send, or body decode).
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    /// The server answered outside the 2xx range.
    #[error("server answered with status {0}")]
    Status(u16),
    /// The request body could not be encoded.
    #[error("malformed request body: {0}")]
    Encode(#[from] serde_json::Error),
    /// The pipeline was built without a transport stage.
    #[error("pipeline has no transport stage")]
    NoTransport,
}

/// Failure of one mutation. The optimistic layer, if any, has already been
/// discarded when this is returned.
#[derive(Debug, Error)]
pub enum MutationError {
    /// The request never reached a response.
    #[error("network failure: {0}")]
    Network(#[from] NetworkError),
    /// The server rejected the mutation with structured errors.
    #[error("server rejected the mutation ({} errors)", .0.len())]
    Graphql(Vec<GraphqlError>),
    /// The response carried neither data nor errors.
    #[error("mutation response contained no data")]
    MissingData,
    /// The optimistic patch names a type without registered key fields, so
    /// no watcher could observe its commit-time identity rewrite.
    #[error("optimistic patch targets unkeyed type `{0}`")]
    UnkeyedOptimistic(String),
    /// Layer settlement failed inside the store.
    #[error(transparent)]
    Store(#[from] StoreError),
}
