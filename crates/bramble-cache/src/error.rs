// SPDX-License-Identifier: Apache-2.0
//! Store error taxonomy.

use thiserror::Error;

use crate::patch::LayerId;

/// Errors surfaced by cache reads and optimistic-layer settlement.
///
/// A missing field never escapes to query consumers — the watcher layer
/// treats it as "cache cannot satisfy this query" and goes to the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A selected field is absent and no read fallback is registered.
    #[error("missing field `{field}` on {key}")]
    MissingField {
        /// Record the read stopped at.
        key: String,
        /// Storage field key that was absent.
        field: String,
    },
    /// A stored reference points at a record that no longer exists.
    #[error("dangling reference to {0}")]
    DanglingReference(String),
    /// Commit or discard named a layer that is not pending (settled twice,
    /// or never applied).
    #[error("unknown optimistic layer {0}")]
    UnknownLayer(LayerId),
}
