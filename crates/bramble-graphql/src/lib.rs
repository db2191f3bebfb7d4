// SPDX-License-Identifier: Apache-2.0
//! bramble-graphql: operation documents and wire schema for the bramble
//! client.
//!
//! This crate is pure data: documents as values, deterministic rendering to
//! source text, the `{query, variables}` / `{data, errors}` wire shapes, and
//! a canonical variable encoding used as the identity of a query entry. It
//! performs no I/O and holds no state.

pub mod document;
pub mod ops;
pub mod vars;
pub mod wire;

pub use document::{Argument, Document, Field, OperationKind, VariableDef, TYPENAME_FIELD};
pub use wire::{GraphqlError, GraphqlRequest, GraphqlResponse};
