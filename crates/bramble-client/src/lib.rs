// SPDX-License-Identifier: Apache-2.0
//! bramble-client: GraphQL client runtime.
//!
//! Wires one [`bramble_cache::NormalizedStore`] and one request pipeline
//! into live query watchers and an optimistic mutation executor. The model
//! is single-threaded and event-driven: store writes and watcher
//! notifications run to completion on the writing thread, suspension
//! happens only while awaiting the transport, and multiple in-flight
//! requests interleave at await points with their store effects applied
//! atomically.

pub mod client;
pub mod config;
pub mod error;
pub mod mutation;
pub mod pipeline;
pub mod tenant;
pub mod watch;

pub use client::{default_type_policies, Client, QueryData};
pub use config::{ClientConfig, DEFAULT_ENDPOINT, ENDPOINT_ENV_VAR};
pub use error::{MutationError, NetworkError};
pub use mutation::{provisional_id, ListSplice, MutationExecutor, OptimisticPatch, RefetchSpec};
pub use pipeline::{
    HttpTransport, RequestPipeline, Stage, Transport, TransportFuture, ORG_SLUG_HEADER,
};
pub use tenant::{TenantContext, DEFAULT_ORG_SLUG};
pub use watch::{
    ErrorPolicy, FetchPolicy, QueryEvent, WatchHandle, WatchOptions, WatchState, WatcherRegistry,
};
