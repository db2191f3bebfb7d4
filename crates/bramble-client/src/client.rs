// SPDX-License-Identifier: Apache-2.0
//! The client facade.
//!
//! One `Client` per process: it constructs the pipeline, the store with its
//! policy table, the watcher registry, and the mutation executor once, and
//! injects them by reference everywhere. There is no hidden module-level
//! mutable state; everything lives behind this value.

use std::sync::Arc;

use bramble_cache::{FieldPolicy, NormalizedStore, TypePolicyRegistry};
use bramble_graphql::{Document, GraphqlError};
use serde_json::Value;

use crate::config::ClientConfig;
use crate::error::{MutationError, NetworkError};
use crate::mutation::{MutationExecutor, OptimisticPatch, RefetchSpec};
use crate::pipeline::{HttpTransport, RequestPipeline, Transport};
use crate::tenant::TenantContext;
use crate::watch::{QueryEvent, WatchHandle, WatchOptions, WatcherRegistry};

/// Result of a one-shot query: data beside any errors (`errorPolicy=all`).
#[derive(Debug, Clone)]
pub struct QueryData {
    /// Root data object, possibly partial.
    pub data: Option<Value>,
    /// Structured server errors, possibly beside partial data.
    pub errors: Vec<GraphqlError>,
}

/// Identity and field policies of the product schema: `Project` and `Task`
/// normalize by `id`; the root list fields replace on write and read as
/// empty when absent. Everything else stays inline.
#[must_use]
pub fn default_type_policies() -> TypePolicyRegistry {
    TypePolicyRegistry::builder()
        .keyed("Project", &["id"])
        .keyed("Task", &["id"])
        .field("Query", "projects", FieldPolicy::replace_list())
        .field("Query", "tasks", FieldPolicy::replace_list())
        .build()
}

/// Process-wide GraphQL client: normalized cache, live watchers, optimistic
/// mutations.
#[derive(Debug)]
pub struct Client {
    store: Arc<NormalizedStore>,
    pipeline: Arc<RequestPipeline>,
    watchers: Arc<WatcherRegistry>,
    mutations: MutationExecutor,
    tenant: TenantContext,
}

impl Client {
    /// Builds a client with the HTTP transport.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self::with_transport(config, Arc::new(HttpTransport::new()))
    }

    /// Builds a client over an explicit transport (tests inject scripted
    /// ones here).
    #[must_use]
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let tenant = TenantContext::default();
        let store = Arc::new(NormalizedStore::new(Arc::new(default_type_policies())));
        let pipeline = Arc::new(RequestPipeline::new(
            config.endpoint,
            tenant.clone(),
            transport,
        ));
        let watchers = WatcherRegistry::new(Arc::clone(&store), Arc::clone(&pipeline));
        let mutations = MutationExecutor::new(
            Arc::clone(&store),
            Arc::clone(&pipeline),
            Arc::clone(&watchers),
        );
        Self {
            store,
            pipeline,
            watchers,
            mutations,
            tenant,
        }
    }

    /// Watches a query: the callback receives the current result now (per
    /// the fetch policy) and again after every relevant store write. Must
    /// be called within a tokio runtime.
    pub fn watch(
        &self,
        document: Document,
        variables: Value,
        options: WatchOptions,
        callback: impl FnMut(QueryEvent) + Send + 'static,
    ) -> WatchHandle {
        self.watchers.watch(document, variables, options, callback)
    }

    /// Runs a one-shot query against the network, writes the result into
    /// the cache, and returns data beside any errors.
    pub async fn query(
        &self,
        document: &Document,
        variables: Value,
    ) -> Result<QueryData, NetworkError> {
        let response = self.pipeline.execute(document, variables.clone()).await?;
        let data = response.data.filter(|d| !d.is_null());
        if let Some(data) = &data {
            let patches = self
                .store
                .normalize(&document.selection, &variables, data);
            self.store.apply(patches);
        }
        Ok(QueryData {
            data,
            errors: response.errors,
        })
    }

    /// Executes a mutation, optionally optimistic, with declarative refetch
    /// side effects.
    pub async fn mutate(
        &self,
        document: &Document,
        variables: Value,
        optimistic: Option<OptimisticPatch>,
        side_effects: Vec<RefetchSpec>,
    ) -> Result<Value, MutationError> {
        self.mutations
            .mutate(document, variables, optimistic, side_effects)
            .await
    }

    /// The ambient tenant context attached to every outbound request.
    #[must_use]
    pub fn tenant(&self) -> &TenantContext {
        &self.tenant
    }

    /// The shared normalized store.
    #[must_use]
    pub fn store(&self) -> &Arc<NormalizedStore> {
        &self.store
    }

    /// The outbound request pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &Arc<RequestPipeline> {
        &self.pipeline
    }
}
