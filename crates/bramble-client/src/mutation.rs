// SPDX-License-Identifier: Apache-2.0
//! Optimistic mutations.
//!
//! A mutation may carry an [`OptimisticPatch`]: a provisional entity plus
//! the root lists it should appear in. The patch becomes an optimistic
//! layer before the network call starts, so every active watcher reflects
//! it within the same tick. Settlement either commits the layer (replacing
//! the provisional identity with the server-assigned one everywhere it is
//! still referenced) or discards it, restoring the pre-mutation view.
//! Declared refetches start only after settlement.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bramble_cache::{
    field_key, EntityKey, FieldMap, FieldValue, LayerId, NormalizedStore, PatchSet, RootSplice,
    SplicePosition, StoreKey,
};
use bramble_graphql::{Document, TYPENAME_FIELD};
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::error::MutationError;
use crate::pipeline::RequestPipeline;
use crate::watch::WatcherRegistry;

/// Generates a provisional entity id for an optimistic create.
#[must_use]
pub fn provisional_id() -> String {
    format!("temp-{}", Uuid::new_v4())
}

/// Membership of the optimistic entity in one root list.
#[derive(Debug, Clone)]
pub struct ListSplice {
    /// Root field name, e.g. `tasks`.
    pub field: String,
    /// Field arguments, e.g. `{"projectId": "p1"}`.
    pub args: Option<Value>,
    /// Where the entity lands (new projects lead, new tasks trail).
    pub position: SplicePosition,
}

/// A speculative result applied before the server answers: entity type,
/// provisional identity, field set, and list memberships. Decoupled from
/// any particular call site.
#[derive(Debug, Clone)]
pub struct OptimisticPatch {
    /// Concrete type of the provisional entity; must have registered key
    /// fields.
    pub typename: String,
    /// Locally generated identity, replaced by the server's on commit.
    pub provisional_id: String,
    /// Entity fields as they should read until the server answers.
    pub fields: Map<String, Value>,
    /// Root lists the provisional entity joins.
    pub splices: Vec<ListSplice>,
}

impl OptimisticPatch {
    /// Builds a patch for a provisional entity.
    #[must_use]
    pub fn new(
        typename: impl Into<String>,
        provisional_id: impl Into<String>,
        fields: Map<String, Value>,
    ) -> Self {
        Self {
            typename: typename.into(),
            provisional_id: provisional_id.into(),
            fields,
            splices: Vec::new(),
        }
    }

    /// Adds a root-list membership.
    #[must_use]
    pub fn splice(mut self, field: impl Into<String>, args: Option<Value>, position: SplicePosition) -> Self {
        self.splices.push(ListSplice {
            field: field.into(),
            args,
            position,
        });
        self
    }
}

/// A query to re-run after the mutation settles, for effects the store's
/// normalization cannot infer (e.g. membership criteria living server-side).
#[derive(Debug, Clone)]
pub struct RefetchSpec {
    /// Document identifying the query entry.
    pub document: Document,
    /// Variables identifying the query entry.
    pub variables: Value,
}

impl RefetchSpec {
    /// Builds a refetch spec.
    #[must_use]
    pub const fn new(document: Document, variables: Value) -> Self {
        Self { document, variables }
    }
}

/// Runs mutations against the shared store and pipeline.
pub struct MutationExecutor {
    store: Arc<NormalizedStore>,
    pipeline: Arc<RequestPipeline>,
    watchers: Arc<WatcherRegistry>,
    next_layer: AtomicU64,
}

impl MutationExecutor {
    /// Wires an executor onto the process-wide store, pipeline, and watcher
    /// registry.
    #[must_use]
    pub fn new(
        store: Arc<NormalizedStore>,
        pipeline: Arc<RequestPipeline>,
        watchers: Arc<WatcherRegistry>,
    ) -> Self {
        Self {
            store,
            pipeline,
            watchers,
            next_layer: AtomicU64::new(1),
        }
    }

    /// Executes a mutation.
    ///
    /// With an optimistic patch, the layer is pushed synchronously before
    /// the network call; commit/discard ordering across overlapping
    /// mutations follows completion order, not submission order
    /// (last-settled-wins). Returns the mutation payload on success.
    pub async fn mutate(
        &self,
        document: &Document,
        variables: Value,
        optimistic: Option<OptimisticPatch>,
        side_effects: Vec<RefetchSpec>,
    ) -> Result<Value, MutationError> {
        let layer = match optimistic {
            Some(patch) => Some(self.push_layer(patch)?),
            None => None,
        };

        let outcome = self.pipeline.execute(document, variables.clone()).await;
        let response = match outcome {
            Ok(response) => response,
            Err(error) => {
                self.discard(layer.as_ref());
                return Err(error.into());
            }
        };
        if response.has_errors() {
            self.discard(layer.as_ref());
            return Err(MutationError::Graphql(response.errors));
        }
        let Some(data) = response.data.filter(|d| !d.is_null()) else {
            self.discard(layer.as_ref());
            return Err(MutationError::MissingData);
        };

        let (mut real, primary) =
            self.store
                .normalize_entities(&document.selection, &variables, &data);
        match layer {
            Some(pending) => {
                if let Some(server) = primary {
                    for splice in &pending.splices {
                        real.push_splice(RootSplice {
                            field: field_key(&splice.field, splice.args.as_ref()),
                            position: splice.position,
                            insert: FieldValue::Ref(server.clone()),
                        });
                    }
                    self.store.commit_optimistic(
                        pending.id,
                        real,
                        Some((&pending.provisional, &server)),
                    )?;
                    debug!(operation = document.name, layer = %pending.id,
                        provisional = %pending.provisional, server = %server,
                        "mutation committed");
                } else {
                    // No keyable payload entity (e.g. a bare success flag):
                    // nothing to rewrite.
                    self.store.commit_optimistic(pending.id, real, None)?;
                    debug!(operation = document.name, layer = %pending.id, "mutation committed");
                }
            }
            None => self.store.apply(real),
        }

        // Refetches never observe a transient optimistic state from this
        // mutation: they start strictly after commit/discard, and they are
        // fire-and-forget relative to this future.
        for spec in &side_effects {
            self.watchers.refetch_matching(&spec.document, &spec.variables);
        }

        Ok(data)
    }

    /// Pushes the optimistic layer and returns its bookkeeping.
    fn push_layer(&self, patch: OptimisticPatch) -> Result<PendingLayer, MutationError> {
        if !self.store.registry().is_normalized(&patch.typename) {
            return Err(MutationError::UnkeyedOptimistic(patch.typename));
        }
        let id = LayerId::from_raw(self.next_layer.fetch_add(1, Ordering::SeqCst));
        let provisional = EntityKey::new(patch.typename.clone(), patch.provisional_id.clone());

        let mut fields = FieldMap::new();
        for (name, value) in &patch.fields {
            fields.insert(name.clone(), json_to_field_value(value));
        }
        fields.insert(
            "id".to_string(),
            FieldValue::Scalar(Value::String(patch.provisional_id.clone())),
        );
        fields.insert(
            TYPENAME_FIELD.to_string(),
            FieldValue::Scalar(Value::String(patch.typename.clone())),
        );

        let mut patches = PatchSet::new();
        patches.push_write(StoreKey::Entity(provisional.clone()), fields);
        for splice in &patch.splices {
            patches.push_splice(RootSplice {
                field: field_key(&splice.field, splice.args.as_ref()),
                position: splice.position,
                insert: FieldValue::Ref(provisional.clone()),
            });
        }
        self.store.apply_optimistic(id, patches);
        debug!(layer = %id, provisional = %provisional, "optimistic layer pushed");
        Ok(PendingLayer {
            id,
            provisional,
            splices: patch.splices,
        })
    }

    fn discard(&self, layer: Option<&PendingLayer>) {
        if let Some(pending) = layer {
            // The layer can only be missing if it was already settled, which
            // a failing mutation never does; ignore that impossibility.
            let _ = self.store.discard_optimistic(pending.id);
            debug!(layer = %pending.id, "optimistic layer rolled back");
        }
    }
}

impl std::fmt::Debug for MutationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationExecutor")
            .field("next_layer", &self.next_layer)
            .finish()
    }
}

struct PendingLayer {
    id: LayerId,
    provisional: EntityKey,
    splices: Vec<ListSplice>,
}

/// Converts a JSON value into a stored field value. Optimistic fields are
/// taken as-is: objects stay inline, nothing normalizes.
fn json_to_field_value(value: &Value) -> FieldValue {
    match value {
        Value::Null => FieldValue::Null,
        Value::Array(items) => FieldValue::List(items.iter().map(json_to_field_value).collect()),
        Value::Object(map) => FieldValue::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_field_value(v)))
                .collect(),
        ),
        scalar => FieldValue::Scalar(scalar.clone()),
    }
}
