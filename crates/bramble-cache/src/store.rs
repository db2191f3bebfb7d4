// SPDX-License-Identifier: Apache-2.0
//! The normalized store: one base record map plus a stack of optimistic
//! layers.
//!
//! All mutation paths funnel through [`PatchSet`] application under a write
//! gate, so readers observe either none or all of a set, and change
//! notifications go out in exactly the order writes land. Optimistic layers
//! are kept strictly apart from the base map: reads resolve layers top-down
//! with the base last, and settlement (commit/discard) removes a layer in
//! the same atomic step that applies or drops its server-authoritative
//! replacement.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bramble_graphql::{Field, TYPENAME_FIELD};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::StoreError;
use crate::key::{bound_field_key, field_base_name, EntityKey, StoreKey};
use crate::patch::{EntityWrite, LayerId, PatchSet, RootSplice, SplicePosition};
use crate::policy::{MergePolicy, ReadPolicy, TypePolicyRegistry};
use crate::value::{FieldMap, FieldValue};

/// Locks a mutex, recovering the inner data if a holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One store write, as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    /// Monotonic write sequence number.
    pub version: u64,
    /// Every record the write touched.
    pub touched: BTreeSet<StoreKey>,
}

/// Handle for removing a change subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type ChangeCallback = Arc<dyn Fn(&ChangeSet) + Send + Sync>;

/// A traced read: the materialized data plus every record it depended on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutput {
    /// Materialized selection result.
    pub data: Value,
    /// Records whose future writes invalidate this result.
    pub dependencies: BTreeSet<StoreKey>,
}

#[derive(Debug, Clone)]
struct OptimisticLayer {
    id: LayerId,
    patches: PatchSet,
}

#[derive(Debug, Default)]
struct State {
    base: BTreeMap<StoreKey, FieldMap>,
    layers: Vec<OptimisticLayer>,
}

impl State {
    /// Looks up a field through the layer stack, newest layer first, base
    /// last. A layer eviction masks the entity entirely.
    fn effective_field(&self, key: &StoreKey, field: &str) -> Option<&FieldValue> {
        for layer in self.layers.iter().rev() {
            if let StoreKey::Entity(entity) = key {
                if layer.patches.evictions.contains(entity) {
                    return None;
                }
            }
            for write in layer.patches.writes.iter().rev() {
                if &write.key == key {
                    if let Some(value) = write.fields.get(field) {
                        return Some(value);
                    }
                }
            }
        }
        self.base.get(key)?.get(field)
    }

    /// Returns `true` when any layer or the base holds a record for `key`.
    fn record_exists(&self, key: &StoreKey) -> bool {
        for layer in self.layers.iter().rev() {
            if let StoreKey::Entity(entity) = key {
                if layer.patches.evictions.contains(entity) {
                    return false;
                }
            }
            if layer.patches.writes.iter().any(|w| &w.key == key) {
                return true;
            }
        }
        self.base.contains_key(key)
    }

    /// Merges a patch set into the base map. Last-write-wins per leaf;
    /// list-valued fields go through the registered merge policy.
    fn apply_base(&mut self, registry: &TypePolicyRegistry, patches: PatchSet) {
        for EntityWrite { key, fields } in patches.writes {
            let typename = typename_of(&key);
            let record = self.base.entry(key).or_default();
            for (field, incoming) in fields {
                merge_field(registry, &typename, record, field, incoming);
            }
        }
        for splice in patches.splices {
            let record = self.base.entry(StoreKey::Root).or_default();
            let existing = match record.get(&splice.field) {
                Some(FieldValue::List(items)) => items.clone(),
                _ => Vec::new(),
            };
            let spliced = splice_into(existing, &splice);
            record.insert(splice.field, FieldValue::List(spliced));
        }
        for eviction in patches.evictions {
            self.base.remove(&StoreKey::Entity(eviction));
        }
    }

    /// Resolves a layer's splices against the current effective view, so the
    /// layer becomes a plain set of record writes.
    fn resolve_layer(&self, patches: PatchSet) -> PatchSet {
        let mut resolved = PatchSet {
            writes: patches.writes,
            splices: Vec::new(),
            evictions: patches.evictions,
        };
        for splice in patches.splices {
            let existing = match self.effective_field(&StoreKey::Root, &splice.field) {
                Some(FieldValue::List(items)) => items.clone(),
                _ => Vec::new(),
            };
            resolved.writes.push(EntityWrite {
                key: StoreKey::Root,
                fields: FieldMap::from([(
                    splice.field.clone(),
                    FieldValue::List(splice_into(existing, &splice)),
                )]),
            });
        }
        resolved
    }
}

fn typename_of(key: &StoreKey) -> String {
    match key {
        StoreKey::Root => "Query".to_string(),
        StoreKey::Entity(entity) => entity.typename().to_string(),
    }
}

fn merge_field(
    registry: &TypePolicyRegistry,
    typename: &str,
    record: &mut FieldMap,
    field: String,
    incoming: FieldValue,
) {
    let policy = registry.field_policy(typename, field_base_name(&field));
    match policy.merge {
        MergePolicy::Replace => {
            record.insert(field, incoming);
        }
        MergePolicy::Append => {
            let merged = match (record.remove(&field), incoming) {
                (Some(FieldValue::List(mut existing)), FieldValue::List(new)) => {
                    existing.extend(new);
                    FieldValue::List(existing)
                }
                (_, incoming) => incoming,
            };
            record.insert(field, merged);
        }
        MergePolicy::Custom(merge) => {
            let merged = merge(record.get(&field), incoming);
            record.insert(field, merged);
        }
    }
}

fn splice_into(mut items: Vec<FieldValue>, splice: &RootSplice) -> Vec<FieldValue> {
    if items.contains(&splice.insert) {
        return items;
    }
    match splice.position {
        SplicePosition::Prepend => items.insert(0, splice.insert.clone()),
        SplicePosition::Append => items.push(splice.insert.clone()),
    }
    items
}

/// Canonical key-value store of entity records, shared by every watcher and
/// mutation in the process.
pub struct NormalizedStore {
    registry: Arc<TypePolicyRegistry>,
    state: Mutex<State>,
    /// Serializes apply-then-notify sequences so notification order equals
    /// write order. Readers never take this.
    write_gate: Mutex<()>,
    subscribers: Mutex<Vec<(SubscriptionId, ChangeCallback)>>,
    next_subscription: AtomicU64,
    version: AtomicU64,
}

impl NormalizedStore {
    /// Creates an empty store governed by `registry`.
    #[must_use]
    pub fn new(registry: Arc<TypePolicyRegistry>) -> Self {
        Self {
            registry,
            state: Mutex::new(State::default()),
            write_gate: Mutex::new(()),
            subscribers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            version: AtomicU64::new(0),
        }
    }

    /// The policy table this store was built with.
    #[must_use]
    pub fn registry(&self) -> &TypePolicyRegistry {
        &self.registry
    }

    /// Write sequence number of the most recent applied change.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Registers a synchronous change callback.
    ///
    /// Callbacks run on the writing thread, in write order, after the write
    /// is fully applied; they may read the store but must not write it.
    pub fn subscribe(&self, callback: impl Fn(&ChangeSet) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        lock(&self.subscribers).push((id, Arc::new(callback)));
        id
    }

    /// Removes a change callback.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        lock(&self.subscribers).retain(|(sub, _)| *sub != id);
    }

    /// Applies a patch set to the base map atomically and notifies.
    pub fn apply(&self, patches: PatchSet) {
        if patches.is_empty() {
            return;
        }
        let gate = lock(&self.write_gate);
        let touched = patches.touched();
        lock(&self.state).apply_base(&self.registry, patches);
        self.notify(&gate, touched);
    }

    /// Pushes an optimistic layer on top of the stack atomically and
    /// notifies. The base map is not modified.
    pub fn apply_optimistic(&self, layer: LayerId, patches: PatchSet) {
        let gate = lock(&self.write_gate);
        let touched = patches.touched();
        {
            let mut state = lock(&self.state);
            let resolved = state.resolve_layer(patches);
            state.layers.push(OptimisticLayer {
                id: layer,
                patches: resolved,
            });
        }
        debug!(layer = %layer, "optimistic layer applied");
        self.notify(&gate, touched);
    }

    /// Removes a pending layer, restoring the pre-apply view of every record
    /// it touched.
    pub fn discard_optimistic(&self, layer: LayerId) -> Result<(), StoreError> {
        let gate = lock(&self.write_gate);
        let touched = {
            let mut state = lock(&self.state);
            let index = state
                .layers
                .iter()
                .position(|l| l.id == layer)
                .ok_or(StoreError::UnknownLayer(layer))?;
            state.layers.remove(index).patches.touched()
        };
        debug!(layer = %layer, "optimistic layer discarded");
        self.notify(&gate, touched);
        Ok(())
    }

    /// Replaces a pending layer with server-authoritative patches in one
    /// atomic step.
    ///
    /// When `alias` is given as `(provisional, server)`, every reference to
    /// the provisional key still held by later layers is rewritten to the
    /// server key before `real` lands in the base map; no reachable record
    /// keeps the provisional identity afterwards.
    pub fn commit_optimistic(
        &self,
        layer: LayerId,
        real: PatchSet,
        alias: Option<(&EntityKey, &EntityKey)>,
    ) -> Result<(), StoreError> {
        let gate = lock(&self.write_gate);
        let mut touched = real.touched();
        {
            let mut state = lock(&self.state);
            let index = state
                .layers
                .iter()
                .position(|l| l.id == layer)
                .ok_or(StoreError::UnknownLayer(layer))?;
            let removed = state.layers.remove(index);
            touched.extend(removed.patches.touched());
            if let Some((provisional, server)) = alias {
                for pending in &mut state.layers {
                    if pending.patches.rewrite_ref(provisional, server) {
                        touched.extend(pending.patches.touched());
                    }
                }
                touched.insert(StoreKey::Entity(provisional.clone()));
                touched.insert(StoreKey::Entity(server.clone()));
            }
            state.apply_base(&self.registry, real);
        }
        debug!(layer = %layer, "optimistic layer committed");
        self.notify(&gate, touched);
        Ok(())
    }

    /// Reads a selection set rooted at the query root.
    pub fn read(&self, selection: &[Field], variables: &Value) -> Result<Value, StoreError> {
        self.read_traced(selection, variables).map(|out| out.data)
    }

    /// Reads a selection set and reports the records the result depends on.
    pub fn read_traced(
        &self,
        selection: &[Field],
        variables: &Value,
    ) -> Result<ReadOutput, StoreError> {
        let state = lock(&self.state);
        let mut dependencies = BTreeSet::from([StoreKey::Root]);
        let mut out = Map::new();
        for field in selection {
            let value = self.materialize_field(
                &state,
                &StoreKey::Root,
                "Query",
                field,
                variables,
                &mut dependencies,
            )?;
            out.insert(field.name.to_string(), value);
        }
        Ok(ReadOutput {
            data: Value::Object(out),
            dependencies,
        })
    }

    fn materialize_field(
        &self,
        state: &State,
        key: &StoreKey,
        typename: &str,
        field: &Field,
        variables: &Value,
        deps: &mut BTreeSet<StoreKey>,
    ) -> Result<Value, StoreError> {
        let storage = bound_field_key(field, variables);
        let stored = state.effective_field(key, &storage).cloned();
        let observed = match self.registry.field_policy(typename, field.name).read {
            ReadPolicy::Default => stored,
            ReadPolicy::EmptyList => stored.or_else(|| Some(FieldValue::List(Vec::new()))),
            ReadPolicy::Custom(read) => read(stored.as_ref()),
        };
        let Some(value) = observed else {
            return Err(StoreError::MissingField {
                key: key.to_string(),
                field: storage,
            });
        };
        self.resolve_value(state, &value, &field.selection, variables, deps)
    }

    fn resolve_value(
        &self,
        state: &State,
        value: &FieldValue,
        selection: &[Field],
        variables: &Value,
        deps: &mut BTreeSet<StoreKey>,
    ) -> Result<Value, StoreError> {
        match value {
            FieldValue::Null => Ok(Value::Null),
            FieldValue::Scalar(scalar) => Ok(scalar.clone()),
            FieldValue::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.resolve_value(state, item, selection, variables, deps)?);
                }
                Ok(Value::Array(out))
            }
            FieldValue::Ref(entity) => {
                let key = StoreKey::Entity(entity.clone());
                deps.insert(key.clone());
                if !state.record_exists(&key) {
                    return Err(StoreError::DanglingReference(entity.to_string()));
                }
                let mut out = Map::new();
                for field in selection {
                    let value = self.materialize_field(
                        state,
                        &key,
                        entity.typename(),
                        field,
                        variables,
                        deps,
                    )?;
                    out.insert(field.name.to_string(), value);
                }
                Ok(Value::Object(out))
            }
            FieldValue::Object(fields) => {
                let typename = fields
                    .get(TYPENAME_FIELD)
                    .and_then(|v| match v {
                        FieldValue::Scalar(Value::String(s)) => Some(s.clone()),
                        _ => None,
                    })
                    .unwrap_or_default();
                let mut out = Map::new();
                for field in selection {
                    let storage = bound_field_key(field, variables);
                    let stored = fields.get(&storage).cloned();
                    let observed = match self.registry.field_policy(&typename, field.name).read {
                        ReadPolicy::Default => stored,
                        ReadPolicy::EmptyList => {
                            stored.or_else(|| Some(FieldValue::List(Vec::new())))
                        }
                        ReadPolicy::Custom(read) => read(stored.as_ref()),
                    };
                    let Some(value) = observed else {
                        return Err(StoreError::MissingField {
                            key: format!("inline {typename}"),
                            field: storage,
                        });
                    };
                    out.insert(
                        field.name.to_string(),
                        self.resolve_value(state, &value, &field.selection, variables, deps)?,
                    );
                }
                Ok(Value::Object(out))
            }
        }
    }

    /// Normalizes a query response into a patch set: entity records for
    /// every keyable object plus root-field writes for the selection.
    ///
    /// Fields absent from `data` (partial responses) are skipped, never
    /// written as null.
    #[must_use]
    pub fn normalize(&self, selection: &[Field], variables: &Value, data: &Value) -> PatchSet {
        let mut patches = PatchSet::new();
        let Some(object) = data.as_object() else {
            return patches;
        };
        let mut root = FieldMap::new();
        for field in selection {
            if let Some(value) = object.get(field.name) {
                let stored =
                    self.normalize_value(value, &field.selection, variables, &mut patches);
                root.insert(bound_field_key(field, variables), stored);
            }
        }
        if !root.is_empty() {
            patches.push_write(StoreKey::Root, root);
        }
        patches
    }

    /// Normalizes a mutation response: entity records only, no root-field
    /// writes. Returns the patch set and the payload's primary entity (the
    /// first keyable object encountered), which carries the
    /// server-assigned identity for commit-time rewrites.
    #[must_use]
    pub fn normalize_entities(
        &self,
        selection: &[Field],
        variables: &Value,
        data: &Value,
    ) -> (PatchSet, Option<EntityKey>) {
        let mut patches = PatchSet::new();
        if let Some(object) = data.as_object() {
            for field in selection {
                if let Some(value) = object.get(field.name) {
                    self.normalize_value(value, &field.selection, variables, &mut patches);
                }
            }
        }
        let primary = patches.writes.iter().find_map(|write| match &write.key {
            StoreKey::Entity(entity) => Some(entity.clone()),
            StoreKey::Root => None,
        });
        (patches, primary)
    }

    fn normalize_value(
        &self,
        value: &Value,
        selection: &[Field],
        variables: &Value,
        patches: &mut PatchSet,
    ) -> FieldValue {
        match value {
            Value::Null => FieldValue::Null,
            Value::Array(items) => FieldValue::List(
                items
                    .iter()
                    .map(|item| self.normalize_value(item, selection, variables, patches))
                    .collect(),
            ),
            Value::Object(object) => {
                let fields = self.normalize_object(object, selection, variables, patches);
                let keyed = object
                    .get(TYPENAME_FIELD)
                    .and_then(Value::as_str)
                    .and_then(|typename| self.registry.entity_key(typename, object));
                match keyed {
                    Some(entity) => {
                        patches.push_write(StoreKey::Entity(entity.clone()), fields);
                        FieldValue::Ref(entity)
                    }
                    None => FieldValue::Object(fields),
                }
            }
            scalar => FieldValue::Scalar(scalar.clone()),
        }
    }

    fn normalize_object(
        &self,
        object: &Map<String, Value>,
        selection: &[Field],
        variables: &Value,
        patches: &mut PatchSet,
    ) -> FieldMap {
        let mut fields = FieldMap::new();
        for field in selection {
            if let Some(value) = object.get(field.name) {
                fields.insert(
                    bound_field_key(field, variables),
                    self.normalize_value(value, &field.selection, variables, patches),
                );
            }
        }
        // The renderer requests __typename on every object even though the
        // selection values don't carry it; keep the discriminator stored.
        if let Some(typename) = object.get(TYPENAME_FIELD) {
            fields.insert(
                TYPENAME_FIELD.to_string(),
                FieldValue::Scalar(typename.clone()),
            );
        }
        fields
    }

    /// Effective (layered) snapshot of one entity's fields, for diagnostics
    /// and tests. Later layers overwrite earlier fields wholesale; merge
    /// policies are not consulted.
    #[must_use]
    pub fn entity_snapshot(&self, entity: &EntityKey) -> Option<FieldMap> {
        let state = lock(&self.state);
        let key = StoreKey::Entity(entity.clone());
        if !state.record_exists(&key) {
            return None;
        }
        let mut snapshot = state.base.get(&key).cloned().unwrap_or_default();
        for layer in &state.layers {
            if layer.patches.evictions.contains(entity) {
                snapshot.clear();
            }
            for write in &layer.patches.writes {
                if write.key == key {
                    snapshot.extend(write.fields.clone());
                }
            }
        }
        Some(snapshot)
    }

    /// Removes base entities unreachable from the query root and every
    /// pending layer. Collection is explicit and may be deferred
    /// indefinitely; reachable results are unaffected.
    pub fn collect_garbage(&self) -> usize {
        let gate = lock(&self.write_gate);
        let removed = {
            let mut state = lock(&self.state);
            let mut live = BTreeSet::new();
            let mut frontier = BTreeSet::new();
            if let Some(root) = state.base.get(&StoreKey::Root) {
                for value in root.values() {
                    value.collect_refs(&mut frontier);
                }
            }
            for layer in &state.layers {
                for write in &layer.patches.writes {
                    if let StoreKey::Entity(entity) = &write.key {
                        frontier.insert(entity.clone());
                    }
                    for value in write.fields.values() {
                        value.collect_refs(&mut frontier);
                    }
                }
            }
            while let Some(entity) = frontier.iter().next().cloned() {
                frontier.remove(&entity);
                if !live.insert(entity.clone()) {
                    continue;
                }
                if let Some(record) = state.base.get(&StoreKey::Entity(entity)) {
                    for value in record.values() {
                        let mut refs = BTreeSet::new();
                        value.collect_refs(&mut refs);
                        frontier.extend(refs.difference(&live).cloned());
                    }
                }
            }
            let dead: Vec<EntityKey> = state
                .base
                .keys()
                .filter_map(|key| match key {
                    StoreKey::Entity(entity) if !live.contains(entity) => Some(entity.clone()),
                    _ => None,
                })
                .collect();
            for entity in &dead {
                state.base.remove(&StoreKey::Entity(entity.clone()));
            }
            dead.len()
        };
        drop(gate);
        if removed > 0 {
            debug!(removed, "collected unreachable entities");
        }
        removed
    }

    /// Applies the change sequence number and fans out to subscribers while
    /// the write gate is held, preserving write order end to end.
    fn notify(&self, _gate: &MutexGuard<'_, ()>, touched: BTreeSet<StoreKey>) {
        if touched.is_empty() {
            return;
        }
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let change = ChangeSet { version, touched };
        let subscribers: Vec<ChangeCallback> = lock(&self.subscribers)
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in subscribers {
            callback(&change);
        }
    }
}

impl std::fmt::Debug for NormalizedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("NormalizedStore")
            .field("records", &state.base.len())
            .field("layers", &state.layers.len())
            .field("version", &self.version())
            .finish()
    }
}
