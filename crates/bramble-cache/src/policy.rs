// SPDX-License-Identifier: Apache-2.0
//! Per-type identity and per-field read/merge policies.
//!
//! The registry is built once at client construction and immutable
//! afterwards; it holds no runtime state. Types without registered key
//! fields are never normalized — their objects stay inline under the parent
//! record.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::key::EntityKey;
use crate::value::FieldValue;

/// Custom merge hook: `(existing, incoming) -> stored`.
pub type MergeFn = fn(Option<&FieldValue>, FieldValue) -> FieldValue;

/// Custom read hook: `existing -> observed`. Returning `None` means the
/// field stays missing.
pub type ReadFn = fn(Option<&FieldValue>) -> Option<FieldValue>;

/// How an incoming field value combines with the stored one.
#[derive(Debug, Clone, Copy, Default)]
pub enum MergePolicy {
    /// Incoming data supersedes stored data. The default: a full fetch is
    /// authoritative, not incremental.
    #[default]
    Replace,
    /// Incoming list items are appended to the stored list. Must be
    /// registered explicitly (e.g. for pagination); nothing registers it
    /// today.
    Append,
    /// Arbitrary combination.
    Custom(MergeFn),
}

/// How a read observes a field.
#[derive(Debug, Clone, Copy, Default)]
pub enum ReadPolicy {
    /// Present values pass through; missing fields are an error.
    #[default]
    Default,
    /// Missing list fields read as the empty list.
    EmptyList,
    /// Arbitrary transformation of the stored value (or its absence).
    Custom(ReadFn),
}

/// Combined per-field policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldPolicy {
    /// Merge side.
    pub merge: MergePolicy,
    /// Read side.
    pub read: ReadPolicy,
}

impl FieldPolicy {
    /// Replace-on-write, empty-list-on-missing-read. The policy of the
    /// product's root list fields (`projects`, `tasks`).
    #[must_use]
    pub const fn replace_list() -> Self {
        Self {
            merge: MergePolicy::Replace,
            read: ReadPolicy::EmptyList,
        }
    }
}

#[derive(Debug, Default)]
struct TypePolicy {
    key_fields: Vec<String>,
    fields: BTreeMap<String, FieldPolicy>,
}

/// Immutable per-type policy table.
#[derive(Debug, Default)]
pub struct TypePolicyRegistry {
    types: BTreeMap<String, TypePolicy>,
}

impl TypePolicyRegistry {
    /// Starts building a registry.
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            registry: Self::default(),
        }
    }

    /// Registered key fields for `typename`; `None` when the type is never
    /// normalized.
    #[must_use]
    pub fn key_fields(&self, typename: &str) -> Option<&[String]> {
        let policy = self.types.get(typename)?;
        if policy.key_fields.is_empty() {
            None
        } else {
            Some(&policy.key_fields)
        }
    }

    /// Returns `true` when objects of `typename` normalize into their own
    /// record.
    #[must_use]
    pub fn is_normalized(&self, typename: &str) -> bool {
        self.key_fields(typename).is_some()
    }

    /// Derives the identity key for a response object of `typename`.
    ///
    /// Returns `None` when the type has no registered key fields or any key
    /// field is absent/non-scalar — the object is then stored inline.
    #[must_use]
    pub fn entity_key(&self, typename: &str, object: &Map<String, Value>) -> Option<EntityKey> {
        let key_fields = self.key_fields(typename)?;
        let mut parts = Vec::with_capacity(key_fields.len());
        for field in key_fields {
            match object.get(field) {
                Some(Value::String(s)) => parts.push(s.clone()),
                Some(Value::Number(n)) => parts.push(n.to_string()),
                _ => return None,
            }
        }
        Some(EntityKey::new(typename, parts.join(":")))
    }

    /// Effective policy for `typename.field`; unregistered fields get the
    /// default (replace merge, strict read).
    #[must_use]
    pub fn field_policy(&self, typename: &str, field: &str) -> FieldPolicy {
        self.types
            .get(typename)
            .and_then(|t| t.fields.get(field))
            .copied()
            .unwrap_or_default()
    }
}

/// Builder for [`TypePolicyRegistry`]; registration happens once at process
/// start.
#[derive(Debug)]
pub struct RegistryBuilder {
    registry: TypePolicyRegistry,
}

impl RegistryBuilder {
    /// Registers `typename` as normalized, keyed by `key_fields`.
    #[must_use]
    pub fn keyed(mut self, typename: &str, key_fields: &[&str]) -> Self {
        let entry = self
            .registry
            .types
            .entry(typename.to_string())
            .or_default();
        entry.key_fields = key_fields.iter().map(ToString::to_string).collect();
        self
    }

    /// Registers a field policy under `typename`. Root fields register under
    /// `Query`.
    #[must_use]
    pub fn field(mut self, typename: &str, field: &str, policy: FieldPolicy) -> Self {
        let entry = self
            .registry
            .types
            .entry(typename.to_string())
            .or_default();
        entry.fields.insert(field.to_string(), policy);
        self
    }

    /// Finalizes the table.
    #[must_use]
    pub fn build(self) -> TypePolicyRegistry {
        self.registry
    }
}
