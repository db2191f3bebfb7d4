// SPDX-License-Identifier: Apache-2.0
//! Stored field values.
//!
//! A record is a map from storage field key to [`FieldValue`]. Values either
//! terminate in scalars, reference another normalized record, or embed an
//! inline (un-normalized) object owned by their parent.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::key::EntityKey;

/// One record's fields, keyed by storage field key (name + bound args).
pub type FieldMap = BTreeMap<String, FieldValue>;

/// A single stored value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Explicit null.
    Null,
    /// Scalar leaf (string, number, boolean).
    Scalar(Value),
    /// Reference to a normalized record.
    Ref(EntityKey),
    /// Inline object stored under its parent (type has no identity key).
    Object(FieldMap),
    /// Ordered list of values.
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// Rewrites every reference equal to `from` into `to`, recursively.
    ///
    /// Returns `true` if anything changed. Used when a committed mutation
    /// replaces a provisional identity with the server-assigned one.
    pub fn rewrite_ref(&mut self, from: &EntityKey, to: &EntityKey) -> bool {
        match self {
            Self::Ref(key) if key == from => {
                *self = Self::Ref(to.clone());
                true
            }
            Self::List(items) => {
                let mut changed = false;
                for item in items {
                    changed |= item.rewrite_ref(from, to);
                }
                changed
            }
            Self::Object(fields) => rewrite_refs(fields, from, to),
            Self::Null | Self::Scalar(_) | Self::Ref(_) => false,
        }
    }

    /// Collects every referenced entity key into `acc`, recursively.
    pub fn collect_refs(&self, acc: &mut BTreeSet<EntityKey>) {
        match self {
            Self::Ref(key) => {
                acc.insert(key.clone());
            }
            Self::List(items) => {
                for item in items {
                    item.collect_refs(acc);
                }
            }
            Self::Object(fields) => {
                for value in fields.values() {
                    value.collect_refs(acc);
                }
            }
            Self::Null | Self::Scalar(_) => {}
        }
    }

    /// Returns `true` if `key` is referenced anywhere inside this value.
    #[must_use]
    pub fn references(&self, key: &EntityKey) -> bool {
        match self {
            Self::Ref(k) => k == key,
            Self::List(items) => items.iter().any(|i| i.references(key)),
            Self::Object(fields) => fields.values().any(|v| v.references(key)),
            Self::Null | Self::Scalar(_) => false,
        }
    }
}

/// Rewrites references in every value of `fields`; returns `true` on change.
pub fn rewrite_refs(fields: &mut FieldMap, from: &EntityKey, to: &EntityKey) -> bool {
    let mut changed = false;
    for value in fields.values_mut() {
        changed |= value.rewrite_ref(from, to);
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp() -> EntityKey {
        EntityKey::new("Task", "temp-1")
    }

    fn real() -> EntityKey {
        EntityKey::new("Task", "t-42")
    }

    #[test]
    fn rewrite_replaces_refs_in_nested_lists() {
        let mut value = FieldValue::List(vec![
            FieldValue::Ref(EntityKey::new("Task", "t-1")),
            FieldValue::Ref(temp()),
        ]);
        assert!(value.rewrite_ref(&temp(), &real()));
        assert!(!value.references(&temp()));
        assert!(value.references(&real()));
    }

    #[test]
    fn rewrite_reaches_inline_objects() {
        let mut fields = FieldMap::new();
        fields.insert(
            "items".into(),
            FieldValue::Object(FieldMap::from([(
                "task".to_string(),
                FieldValue::Ref(temp()),
            )])),
        );
        assert!(rewrite_refs(&mut fields, &temp(), &real()));
        let mut refs = BTreeSet::new();
        for v in fields.values() {
            v.collect_refs(&mut refs);
        }
        assert_eq!(refs.into_iter().collect::<Vec<_>>(), vec![real()]);
    }

    #[test]
    fn scalars_are_untouched() {
        let mut value = FieldValue::Scalar(Value::String("temp-1".into()));
        assert!(!value.rewrite_ref(&temp(), &real()));
    }
}
