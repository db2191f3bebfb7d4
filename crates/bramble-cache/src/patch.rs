// SPDX-License-Identifier: Apache-2.0
//! Patch sets: the unit of atomic store mutation.
//!
//! Every write path — network result, optimistic layer, commit — is
//! expressed as a [`PatchSet`] and applied in one step. Readers never
//! observe a half-applied set.

use std::collections::BTreeSet;
use std::fmt;

use crate::key::{EntityKey, StoreKey};
use crate::value::{rewrite_refs, FieldMap};

/// Identifier of one optimistic layer.
///
/// The mutation executor issues monotonically increasing identifiers; zero
/// is never issued and may serve as a sentinel in external bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(u64);

impl LayerId {
    /// Constructs a `LayerId` from a raw value.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying raw value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a spliced element lands in a root list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplicePosition {
    /// In front of the existing elements (new projects lead their list).
    Prepend,
    /// After the existing elements (new tasks trail their board column).
    Append,
}

/// Insertion of one value into a root list field.
///
/// Resolved against the list's current value at apply time; inserting a
/// reference that is already present is a no-op, which makes re-applying a
/// patch set idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootSplice {
    /// Full storage field key on the root record.
    pub field: String,
    /// Insertion point.
    pub position: SplicePosition,
    /// Value to insert, usually a [`crate::value::FieldValue::Ref`].
    pub insert: crate::value::FieldValue,
}

/// Field merges destined for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityWrite {
    /// Target record.
    pub key: StoreKey,
    /// Fields to merge (per-field merge policy decides how).
    pub fields: FieldMap,
}

/// An atomic set of store mutations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSet {
    /// Record merges, applied in order.
    pub writes: Vec<EntityWrite>,
    /// Root-list insertions, applied after the merges.
    pub splices: Vec<RootSplice>,
    /// Entity removals, applied last.
    pub evictions: Vec<EntityKey>,
}

impl PatchSet {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the set mutates nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.splices.is_empty() && self.evictions.is_empty()
    }

    /// Adds a record merge.
    pub fn push_write(&mut self, key: StoreKey, fields: FieldMap) {
        self.writes.push(EntityWrite { key, fields });
    }

    /// Adds a root-list insertion.
    pub fn push_splice(&mut self, splice: RootSplice) {
        self.splices.push(splice);
    }

    /// Adds an entity removal.
    pub fn push_eviction(&mut self, key: EntityKey) {
        self.evictions.push(key);
    }

    /// Every store key this set touches, for change notification.
    #[must_use]
    pub fn touched(&self) -> BTreeSet<StoreKey> {
        let mut keys: BTreeSet<StoreKey> = self.writes.iter().map(|w| w.key.clone()).collect();
        if !self.splices.is_empty() {
            keys.insert(StoreKey::Root);
        }
        keys.extend(self.evictions.iter().cloned().map(StoreKey::Entity));
        keys
    }

    /// Rewrites every reference to `from` into `to` across the whole set;
    /// returns `true` on change.
    pub fn rewrite_ref(&mut self, from: &EntityKey, to: &EntityKey) -> bool {
        let mut changed = false;
        for write in &mut self.writes {
            changed |= rewrite_refs(&mut write.fields, from, to);
        }
        for splice in &mut self.splices {
            changed |= splice.insert.rewrite_ref(from, to);
        }
        changed
    }
}
