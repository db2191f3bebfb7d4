// SPDX-License-Identifier: Apache-2.0
//! bramble-cache: normalized entity cache with optimistic layers.
//!
//! Entities are stored once, keyed by `(typename, id)`, and referenced from
//! query results instead of duplicated. Reads resolve a stack of pending
//! optimistic layers top-down with the base map last; writes are atomic
//! patch sets with synchronous, ordered change notification. Identity and
//! merge behavior come from an immutable [`policy::TypePolicyRegistry`]
//! built once at client construction.

pub mod error;
pub mod key;
pub mod patch;
pub mod policy;
pub mod store;
pub mod value;

pub use error::StoreError;
pub use key::{bound_field_key, field_base_name, field_key, EntityKey, StoreKey};
pub use patch::{EntityWrite, LayerId, PatchSet, RootSplice, SplicePosition};
pub use policy::{
    FieldPolicy, MergeFn, MergePolicy, ReadFn, ReadPolicy, RegistryBuilder, TypePolicyRegistry,
};
pub use store::{ChangeSet, NormalizedStore, ReadOutput, SubscriptionId};
pub use value::{FieldMap, FieldValue};
