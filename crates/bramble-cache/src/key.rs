// SPDX-License-Identifier: Apache-2.0
//! Identity keys for cached records.

use std::fmt;

use bramble_graphql::vars;
use bramble_graphql::Field;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity of a normalized entity: `(typename, id)`.
///
/// The id is the joined value of the type's registered key fields. Two
/// responses mentioning the same `(typename, id)` merge into one record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    typename: String,
    id: String,
}

impl EntityKey {
    /// Builds a key from a typename and an already-derived id.
    #[must_use]
    pub fn new(typename: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            typename: typename.into(),
            id: id.into(),
        }
    }

    /// The entity's concrete GraphQL type name.
    #[must_use]
    pub fn typename(&self) -> &str {
        &self.typename
    }

    /// The derived identity value.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.typename, self.id)
    }
}

/// Address of one record in the store.
///
/// `Root` is the single query-root record; every root field (including
/// parameterized ones like `tasks({"projectId":"p1"})`) lives there.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StoreKey {
    /// The query root.
    Root,
    /// A normalized entity.
    Entity(EntityKey),
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => f.write_str("Query"),
            Self::Entity(key) => key.fmt(f),
        }
    }
}

/// Storage key for a field, embedding canonically encoded arguments.
///
/// `tasks` with `{"projectId": "p1"}` stores under
/// `tasks({"projectId":"p1"})`; argument-free fields store under their bare
/// name. Canonical encoding makes the key independent of argument order.
#[must_use]
pub fn field_key(name: &str, args: Option<&Value>) -> String {
    match args {
        Some(args) if !args.is_null() => format!("{name}({})", vars::canonical(args)),
        _ => name.to_string(),
    }
}

/// Storage key for a selection field with its arguments bound from
/// `variables`. Unbound variables resolve to JSON null.
#[must_use]
pub fn bound_field_key(field: &Field, variables: &Value) -> String {
    if field.arguments.is_empty() {
        return field.name.to_string();
    }
    let mut args = serde_json::Map::new();
    for arg in &field.arguments {
        let value = variables
            .get(arg.variable)
            .cloned()
            .unwrap_or(Value::Null);
        args.insert(arg.name.to_string(), value);
    }
    field_key(field.name, Some(&Value::Object(args)))
}

/// Strips the argument suffix from a storage field key, yielding the schema
/// field name used for policy lookup.
#[must_use]
pub fn field_base_name(key: &str) -> &str {
    key.split_once('(').map_or(key, |(name, _)| name)
}
