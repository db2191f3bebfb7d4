// SPDX-License-Identifier: Apache-2.0
//! GraphQL operation documents as data.
//!
//! A [`Document`] is the in-memory form of a single operation: kind, name,
//! variable definitions, and a selection set. Rendering to source text is
//! deterministic, and `__typename` is appended to every object selection so
//! that responses always carry the discriminator the cache keys entities by.

use std::fmt;

/// Field name under which the server reports an object's concrete type.
pub const TYPENAME_FIELD: &str = "__typename";

/// Operation kind keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// A read-only operation.
    Query,
    /// A write operation.
    Mutation,
}

impl OperationKind {
    const fn keyword(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
        }
    }
}

/// A declared operation variable, e.g. `$projectId: ID!`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableDef {
    /// Variable name without the leading `$`.
    pub name: &'static str,
    /// GraphQL type reference, e.g. `ID!` or `String`.
    pub ty: &'static str,
}

impl VariableDef {
    /// Declares a variable.
    #[must_use]
    pub const fn new(name: &'static str, ty: &'static str) -> Self {
        Self { name, ty }
    }
}

/// A field argument bound to an operation variable, e.g. `projectId: $projectId`.
///
/// Arguments reference variables only; inline literals never appear in the
/// product's documents, which keeps argument values in exactly one place
/// (the variables object) for both the wire request and cache field keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argument {
    /// Argument name.
    pub name: &'static str,
    /// Referenced variable name without the leading `$`.
    pub variable: &'static str,
}

/// One field of a selection set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Field name as it appears in the schema.
    pub name: &'static str,
    /// Arguments, each bound to a declared variable.
    pub arguments: Vec<Argument>,
    /// Sub-selection; empty for scalar leaves.
    pub selection: Vec<Field>,
}

impl Field {
    /// A scalar leaf field.
    #[must_use]
    pub const fn leaf(name: &'static str) -> Self {
        Self {
            name,
            arguments: Vec::new(),
            selection: Vec::new(),
        }
    }

    /// An object field with a sub-selection.
    #[must_use]
    pub const fn object(name: &'static str, selection: Vec<Field>) -> Self {
        Self {
            name,
            arguments: Vec::new(),
            selection,
        }
    }

    /// Binds `name: $variable` onto this field.
    #[must_use]
    pub fn arg(mut self, name: &'static str, variable: &'static str) -> Self {
        self.arguments.push(Argument { name, variable });
        self
    }

    fn render(&self, out: &mut String) {
        out.push_str(self.name);
        if !self.arguments.is_empty() {
            out.push('(');
            for (i, arg) in self.arguments.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(arg.name);
                out.push_str(": $");
                out.push_str(arg.variable);
            }
            out.push(')');
        }
        if !self.selection.is_empty() {
            out.push_str(" { ");
            for field in &self.selection {
                field.render(out);
                out.push(' ');
            }
            // Always request the discriminator; normalization depends on it.
            out.push_str(TYPENAME_FIELD);
            out.push_str(" }");
        }
    }
}

/// A complete operation document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Query or mutation.
    pub kind: OperationKind,
    /// Operation name, e.g. `GetProjects`.
    pub name: &'static str,
    /// Declared variables.
    pub variables: Vec<VariableDef>,
    /// Root selection set.
    pub selection: Vec<Field>,
}

impl Document {
    /// Builds a query document.
    #[must_use]
    pub const fn query(
        name: &'static str,
        variables: Vec<VariableDef>,
        selection: Vec<Field>,
    ) -> Self {
        Self {
            kind: OperationKind::Query,
            name,
            variables,
            selection,
        }
    }

    /// Builds a mutation document.
    #[must_use]
    pub const fn mutation(
        name: &'static str,
        variables: Vec<VariableDef>,
        selection: Vec<Field>,
    ) -> Self {
        Self {
            kind: OperationKind::Mutation,
            name,
            variables,
            selection,
        }
    }
}

impl fmt::Display for Document {
    /// Renders GraphQL source text, suitable as the wire `query` string.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        out.push_str(self.kind.keyword());
        out.push(' ');
        out.push_str(self.name);
        if !self.variables.is_empty() {
            out.push('(');
            for (i, var) in self.variables.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push('$');
                out.push_str(var.name);
                out.push_str(": ");
                out.push_str(var.ty);
            }
            out.push(')');
        }
        out.push_str(" { ");
        for field in &self.selection {
            field.render(&mut out);
            out.push(' ');
        }
        out.push('}');
        f.write_str(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_query_with_variables_and_typename() {
        let doc = Document::query(
            "GetTasks",
            vec![VariableDef::new("projectId", "ID!")],
            vec![Field::object(
                "tasks",
                vec![Field::leaf("id"), Field::leaf("title")],
            )
            .arg("projectId", "projectId")],
        );
        assert_eq!(
            doc.to_string(),
            "query GetTasks($projectId: ID!) { tasks(projectId: $projectId) \
             { id title __typename } }"
        );
    }

    #[test]
    fn renders_nested_selections() {
        let doc = Document::mutation(
            "CreateTask",
            vec![VariableDef::new("title", "String!")],
            vec![Field::object(
                "createTask",
                vec![Field::object("task", vec![Field::leaf("id")])],
            )
            .arg("title", "title")],
        );
        assert_eq!(
            doc.to_string(),
            "mutation CreateTask($title: String!) { createTask(title: $title) \
             { task { id __typename } __typename } }"
        );
    }

    #[test]
    fn leaf_document_renders_without_braces_inside() {
        let doc = Document::query(
            "GetProjects",
            vec![],
            vec![Field::object("projects", vec![Field::leaf("id")])],
        );
        assert_eq!(
            doc.to_string(),
            "query GetProjects { projects { id __typename } }"
        );
    }
}
