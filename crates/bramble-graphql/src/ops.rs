// SPDX-License-Identifier: Apache-2.0
//! Operation documents for the project tracker's GraphQL API.
//!
//! Queries cover the organization/project/task hierarchy; mutations return
//! their payload nested under a named result object (`createTask.task`,
//! `deleteOrganization.success`). Field sets mirror the server schema.

use crate::document::{Document, Field, VariableDef};

fn organization_fields() -> Vec<Field> {
    vec![
        Field::leaf("id"),
        Field::leaf("name"),
        Field::leaf("slug"),
        Field::leaf("contactEmail"),
        Field::leaf("createdAt"),
    ]
}

fn project_fields() -> Vec<Field> {
    vec![
        Field::leaf("id"),
        Field::leaf("name"),
        Field::leaf("description"),
        Field::leaf("status"),
        Field::leaf("dueDate"),
        Field::leaf("taskCount"),
        Field::leaf("completedTasks"),
        Field::leaf("completionRate"),
    ]
}

fn task_fields() -> Vec<Field> {
    vec![
        Field::leaf("id"),
        Field::leaf("title"),
        Field::leaf("description"),
        Field::leaf("status"),
        Field::leaf("assigneeEmail"),
        Field::leaf("dueDate"),
    ]
}

fn comment_fields() -> Vec<Field> {
    vec![
        Field::leaf("id"),
        Field::leaf("content"),
        Field::leaf("authorEmail"),
        Field::leaf("createdAt"),
    ]
}

/// `query GetOrganizations` — every organization visible to the tenant.
#[must_use]
pub fn organizations() -> Document {
    Document::query(
        "GetOrganizations",
        vec![],
        vec![Field::object("organizations", organization_fields())],
    )
}

/// `query GetOrganization($id: ID!)` — a single organization.
#[must_use]
pub fn organization() -> Document {
    Document::query(
        "GetOrganization",
        vec![VariableDef::new("id", "ID!")],
        vec![Field::object("organization", organization_fields()).arg("id", "id")],
    )
}

/// `query GetProjects` — the tenant's project list with task statistics.
#[must_use]
pub fn projects() -> Document {
    Document::query(
        "GetProjects",
        vec![],
        vec![Field::object("projects", project_fields())],
    )
}

/// `query GetTasks($projectId: ID!)` — tasks of one project.
#[must_use]
pub fn tasks() -> Document {
    Document::query(
        "GetTasks",
        vec![VariableDef::new("projectId", "ID!")],
        vec![Field::object("tasks", task_fields()).arg("projectId", "projectId")],
    )
}

/// `query GetTaskComments($projectId: ID!)` — comment threads, riding the
/// task list so comments stay embedded in their `Task` entity.
#[must_use]
pub fn task_comments() -> Document {
    Document::query(
        "GetTaskComments",
        vec![VariableDef::new("projectId", "ID!")],
        vec![Field::object(
            "tasks",
            vec![
                Field::leaf("id"),
                Field::object("comments", comment_fields()),
            ],
        )
        .arg("projectId", "projectId")],
    )
}

/// `mutation CreateOrganization` — payload under `createOrganization.organization`.
#[must_use]
pub fn create_organization() -> Document {
    Document::mutation(
        "CreateOrganization",
        vec![
            VariableDef::new("name", "String!"),
            VariableDef::new("slug", "String!"),
            VariableDef::new("contactEmail", "String!"),
        ],
        vec![Field::object(
            "createOrganization",
            vec![Field::object("organization", organization_fields())],
        )
        .arg("name", "name")
        .arg("slug", "slug")
        .arg("contactEmail", "contactEmail")],
    )
}

/// `mutation UpdateOrganization` — payload under `updateOrganization.organization`.
#[must_use]
pub fn update_organization() -> Document {
    Document::mutation(
        "UpdateOrganization",
        vec![
            VariableDef::new("id", "ID!"),
            VariableDef::new("name", "String"),
            VariableDef::new("slug", "String"),
            VariableDef::new("contactEmail", "String"),
        ],
        vec![Field::object(
            "updateOrganization",
            vec![Field::object("organization", organization_fields())],
        )
        .arg("id", "id")
        .arg("name", "name")
        .arg("slug", "slug")
        .arg("contactEmail", "contactEmail")],
    )
}

/// `mutation DeleteOrganization` — payload is a bare `success` flag.
#[must_use]
pub fn delete_organization() -> Document {
    Document::mutation(
        "DeleteOrganization",
        vec![VariableDef::new("id", "ID!")],
        vec![Field::object("deleteOrganization", vec![Field::leaf("success")]).arg("id", "id")],
    )
}

/// `mutation CreateProject` — payload under `createProject.project`.
#[must_use]
pub fn create_project() -> Document {
    Document::mutation(
        "CreateProject",
        vec![
            VariableDef::new("name", "String!"),
            VariableDef::new("description", "String"),
            VariableDef::new("status", "String"),
            VariableDef::new("dueDate", "Date"),
        ],
        vec![Field::object(
            "createProject",
            vec![Field::object("project", project_fields())],
        )
        .arg("name", "name")
        .arg("description", "description")
        .arg("status", "status")
        .arg("dueDate", "dueDate")],
    )
}

/// `mutation UpdateProject` — payload under `updateProject.project`.
#[must_use]
pub fn update_project() -> Document {
    Document::mutation(
        "UpdateProject",
        vec![
            VariableDef::new("id", "ID!"),
            VariableDef::new("name", "String"),
            VariableDef::new("description", "String"),
            VariableDef::new("status", "String"),
            VariableDef::new("dueDate", "Date"),
        ],
        vec![Field::object(
            "updateProject",
            vec![Field::object("project", project_fields())],
        )
        .arg("id", "id")
        .arg("name", "name")
        .arg("description", "description")
        .arg("status", "status")
        .arg("dueDate", "dueDate")],
    )
}

/// `mutation CreateTask` — payload under `createTask.task`.
#[must_use]
pub fn create_task() -> Document {
    Document::mutation(
        "CreateTask",
        vec![
            VariableDef::new("projectId", "ID!"),
            VariableDef::new("title", "String!"),
            VariableDef::new("description", "String"),
            VariableDef::new("status", "String"),
            VariableDef::new("assigneeEmail", "String"),
            VariableDef::new("dueDate", "DateTime"),
        ],
        vec![Field::object("createTask", vec![Field::object("task", task_fields())])
            .arg("projectId", "projectId")
            .arg("title", "title")
            .arg("description", "description")
            .arg("status", "status")
            .arg("assigneeEmail", "assigneeEmail")
            .arg("dueDate", "dueDate")],
    )
}

/// `mutation UpdateTask` — payload under `updateTask.task`.
#[must_use]
pub fn update_task() -> Document {
    Document::mutation(
        "UpdateTask",
        vec![
            VariableDef::new("id", "ID!"),
            VariableDef::new("title", "String"),
            VariableDef::new("description", "String"),
            VariableDef::new("status", "String"),
            VariableDef::new("assigneeEmail", "String"),
            VariableDef::new("dueDate", "DateTime"),
        ],
        vec![Field::object("updateTask", vec![Field::object("task", task_fields())])
            .arg("id", "id")
            .arg("title", "title")
            .arg("description", "description")
            .arg("status", "status")
            .arg("assigneeEmail", "assigneeEmail")
            .arg("dueDate", "dueDate")],
    )
}

/// `mutation AddTaskComment` — payload under `addTaskComment.comment`.
#[must_use]
pub fn add_task_comment() -> Document {
    Document::mutation(
        "AddTaskComment",
        vec![
            VariableDef::new("taskId", "ID!"),
            VariableDef::new("content", "String!"),
            VariableDef::new("authorEmail", "String!"),
        ],
        vec![Field::object(
            "addTaskComment",
            vec![Field::object("comment", comment_fields())],
        )
        .arg("taskId", "taskId")
        .arg("content", "content")
        .arg("authorEmail", "authorEmail")],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::OperationKind;

    #[test]
    fn tasks_query_binds_project_id() {
        let doc = tasks();
        assert_eq!(doc.kind, OperationKind::Query);
        assert!(doc
            .to_string()
            .contains("tasks(projectId: $projectId)"));
    }

    #[test]
    fn delete_organization_selects_success_flag() {
        let rendered = delete_organization().to_string();
        assert!(rendered.contains("deleteOrganization(id: $id) { success"));
    }

    #[test]
    fn operation_names_are_unique() {
        let names = [
            organizations().name,
            organization().name,
            projects().name,
            tasks().name,
            task_comments().name,
            create_organization().name,
            update_organization().name,
            delete_organization().name,
            create_project().name,
            update_project().name,
            create_task().name,
            update_task().name,
            add_task_comment().name,
        ];
        let unique: std::collections::BTreeSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
    }
}
