//! Manual task operations inside a project.

use anyhow::Context;
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use collab_db::models::{AssigneeKind, Priority, Task, TaskStatus};
use collab_db::queries::tasks::{self as task_db, NewTask, TaskUpdate};
use collab_db::queries::{projects as project_db, teams as team_db, users as user_db};

use super::service::visible_project;
use crate::error::{ProjectError, ProjectResult};

/// Who a task is assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignee {
    pub id: Uuid,
    pub kind: AssigneeKind,
}

/// Body of `POST /api/tasks`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub project_id: Uuid,
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub name: String,
    pub duration: Option<i32>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    pub priority: Option<Priority>,
    pub assignee: Option<Assignee>,
}

/// Body of `PUT /api/tasks/{id}`. Absent fields are left unchanged;
/// `"priority": null` and `"assignee": null` clear those fields.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEdit {
    pub name: Option<String>,
    pub duration: Option<i32>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    #[serde(default, deserialize_with = "present")]
    pub priority: Option<Option<Priority>>,
    #[serde(default, deserialize_with = "present")]
    pub assignee: Option<Option<Assignee>>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDetail {
    #[serde(flatten)]
    pub task: Task,
    pub dependencies: Vec<Uuid>,
    pub subtasks: Vec<Uuid>,
}

/// Add a task to a project, at the top level or under `parent_id`.
pub async fn create_task(
    pool: &PgPool,
    user_id: Uuid,
    request: &CreateTaskRequest,
) -> ProjectResult<TaskDetail> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(ProjectError::validation("Task name is required"));
    }
    check_duration(request.duration)?;

    let project = visible_project(pool, user_id, request.project_id).await?;
    if let Some(assignee) = request.assignee {
        check_assignee(pool, assignee).await?;
    }

    if let Some(parent_id) = request.parent_id {
        let parent = task_db::get_task(pool, parent_id)
            .await?
            .ok_or_else(|| task_not_found(parent_id))?;
        if parent.project_id != project.id {
            return Err(ProjectError::validation(
                "Parent task belongs to a different project",
            ));
        }
    }

    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    let position = match request.parent_id {
        Some(parent_id) => task_db::next_subtask_position(&mut *tx, parent_id).await?,
        None => task_db::next_top_level_position(&mut *tx, project.id).await?,
    };

    let task = task_db::insert_task(
        &mut *tx,
        &NewTask {
            project_id: project.id,
            team_id: project.team_id,
            owner_id: user_id,
            parent_id: request.parent_id,
            position,
            name,
            duration: request.duration,
            description: request.description.trim(),
            status: request.status,
            priority: request.priority,
            assignee: request.assignee.map(|a| (a.id, a.kind)),
        },
    )
    .await?;

    if task.parent_id.is_none() {
        project_db::append_project_task(&mut *tx, project.id, task.id).await?;
    }
    if let Some(team_id) = project.team_id {
        team_db::append_team_tasks(&mut *tx, team_id, &[task.id]).await?;
    }

    tx.commit().await.context("failed to commit task")?;

    info!(task_id = %task.id, project_id = %project.id, "created task");
    Ok(TaskDetail {
        task,
        dependencies: Vec::new(),
        subtasks: Vec::new(),
    })
}

/// Every task in the projects the caller can see.
pub async fn list_tasks(pool: &PgPool, user_id: Uuid) -> ProjectResult<Vec<Task>> {
    Ok(task_db::list_tasks_visible_to(pool, user_id).await?)
}

/// A task with its dependency and subtask ids.
pub async fn get_task_detail(
    pool: &PgPool,
    user_id: Uuid,
    task_id: Uuid,
) -> ProjectResult<TaskDetail> {
    let task = visible_task(pool, user_id, task_id).await?;
    let dependencies = task_db::get_task_dependencies(pool, task_id).await?;
    let subtasks = task_db::list_subtask_ids(pool, task_id).await?;

    Ok(TaskDetail {
        task,
        dependencies,
        subtasks,
    })
}

/// Apply an edit to a task the caller can see.
pub async fn update_task(
    pool: &PgPool,
    user_id: Uuid,
    task_id: Uuid,
    edit: &TaskEdit,
) -> ProjectResult<TaskDetail> {
    let name = edit.name.as_deref().map(str::trim);
    if name.is_some_and(str::is_empty) {
        return Err(ProjectError::validation("Task name cannot be empty"));
    }
    check_duration(edit.duration)?;

    visible_task(pool, user_id, task_id).await?;
    if let Some(Some(assignee)) = edit.assignee {
        check_assignee(pool, assignee).await?;
    }

    let update = TaskUpdate {
        name: name.map(str::to_string),
        duration: edit.duration,
        description: edit.description.clone(),
        status: edit.status,
        priority: edit.priority,
        assignee: edit.assignee.map(|a| a.map(|a| (a.id, a.kind))),
    };
    task_db::update_task(pool, task_id, &update)
        .await?
        .ok_or_else(|| task_not_found(task_id))?;

    get_task_detail(pool, user_id, task_id).await
}

async fn visible_task(pool: &PgPool, user_id: Uuid, task_id: Uuid) -> ProjectResult<Task> {
    let task = task_db::get_task(pool, task_id)
        .await?
        .ok_or_else(|| task_not_found(task_id))?;

    // A task is visible exactly when its project is.
    visible_project(pool, user_id, task.project_id)
        .await
        .map_err(|e| match e {
            ProjectError::NotFound(_) => task_not_found(task_id),
            other => other,
        })?;
    Ok(task)
}

async fn check_assignee(pool: &PgPool, assignee: Assignee) -> ProjectResult<()> {
    let exists = match assignee.kind {
        AssigneeKind::User => user_db::get_user(pool, assignee.id).await?.is_some(),
        AssigneeKind::Team => team_db::get_team(pool, assignee.id).await?.is_some(),
    };
    if !exists {
        return Err(ProjectError::validation(format!(
            "assignee {} {} does not exist",
            assignee.kind, assignee.id
        )));
    }
    Ok(())
}

fn check_duration(duration: Option<i32>) -> ProjectResult<()> {
    match duration {
        Some(d) if d < 0 => Err(ProjectError::validation("Duration cannot be negative")),
        _ => Ok(()),
    }
}

fn task_not_found(id: Uuid) -> ProjectError {
    ProjectError::not_found(format!("task {id} not found"))
}
