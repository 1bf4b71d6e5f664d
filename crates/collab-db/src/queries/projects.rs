//! Database query functions for the `projects` and `project_tasks` tables.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

use crate::models::{Project, Task};

/// Column values for a new project row.
#[derive(Debug, Clone)]
pub struct NewProject<'a> {
    pub name: &'a str,
    pub goal: &'a str,
    pub due_date: Option<DateTime<Utc>>,
    pub team_id: Option<Uuid>,
    pub owner_id: Uuid,
}

/// Insert a new project row with an empty top-level task list.
pub async fn insert_project<'e>(
    executor: impl PgExecutor<'e>,
    new: &NewProject<'_>,
) -> Result<Project> {
    let project = sqlx::query_as::<_, Project>(
        "INSERT INTO projects (name, goal, due_date, team_id, owner_id) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(new.name)
    .bind(new.goal)
    .bind(new.due_date)
    .bind(new.team_id)
    .bind(new.owner_id)
    .fetch_one(executor)
    .await
    .context("failed to insert project")?;

    Ok(project)
}

/// Fetch a project by its ID.
pub async fn get_project(pool: &PgPool, id: Uuid) -> Result<Option<Project>> {
    let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch project")?;

    Ok(project)
}

/// List the projects a user owns or can see through team membership,
/// newest first.
pub async fn list_projects_visible_to(pool: &PgPool, user_id: Uuid) -> Result<Vec<Project>> {
    let projects = sqlx::query_as::<_, Project>(
        "SELECT p.* FROM projects p \
         WHERE p.owner_id = $1 \
            OR p.team_id IN (SELECT team_id FROM team_members WHERE user_id = $1) \
         ORDER BY p.created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .context("failed to list projects")?;

    Ok(projects)
}

/// Replace a project's top-level task list with `task_ids`, in order.
pub async fn set_project_tasks(
    conn: &mut PgConnection,
    project_id: Uuid,
    task_ids: &[Uuid],
) -> Result<()> {
    sqlx::query("DELETE FROM project_tasks WHERE project_id = $1")
        .bind(project_id)
        .execute(&mut *conn)
        .await
        .context("failed to clear project task list")?;

    for (position, task_id) in task_ids.iter().enumerate() {
        sqlx::query(
            "INSERT INTO project_tasks (project_id, task_id, position) VALUES ($1, $2, $3)",
        )
        .bind(project_id)
        .bind(task_id)
        .bind(position as i32)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to add task {task_id} to project {project_id}"))?;
    }

    Ok(())
}

/// Append a single task to the end of a project's top-level list.
pub async fn append_project_task<'e>(
    executor: impl PgExecutor<'e>,
    project_id: Uuid,
    task_id: Uuid,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO project_tasks (project_id, task_id, position) \
         SELECT $1, $2, COALESCE(MAX(position) + 1, 0) FROM project_tasks WHERE project_id = $1",
    )
    .bind(project_id)
    .bind(task_id)
    .execute(executor)
    .await
    .context("failed to append task to project")?;

    Ok(())
}

/// IDs in a project's top-level task list, in list order.
pub async fn list_top_level_task_ids(pool: &PgPool, project_id: Uuid) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT task_id FROM project_tasks WHERE project_id = $1 ORDER BY position",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to list top-level task ids")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// The top-level task rows of a project, in list order.
pub async fn list_top_level_tasks(pool: &PgPool, project_id: Uuid) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT t.* FROM project_tasks pt \
         JOIN tasks t ON t.id = pt.task_id \
         WHERE pt.project_id = $1 \
         ORDER BY pt.position",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to list top-level tasks")?;

    Ok(tasks)
}

/// Delete a project and every task that belongs to it.
///
/// Runs in one transaction. Returns the number of task rows deleted, or
/// `None` when the project did not exist.
pub async fn delete_project_with_tasks(pool: &PgPool, id: Uuid) -> Result<Option<u64>> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    let tasks_deleted = sqlx::query("DELETE FROM tasks WHERE project_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("failed to delete project tasks")?
        .rows_affected();

    let projects_deleted = sqlx::query("DELETE FROM projects WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("failed to delete project")?
        .rows_affected();

    if projects_deleted == 0 {
        // Transaction rolls back on drop.
        return Ok(None);
    }

    tx.commit().await.context("failed to commit transaction")?;
    Ok(Some(tasks_deleted))
}
