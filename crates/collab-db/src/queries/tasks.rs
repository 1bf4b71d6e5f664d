//! Database query functions for the `tasks` and `task_dependencies` tables.

use anyhow::{Context, Result};
use sqlx::{PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

use crate::models::{AssigneeKind, Priority, Task, TaskDependency, TaskStatus};

/// Column values for a new task row.
#[derive(Debug, Clone)]
pub struct NewTask<'a> {
    pub project_id: Uuid,
    pub team_id: Option<Uuid>,
    pub owner_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub position: i32,
    pub name: &'a str,
    pub duration: Option<i32>,
    pub description: &'a str,
    pub status: TaskStatus,
    pub priority: Option<Priority>,
    pub assignee: Option<(Uuid, AssigneeKind)>,
}

/// Insert a new task row. Returns the task with server-generated defaults.
pub async fn insert_task<'e>(executor: impl PgExecutor<'e>, new: &NewTask<'_>) -> Result<Task> {
    let (assignee_id, assignee_kind) = match new.assignee {
        Some((id, kind)) => (Some(id), Some(kind)),
        None => (None, None),
    };

    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (project_id, team_id, owner_id, parent_id, position, name, duration, \
                            description, status, priority, assignee_id, assignee_kind) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
         RETURNING *",
    )
    .bind(new.project_id)
    .bind(new.team_id)
    .bind(new.owner_id)
    .bind(new.parent_id)
    .bind(new.position)
    .bind(new.name)
    .bind(new.duration)
    .bind(new.description)
    .bind(new.status)
    .bind(new.priority)
    .bind(assignee_id)
    .bind(assignee_kind)
    .fetch_one(executor)
    .await
    .with_context(|| format!("failed to insert task {:?}", new.name))?;

    Ok(task)
}

/// Fetch a single task by ID.
pub async fn get_task(pool: &PgPool, id: Uuid) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;

    Ok(task)
}

/// All tasks of a project at every depth, grouped by parent (top level
/// first) and in position order within each group.
pub async fn list_tasks_for_project(pool: &PgPool, project_id: Uuid) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE project_id = $1 \
         ORDER BY parent_id NULLS FIRST, position ASC, created_at ASC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to list tasks for project")?;

    Ok(tasks)
}

/// Tasks of every project the user owns or can see through a team, grouped
/// by project (newest first) and in tree order within each project.
pub async fn list_tasks_visible_to(pool: &PgPool, user_id: Uuid) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT t.* FROM tasks t \
         JOIN projects p ON p.id = t.project_id \
         WHERE p.owner_id = $1 \
            OR p.team_id IN (SELECT team_id FROM team_members WHERE user_id = $1) \
         ORDER BY p.created_at DESC, t.parent_id NULLS FIRST, t.position ASC, t.created_at ASC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .context("failed to list visible tasks")?;

    Ok(tasks)
}

/// Position that appends a new subtask at the end of the parent's list.
pub async fn next_subtask_position<'e>(
    executor: impl PgExecutor<'e>,
    parent_id: Uuid,
) -> Result<i32> {
    let row: (Option<i32>,) =
        sqlx::query_as("SELECT MAX(position) FROM tasks WHERE parent_id = $1")
            .bind(parent_id)
            .fetch_one(executor)
            .await
            .context("failed to compute next subtask position")?;

    Ok(row.0.map_or(0, |p| p + 1))
}

/// Position that appends a new top-level task to a project.
pub async fn next_top_level_position<'e>(
    executor: impl PgExecutor<'e>,
    project_id: Uuid,
) -> Result<i32> {
    let row: (Option<i32>,) = sqlx::query_as(
        "SELECT MAX(position) FROM tasks WHERE project_id = $1 AND parent_id IS NULL",
    )
    .bind(project_id)
    .fetch_one(executor)
    .await
    .context("failed to compute next top-level position")?;

    Ok(row.0.map_or(0, |p| p + 1))
}

/// IDs of a task's direct subtasks, in position order.
pub async fn list_subtask_ids(pool: &PgPool, task_id: Uuid) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> =
        sqlx::query_as("SELECT id FROM tasks WHERE parent_id = $1 ORDER BY position, created_at")
            .bind(task_id)
            .fetch_all(pool)
            .await
            .context("failed to list subtasks")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Replace a task's dependency list. Order is preserved.
pub async fn set_task_dependencies(
    conn: &mut PgConnection,
    task_id: Uuid,
    depends_on: &[Uuid],
) -> Result<()> {
    sqlx::query("DELETE FROM task_dependencies WHERE task_id = $1")
        .bind(task_id)
        .execute(&mut *conn)
        .await
        .context("failed to clear task dependencies")?;

    for (position, dep_id) in depends_on.iter().enumerate() {
        sqlx::query(
            "INSERT INTO task_dependencies (task_id, depends_on, position) VALUES ($1, $2, $3) \
             ON CONFLICT DO NOTHING",
        )
        .bind(task_id)
        .bind(dep_id)
        .bind(position as i32)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to insert dependency {task_id} -> {dep_id}"))?;
    }

    Ok(())
}

/// IDs of the tasks a given task depends on, in declared order.
pub async fn get_task_dependencies(pool: &PgPool, task_id: Uuid) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT depends_on FROM task_dependencies WHERE task_id = $1 ORDER BY position",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to get task dependencies")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Every dependency edge whose dependent task belongs to the project.
pub async fn list_dependency_edges_for_project(
    pool: &PgPool,
    project_id: Uuid,
) -> Result<Vec<TaskDependency>> {
    let edges = sqlx::query_as::<_, TaskDependency>(
        "SELECT td.task_id, td.depends_on FROM task_dependencies td \
         JOIN tasks t ON t.id = td.task_id \
         WHERE t.project_id = $1 \
         ORDER BY td.task_id, td.position",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to list dependency edges")?;

    Ok(edges)
}

/// Partial update of a task's editable fields. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub duration: Option<i32>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    /// `Some(None)` clears the priority.
    pub priority: Option<Option<Priority>>,
    /// `Some(None)` clears the assignee.
    pub assignee: Option<Option<(Uuid, AssigneeKind)>>,
}

/// Apply a [`TaskUpdate`]. Returns the updated row, or `None` when the task
/// does not exist.
pub async fn update_task(pool: &PgPool, id: Uuid, update: &TaskUpdate) -> Result<Option<Task>> {
    let set_priority = update.priority.is_some();
    let set_assignee = update.assignee.is_some();
    let (assignee_id, assignee_kind) = match update.assignee.flatten() {
        Some((id, kind)) => (Some(id), Some(kind)),
        None => (None, None),
    };

    let task = sqlx::query_as::<_, Task>(
        "UPDATE tasks SET \
             name = COALESCE($2, name), \
             duration = COALESCE($3, duration), \
             description = COALESCE($4, description), \
             status = COALESCE($5, status), \
             priority = CASE WHEN $6 THEN $7 ELSE priority END, \
             assignee_id = CASE WHEN $8 THEN $9 ELSE assignee_id END, \
             assignee_kind = CASE WHEN $8 THEN $10 ELSE assignee_kind END, \
             updated_at = now() \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(id)
    .bind(update.name.as_deref())
    .bind(update.duration)
    .bind(update.description.as_deref())
    .bind(update.status)
    .bind(set_priority)
    .bind(update.priority.flatten())
    .bind(set_assignee)
    .bind(assignee_id)
    .bind(assignee_kind)
    .fetch_optional(pool)
    .await
    .context("failed to update task")?;

    Ok(task)
}

/// Status counts over a project's top-level task list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectProgress {
    pub todo: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub blocked: i64,
    pub total: i64,
}

/// Count a project's top-level tasks by status.
pub async fn get_project_progress(pool: &PgPool, project_id: Uuid) -> Result<ProjectProgress> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT t.status::text, COUNT(*) \
         FROM project_tasks pt \
         JOIN tasks t ON t.id = pt.task_id \
         WHERE pt.project_id = $1 \
         GROUP BY t.status",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to get project progress")?;

    let mut progress = ProjectProgress::default();
    for (status, count) in &rows {
        match status.parse::<TaskStatus>() {
            Ok(TaskStatus::Todo) => progress.todo = *count,
            Ok(TaskStatus::InProgress) => progress.in_progress = *count,
            Ok(TaskStatus::Completed) => progress.completed = *count,
            Ok(TaskStatus::Blocked) => progress.blocked = *count,
            Err(_) => {}
        }
        progress.total += count;
    }
    Ok(progress)
}
