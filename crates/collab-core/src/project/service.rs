//! Project operations: manual and AI-assisted creation, listing, detail and
//! deletion.

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use collab_db::models::Project;
use collab_db::queries::projects::{self as project_db, NewProject};
use collab_db::queries::{tasks as task_db, teams as team_db};

use super::progress::ProgressSummary;
use super::tree::{TaskNode, build_task_tree};
use crate::error::{ProjectError, ProjectResult};
use crate::plan::{
    CompletionClient, PgTaskSink, build_plan_prompt, materialize_plan, parse_plan, top_level_ids,
};

/// Body of `POST /api/projects` and `POST /api/projects/ai`. The goal is
/// only required when a plan is generated from it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub goal: String,
    /// RFC 3339 timestamp or a plain `YYYY-MM-DD` date.
    pub due_date: Option<String>,
    pub team_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    #[serde(flatten)]
    pub project: Project,
    pub progress: ProgressSummary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub project: Project,
    pub progress: ProgressSummary,
    pub tasks: Vec<TaskNode>,
}

/// Create a project with an empty task list. No plan is generated.
pub async fn create_project(
    pool: &PgPool,
    owner_id: Uuid,
    request: &CreateProjectRequest,
) -> ProjectResult<ProjectDetail> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(ProjectError::validation("Project name is required"));
    }
    let due_date = request.due_date.as_deref().map(parse_due_date).transpose()?;
    if let Some(team_id) = request.team_id {
        check_team_member(pool, team_id, owner_id).await?;
    }

    let project = project_db::insert_project(
        pool,
        &NewProject {
            name,
            goal: request.goal.trim(),
            due_date,
            team_id: request.team_id,
            owner_id,
        },
    )
    .await?;

    info!(project_id = %project.id, "created project");
    load_detail(pool, project).await
}

/// Create a project whose task tree is generated from its goal.
///
/// Validation and the team check happen before the completion request.
/// The project row, every task, the top-level list and the team's task list
/// are written in one transaction.
pub async fn create_project_with_ai(
    pool: &PgPool,
    planner: &dyn CompletionClient,
    owner_id: Uuid,
    request: &CreateProjectRequest,
) -> ProjectResult<ProjectDetail> {
    let name = request.name.trim();
    let goal = request.goal.trim();
    if name.is_empty() || goal.is_empty() {
        return Err(ProjectError::validation("Project name and goal are required"));
    }
    let due_date = request.due_date.as_deref().map(parse_due_date).transpose()?;
    if let Some(team_id) = request.team_id {
        check_team_member(pool, team_id, owner_id).await?;
    }

    let raw = planner.complete_json(&build_plan_prompt(goal)).await?;
    let specs = parse_plan(&raw)?;
    if specs.is_empty() {
        warn!(project = %name, "generated plan contains no tasks");
    }

    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    let project = project_db::insert_project(
        &mut *tx,
        &NewProject {
            name,
            goal,
            due_date,
            team_id: request.team_id,
            owner_id,
        },
    )
    .await?;

    let created = {
        let mut sink = PgTaskSink::new(&mut *tx, project.id, owner_id, request.team_id);
        materialize_plan(&mut sink, &specs).await?
    };

    project_db::set_project_tasks(&mut *tx, project.id, &top_level_ids(&created)).await?;

    if let Some(team_id) = request.team_id {
        let all: Vec<Uuid> = created.iter().map(|t| t.id).collect();
        team_db::append_team_tasks(&mut *tx, team_id, &all).await?;
    }

    tx.commit().await.context("failed to commit project")?;

    info!(
        project_id = %project.id,
        tasks = created.len(),
        top_level = specs.len(),
        "created project from generated plan"
    );

    load_detail(pool, project).await
}

/// Projects the caller owns or can see through a team, newest first.
pub async fn list_projects(pool: &PgPool, user_id: Uuid) -> ProjectResult<Vec<ProjectSummary>> {
    let projects = project_db::list_projects_visible_to(pool, user_id).await?;

    let mut summaries = Vec::with_capacity(projects.len());
    for project in projects {
        let progress = task_db::get_project_progress(pool, project.id).await?;
        summaries.push(ProjectSummary {
            project,
            progress: progress.into(),
        });
    }
    Ok(summaries)
}

/// A project with its full task tree. Projects the caller cannot see are
/// reported as not found.
pub async fn get_project_detail(
    pool: &PgPool,
    user_id: Uuid,
    project_id: Uuid,
) -> ProjectResult<ProjectDetail> {
    let project = visible_project(pool, user_id, project_id).await?;
    load_detail(pool, project).await
}

/// Delete a project and all of its tasks. Only the owner may do this.
pub async fn delete_project(pool: &PgPool, user_id: Uuid, project_id: Uuid) -> ProjectResult<()> {
    let project = visible_project(pool, user_id, project_id).await?;
    if project.owner_id != user_id {
        return Err(ProjectError::forbidden("Only the project owner can delete it"));
    }

    let deleted = project_db::delete_project_with_tasks(pool, project_id)
        .await?
        .ok_or_else(|| project_not_found(project_id))?;

    info!(%project_id, tasks = deleted, "deleted project");
    Ok(())
}

/// Fetch a project the user owns or shares a team with.
pub async fn visible_project(
    pool: &PgPool,
    user_id: Uuid,
    project_id: Uuid,
) -> ProjectResult<Project> {
    let project = project_db::get_project(pool, project_id)
        .await?
        .ok_or_else(|| project_not_found(project_id))?;

    let visible = match project.team_id {
        _ if project.owner_id == user_id => true,
        Some(team_id) => team_db::is_member(pool, team_id, user_id).await?,
        None => false,
    };
    if !visible {
        return Err(project_not_found(project_id));
    }
    Ok(project)
}

/// New projects may only be filed under a team the owner belongs to.
async fn check_team_member(pool: &PgPool, team_id: Uuid, user_id: Uuid) -> ProjectResult<()> {
    team_db::get_team(pool, team_id)
        .await?
        .ok_or_else(|| ProjectError::not_found(format!("team {team_id} not found")))?;
    if !team_db::is_member(pool, team_id, user_id).await? {
        return Err(ProjectError::forbidden("You are not a member of this team"));
    }
    Ok(())
}

fn project_not_found(id: Uuid) -> ProjectError {
    ProjectError::not_found(format!("project {id} not found"))
}

async fn load_detail(pool: &PgPool, project: Project) -> ProjectResult<ProjectDetail> {
    let tasks = task_db::list_tasks_for_project(pool, project.id).await?;
    let edges = task_db::list_dependency_edges_for_project(pool, project.id).await?;
    let top_level = project_db::list_top_level_task_ids(pool, project.id).await?;
    let progress = task_db::get_project_progress(pool, project.id).await?;

    Ok(ProjectDetail {
        tasks: build_task_tree(tasks, edges, &top_level),
        progress: progress.into(),
        project,
    })
}

fn parse_due_date(raw: &str) -> ProjectResult<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| ProjectError::validation(format!("invalid due date: {raw:?}")))
}
