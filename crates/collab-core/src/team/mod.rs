//! Team operations: creation, listing, deletion and join requests.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use collab_db::models::{Team, User};
use collab_db::queries::teams as team_db;

use crate::error::{ProjectError, ProjectResult};

/// A team with its members. Pending join requests are only filled in for
/// the team owner.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamDetail {
    #[serde(flatten)]
    pub team: Team,
    pub members: Vec<User>,
    pub join_requests: Vec<User>,
    pub task_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinAction {
    Approve,
    Reject,
}

/// Body of `PUT /api/teams/{id}/join`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinDecision {
    pub user_id: Uuid,
    pub action: JoinAction,
}

pub async fn create_team(pool: &PgPool, owner_id: Uuid, name: &str) -> ProjectResult<TeamDetail> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ProjectError::validation("Team name is required"));
    }

    let team = team_db::create_team(pool, name, owner_id).await?;
    info!(team_id = %team.id, %owner_id, "created team");
    load_detail(pool, team, owner_id).await
}

/// Teams the user owns or is a member of.
pub async fn list_teams(pool: &PgPool, user_id: Uuid) -> ProjectResult<Vec<TeamDetail>> {
    let teams = team_db::list_teams_for_user(pool, user_id).await?;
    let mut details = Vec::with_capacity(teams.len());
    for team in teams {
        details.push(load_detail(pool, team, user_id).await?);
    }
    Ok(details)
}

pub async fn delete_team(pool: &PgPool, user_id: Uuid, team_id: Uuid) -> ProjectResult<()> {
    let team = find_team(pool, team_id).await?;
    if team.owner_id != user_id {
        return Err(ProjectError::forbidden("Only the team owner can delete it"));
    }

    if team_db::delete_team(pool, team_id).await? == 0 {
        return Err(team_not_found(team_id));
    }
    info!(%team_id, "deleted team");
    Ok(())
}

/// File a request to join a team.
pub async fn request_join(pool: &PgPool, user_id: Uuid, team_id: Uuid) -> ProjectResult<()> {
    find_team(pool, team_id).await?;
    if team_db::is_member(pool, team_id, user_id).await? {
        return Err(ProjectError::validation("You are already a member of this team"));
    }
    if !team_db::insert_join_request(pool, team_id, user_id).await? {
        return Err(ProjectError::validation("Join request already sent"));
    }

    info!(%team_id, %user_id, "join request filed");
    Ok(())
}

/// Approve or reject a pending join request. Only the owner may decide.
pub async fn respond_to_join(
    pool: &PgPool,
    owner_id: Uuid,
    team_id: Uuid,
    decision: &JoinDecision,
) -> ProjectResult<()> {
    let team = find_team(pool, team_id).await?;
    if team.owner_id != owner_id {
        return Err(ProjectError::forbidden(
            "Only the team owner can respond to join requests",
        ));
    }

    let handled = match decision.action {
        JoinAction::Approve => {
            team_db::approve_join_request(pool, team_id, decision.user_id).await?
        }
        JoinAction::Reject => team_db::reject_join_request(pool, team_id, decision.user_id).await?,
    };
    if !handled {
        return Err(ProjectError::not_found(format!(
            "no pending join request from user {}",
            decision.user_id
        )));
    }

    info!(%team_id, user_id = %decision.user_id, action = ?decision.action, "join request handled");
    Ok(())
}

async fn find_team(pool: &PgPool, team_id: Uuid) -> ProjectResult<Team> {
    team_db::get_team(pool, team_id)
        .await?
        .ok_or_else(|| team_not_found(team_id))
}

fn team_not_found(id: Uuid) -> ProjectError {
    ProjectError::not_found(format!("team {id} not found"))
}

async fn load_detail(pool: &PgPool, team: Team, viewer: Uuid) -> ProjectResult<TeamDetail> {
    let members = team_db::list_members(pool, team.id).await?;
    let join_requests = if team.owner_id == viewer {
        team_db::list_join_requests(pool, team.id).await?
    } else {
        Vec::new()
    };
    let task_ids = team_db::list_team_task_ids(pool, team.id).await?;

    Ok(TeamDetail {
        team,
        members,
        join_requests,
        task_ids,
    })
}
