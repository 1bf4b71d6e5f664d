//! Database query functions for the `teams`, `team_members`,
//! `team_join_requests` and `team_tasks` tables.

use anyhow::{Context, Result};
use sqlx::{PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

use crate::models::{Team, User};

/// Create a team owned by `owner_id`. The owner is added as the first member
/// in the same transaction.
pub async fn create_team(pool: &PgPool, name: &str, owner_id: Uuid) -> Result<Team> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    let team = sqlx::query_as::<_, Team>(
        "INSERT INTO teams (name, owner_id) VALUES ($1, $2) RETURNING *",
    )
    .bind(name)
    .bind(owner_id)
    .fetch_one(&mut *tx)
    .await
    .context("failed to insert team")?;

    sqlx::query("INSERT INTO team_members (team_id, user_id) VALUES ($1, $2)")
        .bind(team.id)
        .bind(owner_id)
        .execute(&mut *tx)
        .await
        .context("failed to add team owner as member")?;

    tx.commit().await.context("failed to commit transaction")?;
    Ok(team)
}

/// Fetch a team by ID.
pub async fn get_team<'e>(executor: impl PgExecutor<'e>, id: Uuid) -> Result<Option<Team>> {
    let team = sqlx::query_as::<_, Team>("SELECT * FROM teams WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch team")?;

    Ok(team)
}

/// List the teams a user owns or is a member of, oldest first.
pub async fn list_teams_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Team>> {
    let teams = sqlx::query_as::<_, Team>(
        "SELECT t.* FROM teams t \
         WHERE t.owner_id = $1 \
            OR EXISTS (SELECT 1 FROM team_members m WHERE m.team_id = t.id AND m.user_id = $1) \
         ORDER BY t.created_at ASC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .context("failed to list teams for user")?;

    Ok(teams)
}

/// Delete a team. Returns the number of rows removed (0 when absent).
pub async fn delete_team(pool: &PgPool, id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM teams WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to delete team")?;

    Ok(result.rows_affected())
}

/// Whether `user_id` is a member of the team.
pub async fn is_member<'e>(
    executor: impl PgExecutor<'e>,
    team_id: Uuid,
    user_id: Uuid,
) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM team_members WHERE team_id = $1 AND user_id = $2)",
    )
    .bind(team_id)
    .bind(user_id)
    .fetch_one(executor)
    .await
    .context("failed to check team membership")?;

    Ok(exists)
}

/// Team members, in join order.
pub async fn list_members(pool: &PgPool, team_id: Uuid) -> Result<Vec<User>> {
    let users = sqlx::query_as::<_, User>(
        "SELECT u.* FROM team_members m \
         JOIN users u ON u.id = m.user_id \
         WHERE m.team_id = $1 \
         ORDER BY m.joined_at ASC, u.name",
    )
    .bind(team_id)
    .fetch_all(pool)
    .await
    .context("failed to list team members")?;

    Ok(users)
}

/// Users with a pending join request, oldest request first.
pub async fn list_join_requests(pool: &PgPool, team_id: Uuid) -> Result<Vec<User>> {
    let users = sqlx::query_as::<_, User>(
        "SELECT u.* FROM team_join_requests r \
         JOIN users u ON u.id = r.user_id \
         WHERE r.team_id = $1 \
         ORDER BY r.requested_at ASC, u.name",
    )
    .bind(team_id)
    .fetch_all(pool)
    .await
    .context("failed to list join requests")?;

    Ok(users)
}

/// Record a join request. Returns `false` when one is already pending.
pub async fn insert_join_request(pool: &PgPool, team_id: Uuid, user_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "INSERT INTO team_join_requests (team_id, user_id) VALUES ($1, $2) \
         ON CONFLICT DO NOTHING",
    )
    .bind(team_id)
    .bind(user_id)
    .execute(pool)
    .await
    .context("failed to insert join request")?;

    Ok(result.rows_affected() == 1)
}

/// Turn a pending join request into a membership.
///
/// Returns `false` when there was no pending request for the user.
pub async fn approve_join_request(pool: &PgPool, team_id: Uuid, user_id: Uuid) -> Result<bool> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    let removed = sqlx::query(
        "DELETE FROM team_join_requests WHERE team_id = $1 AND user_id = $2",
    )
    .bind(team_id)
    .bind(user_id)
    .execute(&mut *tx)
    .await
    .context("failed to remove join request")?
    .rows_affected();

    if removed == 0 {
        return Ok(false);
    }

    sqlx::query(
        "INSERT INTO team_members (team_id, user_id) VALUES ($1, $2) \
         ON CONFLICT DO NOTHING",
    )
    .bind(team_id)
    .bind(user_id)
    .execute(&mut *tx)
    .await
    .context("failed to add team member")?;

    tx.commit().await.context("failed to commit transaction")?;
    Ok(true)
}

/// Drop a pending join request. Returns `false` when there was none.
pub async fn reject_join_request(pool: &PgPool, team_id: Uuid, user_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "DELETE FROM team_join_requests WHERE team_id = $1 AND user_id = $2",
    )
    .bind(team_id)
    .bind(user_id)
    .execute(pool)
    .await
    .context("failed to reject join request")?;

    Ok(result.rows_affected() == 1)
}

/// Append tasks to the end of a team's task list, keeping the given order.
pub async fn append_team_tasks(
    conn: &mut PgConnection,
    team_id: Uuid,
    task_ids: &[Uuid],
) -> Result<()> {
    for task_id in task_ids {
        sqlx::query(
            "INSERT INTO team_tasks (team_id, task_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(team_id)
        .bind(task_id)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to append task {task_id} to team {team_id}"))?;
    }

    Ok(())
}

/// IDs in a team's task list, in append order.
pub async fn list_team_task_ids(pool: &PgPool, team_id: Uuid) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> =
        sqlx::query_as("SELECT task_id FROM team_tasks WHERE team_id = $1 ORDER BY position")
            .bind(team_id)
            .fetch_all(pool)
            .await
            .context("failed to list team tasks")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}
