//! Database query functions for the `users` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::User;

/// Insert a new user. Fails if the email is already registered.
pub async fn insert_user(pool: &PgPool, name: &str, email: &str) -> Result<User> {
    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (name, email) VALUES ($1, $2) RETURNING *",
    )
    .bind(name)
    .bind(email)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert user {email:?}"))?;

    Ok(user)
}

/// Fetch a user by ID.
pub async fn get_user(pool: &PgPool, id: Uuid) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch user")?;

    Ok(user)
}

/// Fetch a user by email address.
pub async fn get_user_by_email(pool: &PgPool, email: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await
        .context("failed to fetch user by email")?;

    Ok(user)
}

/// List all users, ordered by name.
pub async fn list_users(pool: &PgPool) -> Result<Vec<User>> {
    let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY name, email")
        .fetch_all(pool)
        .await
        .context("failed to list users")?;

    Ok(users)
}
