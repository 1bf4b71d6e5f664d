//! `collab user` subcommands: register users and print their bearer tokens.

use anyhow::{Context, Result, bail};
use sqlx::PgPool;
use uuid::Uuid;

use collab_core::token::{TokenConfig, generate_token};
use collab_db::models::User;
use collab_db::queries::users;

use crate::UserCommands;

pub async fn run_user_command(
    command: UserCommands,
    pool: &PgPool,
    tokens: &TokenConfig,
) -> Result<()> {
    match command {
        UserCommands::Add { name, email } => cmd_add(pool, tokens, &name, &email).await,
        UserCommands::Token { user } => cmd_token(pool, tokens, &user).await,
        UserCommands::List => cmd_list(pool).await,
    }
}

async fn cmd_add(pool: &PgPool, tokens: &TokenConfig, name: &str, email: &str) -> Result<()> {
    let name = name.trim();
    let email = email.trim();
    if name.is_empty() {
        bail!("user name must not be empty");
    }
    if !email.contains('@') {
        bail!("invalid email address: {email}");
    }
    if users::get_user_by_email(pool, email).await?.is_some() {
        bail!("a user with email {email} already exists");
    }

    let user = users::insert_user(pool, name, email).await?;
    tracing::info!(user_id = %user.id, "registered user");

    println!("Created user {} <{}>", user.name, user.email);
    println!("  id:    {}", user.id);
    println!("  token: {}", generate_token(tokens, user.id));
    Ok(())
}

async fn cmd_token(pool: &PgPool, tokens: &TokenConfig, user: &str) -> Result<()> {
    let user = find_user(pool, user).await?;
    println!("{}", generate_token(tokens, user.id));
    Ok(())
}

async fn cmd_list(pool: &PgPool) -> Result<()> {
    let all = users::list_users(pool).await?;
    if all.is_empty() {
        println!("No users. Add one with `collab user add`.");
        return Ok(());
    }

    println!("{:<36}  {:<20}  EMAIL", "ID", "NAME");
    for user in &all {
        println!("{:<36}  {:<20}  {}", user.id, user.name, user.email);
    }
    Ok(())
}

/// Look a user up by id or email.
async fn find_user(pool: &PgPool, key: &str) -> Result<User> {
    let found = match Uuid::parse_str(key) {
        Ok(id) => users::get_user(pool, id).await?,
        Err(_) => users::get_user_by_email(pool, key).await?,
    };
    found.with_context(|| format!("no user matches {key}"))
}
