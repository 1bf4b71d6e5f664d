use std::time::Duration;

use anyhow::{Context, Result, bail};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tracing::info;

use crate::config::DbConfig;

/// Migrations embedded at compile time from `crates/collab-db/migrations/`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// Tables reported by `collab db-init`, people first, then the work they own.
pub const COLLAB_TABLES: &[&str] = &[
    "users",
    "teams",
    "team_members",
    "team_join_requests",
    "projects",
    "tasks",
    "task_dependencies",
    "project_tasks",
    "team_tasks",
];

/// Whether [`ensure_database_exists`] had to create the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseStatus {
    Existing,
    Created,
}

/// Create the request-handling pool. Every HTTP request and every
/// AI project transaction borrows a connection from here.
pub async fn create_pool(config: &DbConfig) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await
        .with_context(|| format!("failed to connect to collab database at {}", config.database_url))
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .context("failed to apply collab migrations")?;

    info!(migrations = MIGRATOR.iter().count(), "collab schema up to date");
    Ok(())
}

/// Create the collab database through the `postgres` maintenance database
/// when it is missing.
pub async fn ensure_database_exists(config: &DbConfig) -> Result<DatabaseStatus> {
    let db_name = config
        .database_name()
        .context("database URL does not name a database")?;
    check_identifier(db_name)?;

    let maintenance_url = config.maintenance_url();
    let admin = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&maintenance_url)
        .await
        .with_context(|| format!("failed to connect to maintenance database at {maintenance_url}"))?;

    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(db_name)
            .fetch_one(&admin)
            .await
            .context("failed to look up database in pg_database")?;

    let status = if exists {
        DatabaseStatus::Existing
    } else {
        admin
            .execute(format!("CREATE DATABASE {db_name}").as_str())
            .await
            .with_context(|| format!("failed to create database {db_name}"))?;
        info!(db = db_name, "created collab database");
        DatabaseStatus::Created
    };

    admin.close().await;
    Ok(status)
}

/// `CREATE DATABASE` takes no bind parameters, so the name is spliced in and
/// must be a plain identifier.
fn check_identifier(name: &str) -> Result<()> {
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        bail!("database name {name:?} must be a plain identifier (letters, digits, underscore)");
    }
    Ok(())
}

/// Row counts for [`COLLAB_TABLES`], in that order.
pub async fn table_counts(pool: &PgPool) -> Result<Vec<(String, i64)>> {
    let mut counts = Vec::with_capacity(COLLAB_TABLES.len());
    for table in COLLAB_TABLES {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .with_context(|| format!("failed to count rows in {table}"))?;
        counts.push(((*table).to_owned(), count));
    }
    Ok(counts)
}
