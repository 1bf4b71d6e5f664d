//! Fixtures for collab integration tests: a throwaway database per test and
//! a few seed helpers for the rows most tests start from.
//!
//! Databases live on one PostgreSQL server per test binary. Point
//! `COLLAB_TEST_PG_URL` at a running server (no database path) to skip the
//! container; otherwise one is started on first use.

use sqlx::{Executor, PgPool};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

use collab_db::config::DbConfig;
use collab_db::models::{Project, User};
use collab_db::pool;
use collab_db::queries::projects::{self, NewProject};
use collab_db::queries::users;

/// Environment variable naming an already running test server.
pub const TEST_SERVER_ENV: &str = "COLLAB_TEST_PG_URL";

/// Where test databases are created.
enum TestServer {
    External { url: String },
    Container { url: String, _node: ContainerAsync<Postgres> },
}

impl TestServer {
    async fn start() -> Self {
        if let Ok(url) = std::env::var(TEST_SERVER_ENV) {
            return Self::External {
                url: url.trim_end_matches('/').to_owned(),
            };
        }

        let node = Postgres::default()
            .with_tag("17")
            .start()
            .await
            .expect("failed to start PostgreSQL container");
        let host = node.get_host().await.expect("container host");
        let port = node.get_host_port_ipv4(5432).await.expect("container port");
        Self::Container {
            url: format!("postgresql://postgres:postgres@{host}:{port}"),
            _node: node,
        }
    }

    fn url(&self) -> &str {
        match self {
            Self::External { url } | Self::Container { url, .. } => url,
        }
    }

    /// Connection settings for `db_name` on this server.
    fn config_for(&self, db_name: &str) -> DbConfig {
        DbConfig::new(format!("{}/{db_name}", self.url()))
    }
}

static SERVER: OnceCell<TestServer> = OnceCell::const_new();

async fn server() -> &'static TestServer {
    SERVER.get_or_init(TestServer::start).await
}

/// Create a fresh, migrated database through the same path `collab db-init`
/// takes.
///
/// Returns `(pool, db_name)`; pass `db_name` to [`drop_test_db`] when done.
pub async fn create_test_db() -> (PgPool, String) {
    let db_name = format!("collab_test_{}", Uuid::new_v4().simple());
    let config = server().await.config_for(&db_name);

    let status = pool::ensure_database_exists(&config)
        .await
        .unwrap_or_else(|e| panic!("failed to create {db_name}: {e:#}"));
    assert_eq!(status, pool::DatabaseStatus::Created, "{db_name} already existed");

    let db = pool::create_pool(&config)
        .await
        .unwrap_or_else(|e| panic!("failed to connect to {db_name}: {e:#}"));
    pool::run_migrations(&db).await.expect("migrations should apply");
    (db, db_name)
}

/// Connection URL of a database made by [`create_test_db`], for tests that
/// drive the `collab` binary.
pub async fn test_db_url(db_name: &str) -> String {
    server().await.config_for(db_name).database_url
}

/// Drop a database made by [`create_test_db`]. Connections still open on it
/// are terminated first. Failures are ignored.
pub async fn drop_test_db(db_name: &str) {
    let config = server().await.config_for(db_name);
    let Ok(admin) = PgPool::connect(&config.maintenance_url()).await else {
        return;
    };

    let _ = sqlx::query(
        "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
         WHERE datname = $1 AND pid <> pg_backend_pid()",
    )
    .bind(db_name)
    .execute(&admin)
    .await;
    let _ = admin
        .execute(format!("DROP DATABASE IF EXISTS {db_name}").as_str())
        .await;
    admin.close().await;
}

/// Insert a user with a unique email derived from `name`.
pub async fn seed_user(pool: &PgPool, name: &str) -> User {
    let email = format!("{}.{}@example.test", name.to_lowercase(), Uuid::new_v4().simple());
    users::insert_user(pool, name, &email)
        .await
        .expect("insert_user should succeed")
}

/// Insert a project with a placeholder goal, optionally owned by a team.
pub async fn seed_project(pool: &PgPool, owner_id: Uuid, team_id: Option<Uuid>, name: &str) -> Project {
    let new = NewProject {
        name,
        goal: "seeded for tests",
        due_date: None,
        team_id,
        owner_id,
    };
    projects::insert_project(pool, &new)
        .await
        .expect("insert_project should succeed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_databases_are_isolated_and_dropped() {
        let (a, a_name) = create_test_db().await;
        let (b, b_name) = create_test_db().await;
        assert_ne!(a_name, b_name);

        seed_user(&a, "Ada").await;
        assert_eq!(users::list_users(&a).await.unwrap().len(), 1);
        assert!(users::list_users(&b).await.unwrap().is_empty());

        a.close().await;
        b.close().await;
        drop_test_db(&a_name).await;
        drop_test_db(&b_name).await;

        let config = server().await.config_for(&a_name);
        let admin = PgPool::connect(&config.maintenance_url()).await.unwrap();
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
                .bind(&a_name)
                .fetch_one(&admin)
                .await
                .unwrap();
        assert!(!exists);
        admin.close().await;
    }
}
