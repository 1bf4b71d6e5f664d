use std::env;

/// Database configuration.
///
/// Reads from the `COLLAB_DATABASE_URL` environment variable, falling back to
/// `postgresql://localhost:5432/collab` when unset.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Full PostgreSQL connection URL.
    pub database_url: String,
}

impl DbConfig {
    /// The default connection URL used when no environment variable is set.
    pub const DEFAULT_URL: &str = "postgresql://localhost:5432/collab";

    /// Environment variable holding the connection URL.
    pub const ENV_VAR: &str = "COLLAB_DATABASE_URL";

    /// Build a config from the environment, falling back to [`Self::DEFAULT_URL`].
    pub fn from_env() -> Self {
        let database_url =
            env::var(Self::ENV_VAR).unwrap_or_else(|_| Self::DEFAULT_URL.to_owned());
        Self { database_url }
    }

    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    /// Database name: the last path segment of the URL, without query string.
    pub fn database_name(&self) -> Option<&str> {
        self.database_url
            .rsplit('/')
            .next()
            .map(|s| s.split('?').next().unwrap_or(s))
            .filter(|s| !s.is_empty())
    }

    /// URL of the `postgres` maintenance database on the same server. Used to
    /// issue `CREATE DATABASE` when the target does not exist yet.
    pub fn maintenance_url(&self) -> String {
        match self.database_url.rfind('/') {
            Some(pos) => {
                let mut url = self.database_url[..pos].to_owned();
                url.push_str("/postgres");
                url
            }
            None => self.database_url.clone(),
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
