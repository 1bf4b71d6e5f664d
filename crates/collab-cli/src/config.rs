//! Configuration file management for collab.
//!
//! Provides a TOML-based config file at `~/.config/collab/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use collab_core::plan::LlmConfig;
use collab_core::plan::generate::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use collab_core::token::{TOKEN_SECRET_ENV, TokenConfig};
use collab_db::config::DbConfig;

pub const LLM_API_KEY_ENV: &str = "COLLAB_LLM_API_KEY";
pub const LLM_BASE_URL_ENV: &str = "COLLAB_LLM_BASE_URL";
pub const LLM_MODEL_ENV: &str = "COLLAB_LLM_MODEL";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    pub auth: AuthSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub server: ServerSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthSection {
    /// Hex-encoded token secret (64 hex chars = 32 bytes).
    pub token_secret: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LlmSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Request timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the collab config directory: `$XDG_CONFIG_HOME/collab` or
/// `~/.config/collab`, on every platform.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("collab");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("collab")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    load_config_from(&config_path())
}

pub fn load_config_from(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Write the config file with owner-only permissions.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    save_config_to(&config_path(), config)
}

pub fn save_config_to(path: &Path, config: &ConfigFile) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

/// Generate a random token secret: 32 random bytes, hex-encoded (64 chars).
pub fn generate_token_secret() -> String {
    use rand::Rng;
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct CollabConfig {
    pub db_config: DbConfig,
    pub token_config: TokenConfig,
    pub llm_config: LlmConfig,
    pub server: ServerSection,
}

impl CollabConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config
    /// file > default.
    ///
    /// - DB URL: `cli_db_url` > `COLLAB_DATABASE_URL` > `database.url` > `DbConfig::DEFAULT_URL`
    /// - Token secret: `COLLAB_TOKEN_SECRET` > `auth.token_secret` > error
    /// - LLM: `COLLAB_LLM_*` > `[llm]` > Groq defaults (no key)
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        Self::resolve_with(cli_db_url, load_config().ok())
    }

    fn resolve_with(cli_db_url: Option<&str>, file_config: Option<ConfigFile>) -> Result<Self> {
        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var(DbConfig::ENV_VAR) {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };
        let db_config = DbConfig::new(db_url);

        let token_config = if let Ok(secret_hex) = std::env::var(TOKEN_SECRET_ENV) {
            TokenConfig::from_hex(&secret_hex)
                .with_context(|| format!("{TOKEN_SECRET_ENV} env var is not a usable secret"))?
        } else if let Some(ref cfg) = file_config {
            TokenConfig::from_hex(&cfg.auth.token_secret)
                .context("invalid token_secret in config file")?
        } else {
            bail!(
                "token secret not found; set {TOKEN_SECRET_ENV} or run `collab init` to create a config file"
            );
        };

        let (llm, server) = match file_config {
            Some(cfg) => (cfg.llm, cfg.server),
            None => (LlmSection::default(), ServerSection::default()),
        };
        let env_or = |var: &str, file: Option<String>| {
            std::env::var(var).ok().filter(|v| !v.is_empty()).or(file)
        };
        let defaults = LlmConfig::default();
        let llm_config = LlmConfig {
            api_key: env_or(LLM_API_KEY_ENV, llm.api_key),
            base_url: env_or(LLM_BASE_URL_ENV, llm.base_url)
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: env_or(LLM_MODEL_ENV, llm.model).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            timeout: llm.timeout_secs.map_or(defaults.timeout, Duration::from_secs),
        };

        Ok(Self {
            db_config,
            token_config,
            llm_config,
            server,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::lock_env;

    const SECRET: &str = "aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55aa55";

    fn sample() -> ConfigFile {
        ConfigFile {
            database: DatabaseSection {
                url: "postgresql://filehost:5432/filedb".to_string(),
            },
            auth: AuthSection {
                token_secret: "bb".repeat(32),
            },
            llm: LlmSection {
                api_key: Some("file-key".to_string()),
                model: Some("file-model".to_string()),
                ..Default::default()
            },
            server: ServerSection::default(),
        }
    }

    fn clear_env() {
        for var in [
            DbConfig::ENV_VAR,
            TOKEN_SECRET_ENV,
            LLM_API_KEY_ENV,
            LLM_BASE_URL_ENV,
            LLM_MODEL_ENV,
        ] {
            unsafe { std::env::remove_var(var) };
        }
    }

    #[test]
    fn generate_token_secret_is_64_hex_chars() {
        let secret = generate_token_secret();
        assert_eq!(secret.len(), 64);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(secret, generate_token_secret());
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("collab").join("config.toml");

        save_config_to(&path, &sample()).unwrap();
        let loaded = load_config_from(&path).unwrap();

        assert_eq!(loaded.database.url, "postgresql://filehost:5432/filedb");
        assert_eq!(loaded.auth.token_secret, "bb".repeat(32));
        assert_eq!(loaded.llm.api_key.as_deref(), Some("file-key"));
        assert_eq!(loaded.server.port, 5000);
    }

    #[test]
    fn minimal_file_gets_default_sections() {
        let cfg: ConfigFile = toml::from_str(
            "[database]\nurl = \"postgresql://x/y\"\n[auth]\ntoken_secret = \"aa\"\n",
        )
        .unwrap();
        assert!(cfg.llm.api_key.is_none());
        assert_eq!(cfg.server.bind, "127.0.0.1");
    }

    #[cfg(unix)]
    #[test]
    fn save_config_sets_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        save_config_to(&path, &sample()).unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn cli_flag_overrides_all() {
        let _lock = lock_env();
        clear_env();
        unsafe { std::env::set_var(DbConfig::ENV_VAR, "postgresql://env:5432/envdb") };

        let config =
            CollabConfig::resolve_with(Some("postgresql://cli:5432/clidb"), Some(sample())).unwrap();
        assert_eq!(config.db_config.database_url, "postgresql://cli:5432/clidb");

        clear_env();
    }

    #[test]
    fn env_overrides_config_file() {
        let _lock = lock_env();
        clear_env();
        unsafe { std::env::set_var(DbConfig::ENV_VAR, "postgresql://env:5432/envdb") };
        unsafe { std::env::set_var(TOKEN_SECRET_ENV, SECRET) };
        unsafe { std::env::set_var(LLM_MODEL_ENV, "env-model") };

        let config = CollabConfig::resolve_with(None, Some(sample())).unwrap();
        assert_eq!(config.db_config.database_url, "postgresql://env:5432/envdb");
        assert_eq!(config.llm_config.model, "env-model");
        assert_eq!(config.llm_config.api_key.as_deref(), Some("file-key"));

        clear_env();
    }

    #[test]
    fn file_values_used_when_env_unset() {
        let _lock = lock_env();
        clear_env();

        let config = CollabConfig::resolve_with(None, Some(sample())).unwrap();
        assert_eq!(config.db_config.database_url, "postgresql://filehost:5432/filedb");
        assert_eq!(config.llm_config.model, "file-model");
        assert_eq!(config.llm_config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn defaults_when_nothing_but_secret_set() {
        let _lock = lock_env();
        clear_env();
        unsafe { std::env::set_var(TOKEN_SECRET_ENV, SECRET) };

        let config = CollabConfig::resolve_with(None, None).unwrap();
        assert_eq!(config.db_config.database_url, DbConfig::DEFAULT_URL);
        assert_eq!(config.llm_config.model, DEFAULT_MODEL);
        assert!(config.llm_config.api_key.is_none());
        assert_eq!(config.server.port, 5000);

        clear_env();
    }

    #[test]
    fn errors_when_no_token_secret() {
        let _lock = lock_env();
        clear_env();

        let err = CollabConfig::resolve_with(Some("postgresql://localhost:5432/collab"), None)
            .unwrap_err();
        assert!(
            err.to_string().contains("token secret not found"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        assert!(config_path().ends_with("collab/config.toml"));
    }
}
