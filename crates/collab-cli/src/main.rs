mod config;
mod serve_cmd;
mod user_cmds;

use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use collab_core::plan::ChatCompletionsClient;
use collab_db::pool;

use config::CollabConfig;
use serve_cmd::AppState;

#[derive(Parser)]
#[command(name = "collab", about = "Team and project collaboration server with AI plan generation")]
struct Cli {
    /// Database URL (overrides COLLAB_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a collab config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/collab")]
        db_url: String,
        /// API key for the chat-completion service
        #[arg(long)]
        llm_api_key: Option<String>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create the collab database if needed and run migrations
    DbInit,
    /// Run the HTTP API server
    Serve {
        /// Address to bind (defaults to server.bind from the config file)
        #[arg(long)]
        bind: Option<String>,
        /// Port to listen on (defaults to server.port from the config file)
        #[arg(long)]
        port: Option<u16>,
    },
    /// User management
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Print shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Register a user and print their bearer token
    Add {
        /// Display name
        #[arg(long)]
        name: String,
        /// Email address (unique)
        #[arg(long)]
        email: String,
    },
    /// Print the bearer token of an existing user
    Token {
        /// User ID or email
        user: String,
    },
    /// List registered users
    List,
}

/// Execute the `collab init` command: write config file.
fn cmd_init(db_url: &str, llm_api_key: Option<String>, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let token_secret = config::generate_token_secret();
    let has_llm_key = llm_api_key.is_some();

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
        auth: config::AuthSection {
            token_secret: token_secret.clone(),
        },
        llm: config::LlmSection {
            api_key: llm_api_key,
            ..Default::default()
        },
        server: config::ServerSection::default(),
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!("  auth.token_secret = {}...{}", &token_secret[..8], &token_secret[56..]);
    if !has_llm_key {
        println!(
            "  llm.api_key is not set; set {} or edit the file before creating AI projects",
            config::LLM_API_KEY_ENV
        );
    }
    println!();
    println!("Next: run `collab db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `collab db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = CollabConfig::resolve(cli_db_url)?;

    println!("Initializing collab database...");

    let db_name = resolved.db_config.database_name().unwrap_or("collab").to_owned();
    match pool::ensure_database_exists(&resolved.db_config).await? {
        pool::DatabaseStatus::Created => println!("Created database {db_name}."),
        pool::DatabaseStatus::Existing => println!("Database {db_name} already exists."),
    }
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("collab db-init complete.");
    Ok(())
}

/// Execute the `collab serve` command.
async fn cmd_serve(
    cli_db_url: Option<&str>,
    bind: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let resolved = CollabConfig::resolve(cli_db_url)?;

    if resolved.llm_config.api_key.is_none() {
        tracing::warn!(
            "no LLM API key configured; AI project creation will fail until {} is set",
            config::LLM_API_KEY_ENV
        );
    }
    let planner = ChatCompletionsClient::new(resolved.llm_config)?;
    tracing::info!(model = planner.model(), "plan generation configured");

    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool).await?;

    let state = AppState {
        pool: db_pool.clone(),
        tokens: resolved.token_config,
        planner: Arc::new(planner),
    };
    let bind = bind.unwrap_or(resolved.server.bind);
    let port = port.unwrap_or(resolved.server.port);

    let result = serve_cmd::run_serve(state, &bind, port).await;
    db_pool.close().await;
    result
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            db_url,
            llm_api_key,
            force,
        } => {
            cmd_init(&db_url, llm_api_key, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Serve { bind, port } => {
            cmd_serve(cli.database_url.as_deref(), bind, port).await?;
        }
        Commands::User { command } => {
            let resolved = CollabConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result =
                user_cmds::run_user_command(command, &db_pool, &resolved.token_config).await;
            db_pool.close().await;
            result?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "collab", &mut std::io::stdout());
        }
    }

    Ok(())
}

#[cfg(test)]
mod test_util {
    use std::sync::{Mutex, MutexGuard};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Serialize tests that read or write process environment variables.
    pub fn lock_env() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
