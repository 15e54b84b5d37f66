mod config;
mod generate_cmd;
mod quiz_cmd;
mod roadmap_cmds;
mod serve_cmd;
mod status_cmd;

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use cairn_core::gateway::HttpGateway;
use cairn_db::pool;

use config::CairnConfig;

#[derive(Parser)]
#[command(name = "cairn", about = "AI-generated learning roadmap service")]
struct Cli {
    /// Database URL (overrides CAIRN_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a cairn config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/cairn")]
        db_url: String,
        /// Base URL of an OpenAI-compatible completion endpoint
        #[arg(long, default_value = "http://localhost:11434/v1")]
        gateway_url: String,
        /// Model identifier sent with completion requests
        #[arg(long, default_value = "llama3.1")]
        gateway_model: String,
        /// Bearer token for the completion endpoint
        #[arg(long)]
        gateway_key: Option<String>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the cairn database (requires config file or env vars)
    DbInit,
    /// Run the HTTP API server
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Roadmap management
    Roadmap {
        #[command(subcommand)]
        command: RoadmapCommands,
    },
    /// Generate materials and a quiz for one milestone
    Generate {
        /// Roadmap ID
        roadmap_id: String,
        /// Milestone to generate (the first when omitted)
        #[arg(long, default_value_t = 0)]
        milestone: u32,
        /// Regenerate even when the milestone is already complete
        #[arg(long)]
        force: bool,
        /// Clear the milestone's materials and all progress first
        #[arg(long)]
        reset: bool,
    },
    /// Request cancellation of a running generation
    Cancel {
        /// Roadmap ID
        roadmap_id: String,
        /// Limit the cancellation to one milestone
        #[arg(long)]
        milestone: Option<u32>,
    },
    /// Show per-milestone content and generation status
    Status {
        /// Roadmap ID
        roadmap_id: String,
    },
    /// Quiz inspection
    Quiz {
        #[command(subcommand)]
        command: QuizCommands,
    },
}

#[derive(Subcommand)]
pub enum RoadmapCommands {
    /// Create a roadmap from a TOML outline file
    Create {
        /// Path to the outline TOML file
        file: String,
        /// Owner to file the roadmap under (a fresh id is minted when absent)
        #[arg(long)]
        owner: Option<String>,
    },
    /// Show roadmap details
    Show {
        /// Roadmap ID
        roadmap_id: String,
    },
    /// List all roadmaps
    List,
    /// Publish a roadmap, freezing its content
    Publish {
        /// Roadmap ID
        roadmap_id: String,
    },
}

#[derive(Subcommand)]
pub enum QuizCommands {
    /// Print a milestone's quiz, synthesizing it when absent
    Show {
        /// Roadmap ID
        roadmap_id: String,
        /// Milestone index
        milestone: u32,
    },
}

/// Execute the `cairn init` command: write config file.
fn cmd_init(
    db_url: &str,
    gateway_url: &str,
    gateway_model: &str,
    gateway_key: Option<String>,
    force: bool,
) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
        gateway: config::GatewaySection {
            base_url: gateway_url.to_string(),
            model: gateway_model.to_string(),
            api_key: gateway_key,
        },
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!("  gateway.base_url = {gateway_url}");
    println!("  gateway.model = {gateway_model}");
    println!();
    println!("Next: run `cairn db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `cairn db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = CairnConfig::resolve(cli_db_url)?;

    println!("Initializing cairn database...");

    // 1. Create the database if it does not exist.
    pool::ensure_database_exists(&resolved.db_config).await?;

    // 2. Connect to the target database.
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    // 3. Run migrations.
    pool::run_migrations(&db_pool).await?;

    // 4. Print success with table counts.
    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    // 5. Clean shutdown.
    db_pool.close().await;

    println!("cairn db-init complete.");
    Ok(())
}

fn parse_roadmap_id(raw: &str) -> anyhow::Result<uuid::Uuid> {
    uuid::Uuid::parse_str(raw).with_context(|| format!("invalid roadmap ID: {raw}"))
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
            gateway_url,
            gateway_model,
            gateway_key,
            force,
        } => {
            cmd_init(&db_url, &gateway_url, &gateway_model, gateway_key, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Serve { bind, port } => {
            let resolved = CairnConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let gateway = HttpGateway::new(resolved.gateway_config)?;
            let state = serve_cmd::AppState {
                pool: db_pool.clone(),
                gateway: Arc::new(gateway),
            };
            let result = serve_cmd::run_serve(state, &bind, port).await;
            db_pool.close().await;
            result?;
        }
        Commands::Roadmap { command } => {
            let resolved = CairnConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = roadmap_cmds::run_roadmap_command(command, &db_pool).await;
            db_pool.close().await;
            result?;
        }
        Commands::Generate {
            roadmap_id,
            milestone,
            force,
            reset,
        } => {
            let resolved = CairnConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let id = parse_roadmap_id(&roadmap_id)?;
            let result = generate_cmd::run_generate(
                &db_pool,
                resolved.gateway_config,
                id,
                milestone,
                force,
                reset,
            )
            .await;
            db_pool.close().await;
            result?;
        }
        Commands::Cancel {
            roadmap_id,
            milestone,
        } => {
            let resolved = CairnConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let id = parse_roadmap_id(&roadmap_id)?;
            let result = generate_cmd::run_cancel(&db_pool, id, milestone).await;
            db_pool.close().await;
            result?;
        }
        Commands::Status { roadmap_id } => {
            let resolved = CairnConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let id = parse_roadmap_id(&roadmap_id)?;
            let result = status_cmd::run_status(&db_pool, id).await;
            db_pool.close().await;
            result?;
        }
        Commands::Quiz { command } => {
            let QuizCommands::Show {
                roadmap_id,
                milestone,
            } = command;
            let resolved = CairnConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let id = parse_roadmap_id(&roadmap_id)?;
            let result =
                quiz_cmd::run_quiz_show(&db_pool, resolved.gateway_config, id, milestone).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod test_util {
    use std::sync::{Mutex, MutexGuard, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    /// Serializes tests that mutate process-wide environment variables.
    pub fn lock_env() -> MutexGuard<'static, ()> {
        ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
