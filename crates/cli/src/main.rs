mod commands;
mod logging;

use clap::{Parser, Subcommand};
use commands::{load_config, ConfigArgs};
use logging::{init_logging, LoggingConfig};

#[derive(Parser)]
#[command(name = "elif-migrate", version)]
#[command(about = "Apply, inspect and validate elif.rs schema migrations")]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, env = "ELIF_MIGRATE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the database to the latest version
    Up,

    /// Show applied and pending migrations
    Status,

    /// Validate the migration files without touching the database
    Validate,

    /// Show the effective configuration
    Config,

    /// Create a new, empty migration file
    New {
        /// Migration name
        name: String,

        /// Version family to add to (defaults to the newest one)
        #[arg(long)]
        family: Option<i64>,

        /// Create a snapshot covering every regular migration so far
        #[arg(long)]
        snapshot: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&LoggingConfig::new(&cli.log_level, cli.json_logs))
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    let loaded = load_config(&cli.config)?;

    match cli.command {
        Commands::Up => commands::up::run(loaded.config).await,
        Commands::Status => commands::status::run(loaded.config).await,
        Commands::Validate => commands::validate::run(loaded.config).await,
        Commands::Config => commands::config::show(&loaded),
        Commands::New { name, family, snapshot } => {
            commands::new::create(&loaded.config.migrations_dir, &name, family, snapshot).await
        }
    }
}
