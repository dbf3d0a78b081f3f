pub mod config;
pub mod new;
pub mod status;
pub mod up;
pub mod validate;

use anyhow::Context;
use clap::Args;
use elif_migrations::{ConfigSource, MigrationConfig};
use std::collections::HashMap;
use std::path::PathBuf;

/// Options shared by every command
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// YAML configuration file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Target database URL (overrides DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Directory holding migration files (overrides ELIF_MIGRATE_DIR)
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,
}

/// Effective configuration and where each value came from
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: MigrationConfig,
    pub sources: HashMap<String, ConfigSource>,
}

/// Resolve configuration: file, then environment, then command line flags.
///
/// Validation is left to the commands; `validate` and `new` never need a database.
pub fn load_config(args: &ConfigArgs) -> anyhow::Result<LoadedConfig> {
    let mut config = match &args.config {
        Some(path) => MigrationConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => MigrationConfig::default(),
    };
    config.apply_env()?;

    let mut sources = match &args.config {
        Some(path) => config.sources_with_file(path),
        None => config.config_sources(),
    };

    if let Some(url) = &args.database_url {
        config.database_url = url.clone();
        sources.insert("database_url".to_string(), ConfigSource::Programmatic);
    }
    if let Some(dir) = &args.dir {
        config.migrations_dir = dir.clone();
        sources.insert("migrations_dir".to_string(), ConfigSource::Programmatic);
    }

    Ok(LoadedConfig { config, sources })
}
