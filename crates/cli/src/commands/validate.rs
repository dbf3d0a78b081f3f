use elif_migrations::{MigrationConfig, MigrationRunner};

/// Check the migration set without connecting to the database
pub async fn run(config: MigrationConfig) -> anyhow::Result<()> {
    let dir = config.migrations_dir.display().to_string();
    let count = MigrationRunner::from_config(config).validate().await?;
    println!("✅ {} migration(s) in {} are valid", count, dir);
    Ok(())
}
