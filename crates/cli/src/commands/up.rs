use elif_migrations::{sql::mask_url, MigrationConfig, MigrationRunner};
use tokio_util::sync::CancellationToken;

/// Apply every pending migration
pub async fn run(config: MigrationConfig) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling migration run");
            interrupt.cancel();
        }
    });

    tracing::info!(
        "Migrating {} from {}",
        mask_url(&config.database_url),
        config.migrations_dir.display()
    );

    let mut runner = MigrationRunner::from_config(config);
    let result = runner.run(&cancel).await?;

    if result.applied_count == 0 {
        println!("✅ Database is up to date");
    } else {
        println!("✅ Applied {} migration(s):", result.applied_count);
        for label in &result.applied_migrations {
            println!("  {}", label);
        }
    }
    if let Some(version) = result.final_version {
        println!("Current version: {}", version);
    }
    println!("Completed in {}ms", result.execution_time_ms);
    Ok(())
}
