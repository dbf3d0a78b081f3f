use elif_migrations::sql::mask_url;
use elif_migrations::ConfigSource;

use super::LoadedConfig;

/// Print the effective configuration and where each value came from
pub fn show(loaded: &LoadedConfig) -> anyhow::Result<()> {
    let config = &loaded.config;
    let restore_from = config.restore_from.clone().unwrap_or_else(|| "none".to_string());

    let rows = [
        ("database_url", mask_url(&config.database_url)),
        ("migrations_dir", config.migrations_dir.display().to_string()),
        ("auto_create", config.auto_create.to_string()),
        ("snapshots_enabled", config.snapshots_enabled.to_string()),
        ("ledger_schema", config.ledger_schema.clone()),
        ("ledger_table", config.ledger_table.clone()),
        ("command_timeout_secs", config.command_timeout_secs.to_string()),
        ("lock_enabled", config.lock_enabled.to_string()),
        ("lock_timeout_ms", config.lock_timeout_ms.to_string()),
        ("lock_namespace", config.lock_namespace.clone()),
        ("restore_from", restore_from),
        ("maintenance_database", config.maintenance_database.clone()),
    ];

    println!("Migration Configuration:");
    println!("========================");
    for (field, value) in rows {
        let source = loaded
            .sources
            .get(field)
            .map(ConfigSource::to_string)
            .unwrap_or_default();
        println!("  {:<22} {:<40} ({})", field, value, source);
    }

    match config.validate() {
        Ok(()) => println!("\n✅ Configuration is valid"),
        Err(e) => println!("\n❌ Configuration is invalid: {}", e),
    }
    Ok(())
}
