use elif_migrations::{MigrationConfig, MigrationRunner, MigrationStatus, MigrationStatusEntry};

/// Show applied and pending migrations
pub async fn run(config: MigrationConfig) -> anyhow::Result<()> {
    let runner = MigrationRunner::from_config(config);
    let entries = runner.status().await?;

    println!("Migration Status:");
    println!("================");

    if entries.is_empty() {
        println!("No migrations found");
        return Ok(());
    }

    for entry in &entries {
        println!("{}", format_entry(entry));
    }

    let pending = entries
        .iter()
        .filter(|e| e.status == MigrationStatus::Pending)
        .count();
    println!("\n{} migration(s), {} pending", entries.len(), pending);
    Ok(())
}

fn format_entry(entry: &MigrationStatusEntry) -> String {
    let kind = if entry.is_snapshot { " (snapshot)" } else { "" };
    match &entry.status {
        MigrationStatus::Applied { applied_at } => format!(
            "  ✅ {:>12} {}{}  applied {}",
            entry.version,
            entry.name,
            kind,
            applied_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        MigrationStatus::Pending => format!("  ⏳ {:>12} {}{}", entry.version, entry.name, kind),
        MigrationStatus::Unknown { applied_at } => format!(
            "  ❓ {:>12} {}{}  applied {} but not found in any source",
            entry.version,
            entry.name,
            kind,
            applied_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_pending_snapshot() {
        let entry = MigrationStatusEntry {
            version: 500,
            name: "Baseline".to_string(),
            is_snapshot: true,
            status: MigrationStatus::Pending,
        };
        let line = format_entry(&entry);
        assert!(line.contains("500 Baseline (snapshot)"));
        assert!(line.contains('⏳'));
    }
}
